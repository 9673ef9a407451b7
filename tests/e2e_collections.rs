//! Collection document tests over real stored data

mod common;

use bellhop::data::{ObjectType, Thing};
use bellhop::federation::CollectionPager;
use common::instance;
use serde_json::{Value, json};

#[tokio::test]
async fn followers_collection_index_and_first_page() {
    let env = instance().await;
    env.state.db.create_local_actor("alice", true).await.unwrap();
    let alice = env.actor_url("alice");

    for name in ["fred", "jim", "sheila"] {
        let follower = format!("https://remote.example/users/{}", name);
        env.state.db.confirm_follow(&follower, &alice).await.unwrap();
    }

    let followers = env.state.db.followers_of(&alice).await.unwrap();
    let items: Vec<Value> = followers.into_iter().map(Value::String).collect();

    let index_url = env
        .state
        .config
        .server
        .collection_url("alice", "followers");
    let pager = &env.state.pager;

    let index = pager.render(&index_url, &items, None);
    assert_eq!(index["type"], "OrderedCollection");
    assert_eq!(index["id"], index_url);
    assert_eq!(index["totalItems"], 3);
    assert_eq!(index["first"], format!("{}?page=1", index_url));

    let page = pager.render(&index_url, &items, Some(1));
    assert_eq!(page["type"], "OrderedCollectionPage");
    assert_eq!(page["partOf"], index_url);
    assert_eq!(page["orderedItems"].as_array().unwrap().len(), 3);
    assert!(page.get("prev").is_none());
    assert!(page.get("next").is_none());
}

#[tokio::test]
async fn outbox_spills_across_pages_with_correct_links() {
    let env = instance().await;
    env.state.db.create_local_actor("alice", true).await.unwrap();
    let alice = env.actor_url("alice");
    let server = env.state.config.server.clone();

    for i in 0..120 {
        let mut note = Thing::new_local(ObjectType::Note);
        note.set("actor", alice.as_str(), &server).unwrap();
        note.set("content", format!("post {}", i), &server).unwrap();
        env.state.db.save_new(&mut note).await.unwrap();
    }

    let things = env.state.db.activities_by_actor(&alice).await.unwrap();
    assert_eq!(things.len(), 120);

    let items = CollectionPager::forms_for(&things, &server);
    let index_url = env.state.config.server.collection_url("alice", "outbox");
    let page2 = env.state.pager.render(&index_url, &items, Some(2));

    assert_eq!(page2["totalItems"], 120);
    assert_eq!(page2["orderedItems"].as_array().unwrap().len(), 50);
    assert_eq!(page2["prev"], format!("{}?page=1", index_url));
    assert_eq!(page2["next"], format!("{}?page=3", index_url));

    let page3 = env.state.pager.render(&index_url, &items, Some(3));
    assert_eq!(page3["orderedItems"].as_array().unwrap().len(), 20);
    assert!(page3.get("next").is_none());
}

#[tokio::test]
async fn entombed_members_keep_their_place_in_pages() {
    let env = instance().await;
    env.state.db.create_local_actor("alice", true).await.unwrap();
    let alice = env.actor_url("alice");
    let server = env.state.config.server.clone();

    let mut numbers = Vec::new();
    for i in 0..3 {
        let mut note = Thing::new_local(ObjectType::Note);
        note.set("actor", alice.as_str(), &server).unwrap();
        note.set("content", format!("post {}", i), &server).unwrap();
        env.state.db.save_new(&mut note).await.unwrap();
        numbers.push(note.number.clone());
    }

    // Entomb the middle one.
    let mut middle = env
        .state
        .db
        .get_by_number(numbers[1].as_str())
        .await
        .unwrap()
        .unwrap();
    middle.entomb().unwrap();
    env.state.db.update(&middle).await.unwrap();

    let things = env.state.db.activities_by_actor(&alice).await.unwrap();
    let items = CollectionPager::forms_for(&things, &server);
    let index_url = env.state.config.server.collection_url("alice", "outbox");
    let page = env.state.pager.render(&index_url, &items, Some(1));

    let ordered = page["orderedItems"].as_array().unwrap();
    assert_eq!(ordered.len(), 3, "the sequence length is stable");
    assert_eq!(
        ordered
            .iter()
            .filter(|item| item["type"] == json!("Tombstone"))
            .count(),
        1
    );
    assert_eq!(
        ordered
            .iter()
            .filter(|item| item["type"] == json!("Note"))
            .count(),
        2
    );
}
