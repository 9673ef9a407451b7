//! Collection serialization
//!
//! Turns an ordered sequence of rendered objects into ActivityPub
//! `OrderedCollection` / `OrderedCollectionPage` documents. Page
//! boundaries, prev/next links, and total counts are load-bearing for
//! federation interoperability, so the rules here are exact:
//!
//! - no page requested: a summary with `totalItems` and `first`
//!   (omitted when empty)
//! - page `p`: the slice `[(p-1)*size, p*size)`, `prev` iff `p > 1`,
//!   `next` iff `p < ceil(total/size)`
//!
//! A tombstoned item renders as its Tombstone form rather than being
//! excluded, keeping the sequence length stable across pages.

use serde_json::{Map, Value, json};

use crate::config::ServerConfig;
use crate::data::Thing;

const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// Renders collection documents at a fixed page size.
#[derive(Debug, Clone)]
pub struct CollectionPager {
    page_size: usize,
}

impl CollectionPager {
    /// Page size is fixed per deployment (reference value: 50).
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    /// Render the sequence of things backing a collection.
    ///
    /// Entombed members come back in Tombstone form, in place.
    pub fn forms_for(things: &[Thing], server: &ServerConfig) -> Vec<Value> {
        things
            .iter()
            .map(|thing| thing.activity_form(server))
            .collect()
    }

    /// Render a collection document.
    ///
    /// # Arguments
    /// * `index_url` - the collection's bare URL
    /// * `items` - the full ordered sequence, already rendered
    /// * `page` - `None` for the summary, or the 1-based page number
    pub fn render(&self, index_url: &str, items: &[Value], page: Option<usize>) -> Value {
        match page {
            None => self.render_index(index_url, items.len()),
            Some(page) => self.render_page(index_url, items, page.max(1)),
        }
    }

    fn page_url(index_url: &str, page: usize) -> String {
        format!("{}?page={}", index_url, page)
    }

    fn render_index(&self, index_url: &str, total: usize) -> Value {
        let mut doc = Map::new();
        doc.insert("@context".to_string(), json!(AS_CONTEXT));
        doc.insert("id".to_string(), json!(index_url));
        doc.insert("type".to_string(), json!("OrderedCollection"));
        doc.insert("totalItems".to_string(), json!(total));

        if total > 0 {
            doc.insert("first".to_string(), json!(Self::page_url(index_url, 1)));
        }

        Value::Object(doc)
    }

    fn render_page(&self, index_url: &str, items: &[Value], page: usize) -> Value {
        let total = items.len();
        let last_page = total.div_ceil(self.page_size);

        let start = (page - 1).saturating_mul(self.page_size).min(total);
        let end = (start + self.page_size).min(total);

        let mut doc = Map::new();
        doc.insert("@context".to_string(), json!(AS_CONTEXT));
        doc.insert("id".to_string(), json!(Self::page_url(index_url, page)));
        doc.insert("type".to_string(), json!("OrderedCollectionPage"));
        doc.insert("totalItems".to_string(), json!(total));
        doc.insert("partOf".to_string(), json!(index_url));
        doc.insert("orderedItems".to_string(), json!(items[start..end]));

        if page > 1 {
            doc.insert(
                "prev".to_string(),
                json!(Self::page_url(index_url, page - 1)),
            );
        }
        if page < last_page {
            doc.insert(
                "next".to_string(),
                json!(Self::page_url(index_url, page + 1)),
            );
        }

        Value::Object(doc)
    }
}
