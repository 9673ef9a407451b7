//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Verification fails closed: an unparseable header, unknown algorithm,
//! unresolvable key, stale Date, digest mismatch, or cryptographic
//! failure all reject the request, and the caller must not proceed to
//! ingestion.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::{RsaPublicKey, pkcs1v15::Signature as Pkcs1v15Signature};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use crate::error::AppError;

/// Resolves a signature `keyId` to a PEM-encoded public key.
///
/// The production implementation is the TTL'd key cache backed by
/// actor-document fetch; tests substitute a static map. Resolution
/// failures propagate unchanged so the caller can distinguish a
/// retryable fetch failure from a cryptographic rejection.
pub trait KeyResolver: Send + Sync {
    fn resolve<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<String, AppError>>;
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| {
            AppError::Fetch(crate::error::FetchFailure::RemoteError(format!(
                "failed to resolve actor host: {}",
                e
            )))
        })?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Validation(format!(
                "actor host {} resolves to a disallowed address",
                normalized
            )));
        }
    }

    if !resolved_any {
        return Err(AppError::Fetch(crate::error::FetchFailure::RemoteError(
            "no DNS records for actor host".to_string(),
        )));
    }

    Ok(())
}

/// Extract and validate the remote actor domain from an actor URL or
/// key ID URL.
///
/// This rejects non-HTTP(S) URLs and obvious local/private hosts.
pub fn extract_actor_domain(actor_or_key_id: &str) -> Result<String, AppError> {
    let actor_url = actor_or_key_id.split('#').next().unwrap_or(actor_or_key_id);
    let parsed = url::Url::parse(actor_url)
        .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported actor URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in actor URL".to_string()))?
        .to_ascii_lowercase();

    if is_disallowed_host(&host) {
        return Err(AppError::Validation(format!(
            "actor host {} is not allowed",
            host
        )));
    }

    Ok(host)
}

/// Headers to add for a signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Signature header value
    pub signature: String,
    /// Date header value (RFC 2616)
    pub date: String,
    /// Digest header value (if body present)
    pub digest: Option<String>,
}

/// Sign an HTTP request
///
/// Creates the HTTP Signature header for an outgoing request. The
/// signing string is the newline-joined `lower(header-name): value`
/// lines, with `(request-target)` synthesized as `"<method> <path>"`.
///
/// # Arguments
/// * `method` - HTTP method (e.g., "POST")
/// * `url` - Full URL being requested
/// * `body` - Request body (for digest)
/// * `private_key_pem` - RSA private key in PEM format
/// * `key_id` - Full URL to the public key (actor#main-key)
///
/// # Returns
/// Headers to add: Signature, Date, Digest (if body present)
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    private_key_pem: &str,
    key_id: &str,
) -> Result<SignatureHeaders, AppError> {
    // 1. Parse URL to get host and path
    let parsed_url =
        url::Url::parse(url).map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in URL".to_string()))?;

    let path = parsed_url.path();
    let query = parsed_url.query();
    let path_and_query = if let Some(q) = query {
        format!("{}?{}", path, q)
    } else {
        path.to_string()
    };

    // 2. Generate Date header (RFC 2822 format)
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

    // 3. Generate Digest if body present
    let digest = body.map(generate_digest);

    // 4. Build signing string
    let request_target = format!("{} {}", method.to_lowercase(), path_and_query);

    let mut signing_parts = vec![
        format!("(request-target): {}", request_target),
        format!("host: {}", host),
        format!("date: {}", date),
    ];

    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signing_string = signing_parts.join("\n");

    // 5. Sign with RSA-SHA256
    use rsa::pkcs8::DecodePrivateKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};

    let private_key = rsa::RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| AppError::Validation(format!("Invalid private key: {}", e)))?;

    let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new_unprefixed(private_key);
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    // 6. Build Signature header
    let signature_header = format!(
        "keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
        key_id,
        headers_list.join(" "),
        signature_b64
    );

    Ok(SignatureHeaders {
        signature: signature_header,
        date,
        digest,
    })
}

/// Verify an inbound signed request and identify its sender.
///
/// # Arguments
/// * `method` - HTTP method
/// * `path` - Request path
/// * `headers` - All request headers
/// * `body` - Request body (for digest verification)
/// * `resolver` - Maps the signature keyId to a public key PEM
/// * `max_skew_secs` - Maximum tolerated Date header skew
///
/// # Returns
/// The verified actor URI (the keyId with its fragment stripped).
///
/// # Errors
/// - `SignatureInvalid` on any verification failure
/// - Resolver failures pass through (e.g. a retryable key fetch error)
pub async fn verify_request(
    method: &str,
    path: &str,
    headers: &http::HeaderMap,
    body: Option<&[u8]>,
    resolver: &dyn KeyResolver,
    max_skew_secs: i64,
) -> Result<String, AppError> {
    // 1. Parse Signature header
    let signature_header = headers
        .get("signature")
        .ok_or_else(|| AppError::SignatureInvalid("missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| AppError::SignatureInvalid("unreadable Signature header".to_string()))?;

    let parsed = parse_signature_header(signature_header)?;

    // 2. Validate algorithm and required signed headers.
    if parsed.algorithm != "rsa-sha256" && parsed.algorithm != "hs2019" {
        return Err(AppError::SignatureInvalid(format!(
            "unsupported algorithm: {}",
            parsed.algorithm
        )));
    }

    for required in ["(request-target)", "host", "date"] {
        if !parsed.headers.iter().any(|h| h == required) {
            return Err(AppError::SignatureInvalid(format!(
                "signed headers must include {}",
                required
            )));
        }
    }

    if body.is_some() && !parsed.headers.iter().any(|h| h == "digest") {
        return Err(AppError::SignatureInvalid(
            "signed headers must include digest".to_string(),
        ));
    }

    // 3. Verify the Date header is within the allowed skew.
    let date_str = header_value(headers, "date")?;
    let date = DateTime::parse_from_rfc2822(&date_str)
        .map_err(|_| AppError::SignatureInvalid("invalid Date format".to_string()))?;

    let skew = (Utc::now().timestamp() - date.timestamp()).abs();
    if skew > max_skew_secs {
        return Err(AppError::SignatureInvalid(
            "Date header too old or in future".to_string(),
        ));
    }

    // 4. If a body is present, verify the Digest.
    if let Some(body_data) = body {
        let digest_str = header_value(headers, "digest")?;
        if digest_str != generate_digest(body_data) {
            return Err(AppError::SignatureInvalid("digest mismatch".to_string()));
        }
    }

    // 5. Reconstruct the canonical signing string.
    let mut signing_parts = Vec::new();

    for header_name in &parsed.headers {
        let value = match header_name.as_str() {
            "(request-target)" => format!("{} {}", method.to_lowercase(), path),
            name => header_value(headers, name)?,
        };

        signing_parts.push(format!("{}: {}", header_name, value));
    }

    let signing_string = signing_parts.join("\n");

    // 6. Resolve the public key; fetch failures propagate unchanged so
    //    callers can park the request and retry later.
    let public_key_pem = resolver.resolve(&parsed.key_id).await?;

    // 7. Verify the RSA signature.
    let signature_bytes = BASE64
        .decode(&parsed.signature)
        .map_err(|_| AppError::SignatureInvalid("invalid signature encoding".to_string()))?;

    let public_key = RsaPublicKey::from_public_key_pem(&public_key_pem)
        .map_err(|e| AppError::SignatureInvalid(format!("invalid public key: {}", e)))?;

    // Use the unprefixed verifier for compatibility.
    let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new_unprefixed(public_key);

    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| AppError::SignatureInvalid(format!("invalid signature format: {}", e)))?;

    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| AppError::SignatureInvalid("signature verification failed".to_string()))?;

    // 8. The signer is the key's owning actor.
    let actor_uri = parsed
        .key_id
        .split('#')
        .next()
        .unwrap_or(&parsed.key_id)
        .to_string();

    Ok(actor_uri)
}

fn header_value(headers: &http::HeaderMap, name: &str) -> Result<String, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::SignatureInvalid(format!("missing {} header", name)))?
        .to_str()
        .map(str::to_string)
        .map_err(|_| AppError::SignatureInvalid(format!("unreadable {} header", name)))
}

/// Extract keyId from the Signature header.
pub fn extract_signature_key_id(headers: &http::HeaderMap) -> Result<String, AppError> {
    let signature_header = headers
        .get("signature")
        .ok_or_else(|| AppError::SignatureInvalid("missing Signature header".to_string()))?
        .to_str()
        .map_err(|_| AppError::SignatureInvalid("unreadable Signature header".to_string()))?;

    let parsed = parse_signature_header(signature_header)?;
    Ok(parsed.key_id)
}

/// Validate that a signature keyId points to the same actor as the
/// activity's actor field.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parsed Signature header
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse a Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    // Split by comma and parse key=value pairs
    for part in header.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            // Remove quotes from value
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id
            .ok_or_else(|| AppError::SignatureInvalid("missing keyId".to_string()))?,
        algorithm: algorithm
            .ok_or_else(|| AppError::SignatureInvalid("missing algorithm".to_string()))?,
        headers: headers
            .ok_or_else(|| AppError::SignatureInvalid("missing headers".to_string()))?,
        signature: signature
            .ok_or_else(|| AppError::SignatureInvalid("missing signature".to_string()))?,
    })
}

/// Generate SHA-256 digest for a body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Fetch a public key from its key ID URL
///
/// Resolves DNS first and rejects local/private destinations to reduce
/// SSRF risk for hosts that look public but resolve internally.
///
/// # Arguments
/// * `key_id` - Full URL to the key (e.g., actor#main-key)
/// * `http_client` - HTTP client
///
/// # Returns
/// PEM-encoded public key
pub async fn fetch_public_key(
    key_id: &str,
    http_client: &reqwest::Client,
) -> Result<String, AppError> {
    // Validate actor URL/domain and extract the actor document URL.
    let actor_domain = extract_actor_domain(key_id)?;
    let actor_url = key_id.split('#').next().unwrap_or(key_id);
    let parsed_actor_url = url::Url::parse(actor_url)
        .map_err(|e| AppError::Validation(format!("Invalid actor URL: {}", e)))?;
    let actor_port = parsed_actor_url
        .port_or_known_default()
        .ok_or_else(|| AppError::Validation("Missing port in actor URL".to_string()))?;

    validate_resolved_host_ips(&actor_domain, actor_port).await?;

    // Fetch the actor document
    let response = http_client
        .get(actor_url)
        .header("Accept", "application/activity+json")
        .send()
        .await
        .map_err(|e| {
            AppError::Fetch(crate::error::FetchFailure::RemoteError(format!(
                "failed to fetch actor: {}",
                e
            )))
        })?;

    if !response.status().is_success() {
        return Err(AppError::Fetch(crate::error::FetchFailure::RemoteError(
            format!("failed to fetch actor: HTTP {}", response.status()),
        )));
    }

    let actor: serde_json::Value = response.json().await.map_err(|e| {
        AppError::Fetch(crate::error::FetchFailure::RemoteError(format!(
            "failed to parse actor: {}",
            e
        )))
    })?;

    let public_key = actor
        .get("publicKey")
        .ok_or_else(|| AppError::SignatureInvalid("actor has no publicKey".to_string()))?;

    // If a key fragment is provided, ensure the actor advertises exactly
    // that key id.
    if key_id.contains('#') {
        let advertised_key_id = public_key
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| AppError::SignatureInvalid("actor has no publicKey.id".to_string()))?;

        if advertised_key_id != key_id {
            return Err(AppError::SignatureInvalid(
                "keyId does not match actor public key id".to_string(),
            ));
        }
    }

    let public_key_pem = public_key
        .get("publicKeyPem")
        .and_then(|pem| pem.as_str())
        .ok_or_else(|| AppError::SignatureInvalid("actor has no publicKeyPem".to_string()))?;

    Ok(public_key_pem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use std::collections::HashMap;

    const MAX_SKEW: i64 = 300;

    /// Key resolver backed by a static map, no network involved.
    struct StaticKeys(HashMap<String, String>);

    impl KeyResolver for StaticKeys {
        fn resolve<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<String, AppError>> {
            Box::pin(async move {
                self.0.get(key_id).cloned().ok_or_else(|| {
                    AppError::Fetch(crate::error::FetchFailure::RemoteError(
                        "unknown key".to_string(),
                    ))
                })
            })
        }
    }

    fn generate_test_keypair() -> (String, String) {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work");
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("private key pem")
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .expect("public key pem");

        (private_key_pem, public_key_pem)
    }

    const TEST_KEY_ID: &str = "https://remote.example/users/fred#main-key";

    fn resolver_for(public_key_pem: &str) -> StaticKeys {
        StaticKeys(HashMap::from([(
            TEST_KEY_ID.to_string(),
            public_key_pem.to_string(),
        )]))
    }

    fn build_signed_header_map(
        method: &str,
        url: &str,
        body: Option<&[u8]>,
        private_key_pem: &str,
    ) -> (HeaderMap, String) {
        let signed = sign_request(method, url, body, private_key_pem, TEST_KEY_ID).expect("signed");
        let parsed_url = url::Url::parse(url).expect("valid test url");
        let host = parsed_url.host_str().expect("host");
        let path = parsed_url.path();
        let path_and_query = if let Some(query) = parsed_url.query() {
            format!("{}?{}", path, query)
        } else {
            path.to_string()
        };

        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_str(host).expect("host header"));
        headers.insert(
            "date",
            HeaderValue::from_str(&signed.date).expect("date header"),
        );
        if let Some(digest) = signed.digest {
            headers.insert(
                "digest",
                HeaderValue::from_str(&digest).expect("digest header"),
            );
        }
        headers.insert(
            "signature",
            HeaderValue::from_str(&signed.signature).expect("signature header"),
        );

        (headers, path_and_query)
    }

    #[tokio::test]
    async fn verify_request_accepts_valid_signature_and_returns_actor() {
        let (private_key_pem, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox?foo=bar",
            Some(body),
            &private_key_pem,
        );

        let actor = verify_request(
            "POST",
            &path,
            &headers,
            Some(body),
            &resolver_for(&public_key_pem),
            MAX_SKEW,
        )
        .await
        .expect("valid signature should verify");

        assert_eq!(actor, "https://remote.example/users/fred");
    }

    #[tokio::test]
    async fn verify_request_rejects_tampered_body() {
        let (private_key_pem, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );

        let tampered = br#"{"type":"Delete"}"#;
        let result = verify_request(
            "POST",
            &path,
            &headers,
            Some(tampered),
            &resolver_for(&public_key_pem),
            MAX_SKEW,
        )
        .await;

        match result {
            Err(AppError::SignatureInvalid(msg)) => assert!(msg.contains("digest")),
            other => panic!("expected digest mismatch, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_request_rejects_wrong_key() {
        let (private_key_pem, _) = generate_test_keypair();
        let (_, other_public_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );

        let result = verify_request(
            "POST",
            &path,
            &headers,
            Some(body),
            &resolver_for(&other_public_pem),
            MAX_SKEW,
        )
        .await;

        match result {
            Err(AppError::SignatureInvalid(msg)) => {
                assert!(msg.contains("verification failed"))
            }
            other => panic!("expected verification failure, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_request_rejects_missing_date_header() {
        let (private_key_pem, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );
        headers.remove("date");

        let result = verify_request(
            "POST",
            &path,
            &headers,
            Some(body),
            &resolver_for(&public_key_pem),
            MAX_SKEW,
        )
        .await;

        match result {
            Err(AppError::SignatureInvalid(msg)) => assert!(msg.contains("date")),
            other => panic!("expected missing Date error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_request_rejects_stale_date() {
        let (private_key_pem, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );
        headers.insert(
            "date",
            HeaderValue::from_static("Tue, 05 Aug 2014 10:00:00 GMT"),
        );

        let result = verify_request(
            "POST",
            &path,
            &headers,
            Some(body),
            &resolver_for(&public_key_pem),
            MAX_SKEW,
        )
        .await;

        match result {
            Err(AppError::SignatureInvalid(msg)) => assert!(msg.contains("too old")),
            other => panic!("expected stale date rejection, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_request_rejects_unknown_algorithm() {
        let (private_key_pem, public_key_pem) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (mut headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );

        let original = headers.get("signature").unwrap().to_str().unwrap();
        let tampered = original.replace("rsa-sha256", "md5-nonsense");
        headers.insert("signature", HeaderValue::from_str(&tampered).unwrap());

        let result = verify_request(
            "POST",
            &path,
            &headers,
            Some(body),
            &resolver_for(&public_key_pem),
            MAX_SKEW,
        )
        .await;

        match result {
            Err(AppError::SignatureInvalid(msg)) => assert!(msg.contains("algorithm")),
            other => panic!("expected algorithm rejection, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn verify_request_propagates_resolver_failures() {
        let (private_key_pem, _) = generate_test_keypair();
        let body = br#"{"type":"Follow"}"#;
        let (headers, path) = build_signed_header_map(
            "POST",
            "https://local.example/inbox",
            Some(body),
            &private_key_pem,
        );

        let empty = StaticKeys(HashMap::new());
        let result = verify_request("POST", &path, &headers, Some(body), &empty, MAX_SKEW).await;

        assert!(matches!(
            result,
            Err(AppError::Fetch(crate::error::FetchFailure::RemoteError(_)))
        ));
    }

    #[test]
    fn extract_actor_domain_rejects_localhost_and_private_hosts() {
        assert!(extract_actor_domain("https://localhost/users/alice#main-key").is_err());
        assert!(extract_actor_domain("http://192.168.1.10/users/alice#main-key").is_err());

        let domain = extract_actor_domain("https://example.com/users/alice#main-key")
            .expect("public host should be accepted");
        assert_eq!(domain, "example.com");
    }

    #[tokio::test]
    async fn validate_resolved_host_ips_rejects_loopback() {
        assert!(validate_resolved_host_ips("127.0.0.1", 80).await.is_err());
    }

    #[test]
    fn extract_signature_key_id_reads_key_id() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "signature",
            HeaderValue::from_static(
                "keyId=\"https://remote.example/users/fred#main-key\",algorithm=\"rsa-sha256\",headers=\"(request-target) host date\",signature=\"ZmFrZQ==\"",
            ),
        );

        let key_id = extract_signature_key_id(&headers).expect("keyId should be parsed");
        assert_eq!(key_id, "https://remote.example/users/fred#main-key");
    }

    #[test]
    fn key_id_matches_actor_compares_without_fragment() {
        assert!(key_id_matches_actor(
            "https://remote.example/users/fred#main-key",
            "https://remote.example/users/fred",
        ));
        assert!(!key_id_matches_actor(
            "https://remote.example/users/jim#main-key",
            "https://remote.example/users/fred",
        ));
    }
}
