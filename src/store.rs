//! Remote receipt store client.
//!
//! The store is the order backend's document API: it serves pending receipt
//! records for a store, accepts print-status updates, and answers daily
//! aggregate queries. This module defines the `ReceiptStore` seam the
//! polling coordinator works against, plus the authenticated HTTP
//! implementation used in production.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::StoreError;
use crate::receipt::Receipt;

/// Default timeout for store requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Count/total pair returned by the daily aggregate query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
pub struct TallySnapshot {
    pub count: u64,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// The coordinator's view of the remote store.
///
/// `fetch_pending` returns at most `limit` records with status pending,
/// oldest first; an empty batch is a normal result. `mark_done` flips one
/// record pending → done. `aggregate_today` sums count and revenue for
/// records created at or after `since`.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    async fn fetch_pending(&self, store_id: &str, limit: usize)
        -> Result<Vec<Receipt>, StoreError>;

    async fn mark_done(&self, receipt_id: &str) -> Result<(), StoreError>;

    async fn aggregate_today(
        &self,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> Result<TallySnapshot, StoreError>;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the store base URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_store_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Connection-string credentials
// ---------------------------------------------------------------------------

/// Store credentials are distributed to operators as a single opaque
/// connection string: base64url-encoded JSON `{"url": ..., "key": ...}`.
/// Plain JSON is accepted too so local setups stay simple.
fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return serde_json::from_str::<Value>(trimmed).ok();
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded).ok()
}

pub fn extract_api_key_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("key")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
}

pub fn extract_store_url_from_connection_string(raw: &str) -> Option<String> {
    decode_connection_string_payload(raw)
        .and_then(|v| {
            v.get("url")
                .and_then(Value::as_str)
                .map(normalize_store_url)
        })
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a store error with a readable message.
fn friendly_error(url: &str, err: &reqwest::Error) -> StoreError {
    if err.is_connect() {
        return StoreError::Unavailable(format!("cannot reach receipt store at {url}"));
    }
    if err.is_timeout() {
        return StoreError::Unavailable(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return StoreError::Unavailable(format!("invalid store URL: {url}"));
    }
    StoreError::Unavailable(format!("network error communicating with {url}: {err}"))
}

/// Convert a non-success HTTP status into a store error.
fn status_error(status: StatusCode, receipt_id: Option<&str>) -> StoreError {
    match status.as_u16() {
        401 | 403 => StoreError::Auth(format!("store rejected request (HTTP {})", status.as_u16())),
        404 => match receipt_id {
            Some(id) => StoreError::NotFound(id.to_string()),
            None => StoreError::Unavailable("store endpoint not found (HTTP 404)".to_string()),
        },
        s if s >= 500 => StoreError::Unavailable(format!("store server error (HTTP {s})")),
        s => StoreError::Unavailable(format!("unexpected store response (HTTP {s})")),
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Authenticated HTTP client for the order backend's receipt API.
pub struct RemoteReceiptStore {
    client: Client,
    base_url: String,
    api_key: Zeroizing<String>,
}

impl RemoteReceiptStore {
    /// Build a client from a base URL and API key. Either argument may be
    /// the combined connection string; embedded values win over the raw
    /// argument so a pasted connection string works in both fields.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, StoreError> {
        let resolved_url = extract_store_url_from_connection_string(api_key)
            .unwrap_or_else(|| normalize_store_url(base_url));
        let resolved_key =
            extract_api_key_from_connection_string(api_key).unwrap_or_else(|| api_key.to_string());

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: resolved_url,
            api_key: Zeroizing::new(resolved_key),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, path: &str) -> Result<Value, StoreError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("X-Store-API-Key", self.api_key.as_str())
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, None));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| StoreError::Unavailable(format!("invalid JSON from store: {e}")))
    }
}

#[async_trait]
impl ReceiptStore for RemoteReceiptStore {
    async fn fetch_pending(
        &self,
        store_id: &str,
        limit: usize,
    ) -> Result<Vec<Receipt>, StoreError> {
        let path = format!(
            "/api/stores/{store_id}/receipts?status=pending&limit={limit}&sort=createdAt"
        );
        let body = self.get_json(&path).await?;

        let records = body
            .get("receipts")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| body.as_array().cloned())
            .ok_or_else(|| {
                StoreError::Unavailable("unexpected fetch response shape".to_string())
            })?;

        let mut receipts = Vec::with_capacity(records.len());
        for record in records {
            match Receipt::from_value(record) {
                Ok(receipt) => receipts.push(receipt),
                // Quarantine malformed records here; the rest of the batch
                // still prints.
                Err(e) => warn!(error = %e, "skipping malformed receipt record"),
            }
        }
        // Oldest first, regardless of what the server returned.
        receipts.sort_by_key(|r| r.created_at);

        debug!(store_id = store_id, fetched = receipts.len(), "pending receipts fetched");
        Ok(receipts)
    }

    async fn mark_done(&self, receipt_id: &str) -> Result<(), StoreError> {
        let url = format!("{}/api/receipts/{receipt_id}/print-status", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("X-Store-API-Key", self.api_key.as_str())
            .json(&serde_json::json!({ "printStatus": "done" }))
            .send()
            .await
            .map_err(|e| friendly_error(&self.base_url, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, Some(receipt_id)));
        }
        debug!(receipt_id = receipt_id, "receipt marked done");
        Ok(())
    }

    async fn aggregate_today(
        &self,
        store_id: &str,
        since: DateTime<Utc>,
    ) -> Result<TallySnapshot, StoreError> {
        // Z-suffixed so the query string stays free of '+' characters.
        let path = format!(
            "/api/stores/{store_id}/receipts/aggregate?since={}",
            since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        );
        let body = self.get_json(&path).await?;
        serde_json::from_value::<TallySnapshot>(body)
            .map_err(|e| StoreError::Unavailable(format!("invalid aggregate response: {e}")))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_store_url() {
        assert_eq!(
            normalize_store_url("https://orders.example.com/"),
            "https://orders.example.com"
        );
        assert_eq!(
            normalize_store_url("orders.example.com/api/"),
            "https://orders.example.com"
        );
        assert_eq!(
            normalize_store_url("localhost:3000"),
            "http://localhost:3000"
        );
        assert_eq!(
            normalize_store_url("  https://orders.example.com/api  "),
            "https://orders.example.com"
        );
    }

    #[test]
    fn test_connection_string_plain_json() {
        let raw = r#"{"url": "https://orders.example.com", "key": "sk-123"}"#;
        assert_eq!(
            extract_api_key_from_connection_string(raw).as_deref(),
            Some("sk-123")
        );
        assert_eq!(
            extract_store_url_from_connection_string(raw).as_deref(),
            Some("https://orders.example.com")
        );
    }

    #[test]
    fn test_connection_string_base64url() {
        let payload = r#"{"url":"https://orders.example.com/api","key":"sk-456"}"#;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        assert_eq!(
            extract_api_key_from_connection_string(&encoded).as_deref(),
            Some("sk-456")
        );
        assert_eq!(
            extract_store_url_from_connection_string(&encoded).as_deref(),
            Some("https://orders.example.com")
        );
    }

    #[test]
    fn test_connection_string_rejects_garbage() {
        assert!(extract_api_key_from_connection_string("not a key").is_none());
        assert!(extract_api_key_from_connection_string("").is_none());
    }

    #[test]
    fn test_status_error_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, None),
            StoreError::Auth(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, Some("abc")),
            StoreError::NotFound(id) if id == "abc"
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, None),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, None),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_remote_store_resolves_connection_string() {
        let payload = r#"{"url":"https://orders.example.com","key":"sk-789"}"#;
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let encoded = URL_SAFE_NO_PAD.encode(payload);
        let store = RemoteReceiptStore::new("ignored.example.com", &encoded).unwrap();
        assert_eq!(store.base_url(), "https://orders.example.com");
    }

    #[test]
    fn test_tally_snapshot_decodes() {
        let snapshot: TallySnapshot =
            serde_json::from_value(serde_json::json!({"count": 12, "total": 345000})).unwrap();
        assert_eq!(snapshot.count, 12);
        assert_eq!(snapshot.total, 345000);
    }
}
