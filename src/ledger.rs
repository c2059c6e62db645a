//! Remote ledger client.
//!
//! The backing store is a third-party scripting endpoint in front of a
//! spreadsheet: GET queries return JSON, POST writes are fire-and-forget
//! with no consumable response body. [`RemoteLedger`] abstracts that surface
//! so the sync engine can be driven against a mock, and [`DispatchOutcome`]
//! keeps the "write left the building but nobody confirmed it" case
//! first-class instead of folding it into success.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LedgerConfig;
use crate::model::{self, Order, SettlementRecord};
use crate::sheet;

/// Default timeout for read requests.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for fire-and-forget writes. Kept short: a hanging dispatch must
/// not stall a settlement or a checkout notice.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Outcomes and errors
// ---------------------------------------------------------------------------

/// Result of a fire-and-forget write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The endpoint acknowledged receipt (2xx). Remote processing is still
    /// unconfirmed; true confirmation arrives via the next reconciliation
    /// read.
    Accepted,
    /// The write may or may not have arrived (timeout after the request was
    /// sent). Treated as accepted-for-dispatch; the reconciliation read
    /// settles the question.
    Unknown,
    /// The write definitely did not take effect.
    Rejected(String),
}

impl DispatchOutcome {
    /// Whether the write was accepted for dispatch (`Accepted` or
    /// `Unknown`).
    pub fn is_dispatched(&self) -> bool {
        !matches!(self, DispatchOutcome::Rejected(_))
    }
}

/// Failures of the read path.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("cannot reach remote ledger: {0}")]
    Unreachable(String),
    #[error("remote ledger request timed out")]
    Timeout,
    #[error("remote ledger returned HTTP {0}")]
    Status(u16),
    #[error("invalid response from remote ledger: {0}")]
    Malformed(String),
    #[error("{0}")]
    NotConfigured(String),
}

fn request_error(err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout
    } else if err.is_connect() {
        LedgerError::Unreachable("connection failed".to_string())
    } else {
        LedgerError::Unreachable(err.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), LedgerError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(LedgerError::Status(status.as_u16()))
    }
}

// ---------------------------------------------------------------------------
// Read-side payloads
// ---------------------------------------------------------------------------

/// One successful remote read: the full order list plus its ID set.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    pub ids: HashSet<String>,
    pub orders: Vec<Order>,
}

impl RemoteSnapshot {
    pub fn from_orders(orders: Vec<Order>) -> Self {
        let ids = orders
            .iter()
            .map(|o| o.order_id.clone())
            .filter(|id| !id.is_empty())
            .collect();
        Self { ids, orders }
    }
}

/// Login response from the remote endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginOutcome {
    pub success: bool,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// The ledger trait
// ---------------------------------------------------------------------------

/// Everything the client needs from the remote store.
///
/// Reads are fallible; writes report a [`DispatchOutcome`] and never an
/// error, because the transport offers nothing stronger.
#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Full current remote order list (`?action=get`).
    async fn fetch_orders(&self) -> Result<RemoteSnapshot, LedgerError>;

    /// Read-only fallback used when the primary read fails.
    async fn fetch_orders_fallback(&self) -> Result<RemoteSnapshot, LedgerError>;

    /// IDs the remote store already considers settled
    /// (`?action=getSettledOrderIDs`).
    async fn fetch_settled_ids(&self) -> Result<HashSet<String>, LedgerError>;

    /// Operator credential check (`?action=login`).
    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, LedgerError>;

    /// Create-order write (full order payload, no action field).
    async fn submit_order(&self, order: &Order) -> DispatchOutcome;

    /// Soft-delete marker write.
    async fn mark_deleted(
        &self,
        order_id: &str,
        deleted_by: &str,
        deleted_at: &str,
    ) -> DispatchOutcome;

    /// Settlement batch write.
    async fn record_settlement(&self, record: &SettlementRecord) -> DispatchOutcome;
}

// ---------------------------------------------------------------------------
// Wire normalization
// ---------------------------------------------------------------------------

/// Normalize one raw remote order object into an [`Order`].
///
/// Remote rows vary with the client that wrote them: `items` may arrive as a
/// pre-serialized `itemsStr`, old rows lack an `orderID` (derived from the
/// timestamp instead), and deletion markers may be empty strings. Returns
/// `None` for rows too malformed to carry an ID.
pub(crate) fn order_from_wire(mut raw: Value) -> Option<Order> {
    let obj = raw.as_object_mut()?;

    // items fallback: parse the string column when the array is missing
    let items_empty = obj
        .get("items")
        .and_then(Value::as_array)
        .map(|a| a.is_empty())
        .unwrap_or(true);
    if items_empty {
        if let Some(items_str) = obj.get("itemsStr").and_then(Value::as_str) {
            if let Ok(parsed) = serde_json::from_str::<Value>(items_str) {
                obj.insert("items".to_string(), parsed);
            }
        }
    }
    obj.remove("itemsStr");

    // empty-string deletion markers mean "not deleted"
    for key in ["deletedBy", "deletedAt", "promoCode"] {
        if obj.get(key).and_then(Value::as_str).is_some_and(str::is_empty) {
            obj.insert(key.to_string(), Value::Null);
        }
    }

    // orderID backfill from the row timestamp
    let has_id = obj
        .get("orderID")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        let derived = obj
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(model::order_id_from_timestamp)?;
        obj.insert("orderID".to_string(), Value::String(derived));
    }

    let mut order: Order = match serde_json::from_value(raw) {
        Ok(order) => order,
        Err(e) => {
            warn!(error = %e, "skipping malformed remote order row");
            return None;
        }
    };

    if order.order_id.len() <= 5 {
        return None;
    }
    if order.is_deleted() {
        order.deleted = true;
    }
    Some(order)
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// [`RemoteLedger`] over the scripting endpoint, with the spreadsheet
/// visualization query as the read fallback.
pub struct HttpLedger {
    config: LedgerConfig,
    client: Client,
}

impl HttpLedger {
    pub fn new(config: LedgerConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self { config, client })
    }

    async fn get_json(&self, url: &str) -> Result<Value, LedgerError> {
        let resp = self.client.get(url).send().await.map_err(request_error)?;
        check_status(resp.status())?;
        let body = resp.text().await.map_err(request_error)?;
        serde_json::from_str(&body).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    /// Fire-and-forget POST. The response body is never consumed; only the
    /// status line matters.
    async fn dispatch(&self, payload: &Value) -> DispatchOutcome {
        let result = self
            .client
            .post(&self.config.endpoint_url)
            .timeout(DISPATCH_TIMEOUT)
            .json(payload)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => DispatchOutcome::Accepted,
            Ok(resp) => {
                DispatchOutcome::Rejected(format!("remote ledger HTTP {}", resp.status().as_u16()))
            }
            Err(e) if e.is_timeout() => DispatchOutcome::Unknown,
            Err(e) if e.is_connect() => {
                DispatchOutcome::Rejected("cannot reach remote ledger".to_string())
            }
            Err(e) => DispatchOutcome::Rejected(e.to_string()),
        }
    }
}

#[async_trait]
impl RemoteLedger for HttpLedger {
    async fn fetch_orders(&self) -> Result<RemoteSnapshot, LedgerError> {
        let url = format!("{}?action=get", self.config.endpoint_url);
        let data = self.get_json(&url).await?;

        let rows = data
            .get("orders")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let orders: Vec<Order> = rows.into_iter().filter_map(order_from_wire).collect();

        debug!(count = orders.len(), "fetched remote orders");
        Ok(RemoteSnapshot::from_orders(orders))
    }

    async fn fetch_orders_fallback(&self) -> Result<RemoteSnapshot, LedgerError> {
        if !self.config.has_sheet_fallback() {
            return Err(LedgerError::NotConfigured(
                "no spreadsheet fallback configured".to_string(),
            ));
        }

        let url = sheet::visualization_query_url(&self.config.sheet_id, &self.config.sheet_name);
        let resp = self.client.get(&url).send().await.map_err(request_error)?;
        check_status(resp.status())?;
        let body = resp.text().await.map_err(request_error)?;

        let orders = sheet::parse_visualization_response(&body)?;
        debug!(count = orders.len(), "fetched remote orders via sheet fallback");
        Ok(RemoteSnapshot::from_orders(orders))
    }

    async fn fetch_settled_ids(&self) -> Result<HashSet<String>, LedgerError> {
        let url = format!("{}?action=getSettledOrderIDs", self.config.endpoint_url);
        let data = self.get_json(&url).await?;

        let ids = data
            .get("settledOrderIDs")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, LedgerError> {
        let url = format!(
            "{}?action=login&username={}&password={}",
            self.config.endpoint_url,
            percent_encode(username),
            percent_encode(password)
        );
        let data = self.get_json(&url).await?;
        serde_json::from_value(data).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    async fn submit_order(&self, order: &Order) -> DispatchOutcome {
        match serde_json::to_value(order) {
            Ok(payload) => self.dispatch(&payload).await,
            Err(e) => DispatchOutcome::Rejected(format!("serialize order: {e}")),
        }
    }

    async fn mark_deleted(
        &self,
        order_id: &str,
        deleted_by: &str,
        deleted_at: &str,
    ) -> DispatchOutcome {
        let payload = serde_json::json!({
            "action": "delete",
            "orderID": order_id,
            "deletedBy": deleted_by,
            "deletedAt": deleted_at,
        });
        self.dispatch(&payload).await
    }

    async fn record_settlement(&self, record: &SettlementRecord) -> DispatchOutcome {
        match serde_json::to_value(record) {
            Ok(payload) => self.dispatch(&payload).await,
            Err(e) => DispatchOutcome::Rejected(format!("serialize settlement: {e}")),
        }
    }
}

fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_parses_items_str_fallback() {
        let raw = serde_json::json!({
            "orderID": "20260301100000123",
            "timestamp": "2026-03-01T10:00:00+08:00",
            "user": "amy",
            "items": [],
            "itemsStr": "[{\"name\":\"Coffee\",\"price\":50,\"quantity\":2}]",
            "subtotal": 100,
            "total": 100,
        });
        let order = order_from_wire(raw).unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].quantity, 2);
    }

    #[test]
    fn wire_order_derives_missing_id_from_timestamp() {
        let raw = serde_json::json!({
            "timestamp": "2026-03-01T10:00:00.123+00:00",
            "user": "amy",
            "subtotal": 50,
            "total": 50,
        });
        let order = order_from_wire(raw).unwrap();
        assert_eq!(order.order_id, "20260301100000123");
    }

    #[test]
    fn wire_order_without_id_or_timestamp_is_skipped() {
        assert!(order_from_wire(serde_json::json!({ "user": "amy" })).is_none());
        assert!(order_from_wire(serde_json::json!({ "orderID": "123" })).is_none());
    }

    #[test]
    fn wire_order_normalizes_deletion_markers() {
        let raw = serde_json::json!({
            "orderID": "20260301100000123",
            "timestamp": "2026-03-01T10:00:00+08:00",
            "deletedBy": "",
            "deletedAt": "",
        });
        let order = order_from_wire(raw).unwrap();
        assert!(!order.is_deleted());
        assert_eq!(order.deleted_by, None);

        let raw = serde_json::json!({
            "orderID": "20260301100000124",
            "deletedBy": "ben",
            "deletedAt": "2026-03-01T11:00:00+08:00",
        });
        let order = order_from_wire(raw).unwrap();
        assert!(order.deleted);
    }

    #[test]
    fn snapshot_collects_ids() {
        let orders = vec![
            Order {
                order_id: "a".repeat(18),
                ..Default::default()
            },
            Order {
                order_id: "b".repeat(18),
                ..Default::default()
            },
        ];
        let snapshot = RemoteSnapshot::from_orders(orders);
        assert_eq!(snapshot.ids.len(), 2);
        assert!(snapshot.ids.contains(&"a".repeat(18)));
    }

    #[test]
    fn percent_encode_escapes_reserved_bytes() {
        assert_eq!(percent_encode("amy"), "amy");
        assert_eq!(percent_encode("a b&c"), "a%20b%26c");
    }

    #[test]
    fn rejected_is_not_dispatched() {
        assert!(DispatchOutcome::Accepted.is_dispatched());
        assert!(DispatchOutcome::Unknown.is_dispatched());
        assert!(!DispatchOutcome::Rejected("x".to_string()).is_dispatched());
    }
}
