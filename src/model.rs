//! Order data model and wire types for Darkroom POS.
//!
//! Everything that crosses the remote ledger boundary lives here: the
//! canonical [`Order`] record, local [`SettlementBatch`] archive entries,
//! and the [`SettlementRecord`] aggregate payload. Wire fields use the
//! camelCase names the scripting endpoint expects.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use uuid::Uuid;

/// Grace period after a local submission during which absence from the
/// remote snapshot is not treated as a sync failure.
pub const SUBMISSION_GRACE_WINDOW_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Session-scoped random tag appended to generated order IDs so that two
/// devices submitting within the same millisecond cannot collide.
pub fn device_tag() -> &'static str {
    static TAG: OnceLock<String> = OnceLock::new();
    TAG.get_or_init(|| Uuid::new_v4().simple().to_string()[..6].to_string())
}

/// Millisecond-resolution timestamp digits, `YYYYMMDDHHMMSSmmm`.
///
/// Lexicographic order of these digits matches submission order, which the
/// history view relies on for stable sorting.
pub fn timestamp_digits<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format("%Y%m%d%H%M%S%3f").to_string()
}

/// Generate a new order ID: timestamp digits plus the session device tag.
pub fn new_order_id<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}", timestamp_digits(at), device_tag())
}

/// Generate a settlement batch ID (`S-` prefix, same tail as order IDs).
pub fn new_settlement_id<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("S-{}-{}", timestamp_digits(at), device_tag())
}

/// Derive an order ID from a stored RFC 3339 timestamp.
///
/// Remote rows written by older clients carry no explicit `orderID`; those
/// clients derived it from the row timestamp, so we do the same when
/// backfilling.
pub fn order_id_from_timestamp(timestamp: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(timestamp)
        .ok()
        .map(|dt| timestamp_digits(&dt))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// A single cart line frozen into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderItem {
    pub name: String,
    pub price: i64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_options: Option<String>,
}

impl OrderItem {
    pub fn line_total(&self) -> i64 {
        self.price * self.quantity as i64
    }
}

/// The canonical order record.
///
/// Amounts are whole currency units. Invariants maintained by the checkout
/// pipeline: `total == max(0, subtotal - discount_amount)`,
/// `received_amount == sum(payment_amounts)`,
/// `change_amount == max(0, received_amount - total)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    #[serde(rename = "orderID")]
    pub order_id: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    /// Operator who created the order.
    pub user: String,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub discount_amount: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo_code: Option<String>,
    /// Tendered amount per payment method. BTreeMap keeps method ordering
    /// deterministic on the wire and in receipts.
    pub payment_amounts: BTreeMap<String, i64>,
    /// Summary method string (`cash`, or `cash+card` for splits). The
    /// spreadsheet fallback has a single payment column, so this is what
    /// survives a round trip through it.
    pub payment_method: String,
    pub received_amount: i64,
    pub change_amount: i64,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<String>,
}

impl Order {
    /// Soft-delete marker check. Remote rows carry only `deletedAt`, so a
    /// non-empty marker counts even when the boolean flag was never set.
    pub fn is_deleted(&self) -> bool {
        self.deleted || self.deleted_at.as_deref().is_some_and(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// A finalized group of orders removed from the active set, kept locally
/// for audit and statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SettlementBatch {
    pub id: String,
    /// RFC 3339 settlement time.
    pub timestamp: String,
    pub orders: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SettlementBatch {
    /// IDs of every order in this batch.
    pub fn order_ids(&self) -> impl Iterator<Item = &str> {
        self.orders.iter().map(|o| o.order_id.as_str())
    }
}

/// Union of order IDs across all archive batches. The reconciliation merge
/// excludes these from any remote-sourced insert.
pub fn archived_ids(archives: &[SettlementBatch]) -> HashSet<String> {
    archives
        .iter()
        .flat_map(|batch| batch.order_ids().map(str::to_string))
        .collect()
}

/// Aggregate settlement payload sent to the remote ledger.
///
/// Built by an explicit constructor from the batch being settled; there is
/// no shared computation cache between settlement and its preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub action: String,
    pub batch_id: String,
    pub user: String,
    /// Orders in the batch, deleted ones included.
    pub count: usize,
    pub subtotal_sum: i64,
    pub discount_sum: i64,
    pub total_sum: i64,
    pub change_sum: i64,
    pub note: String,
    pub orders: Vec<Order>,
    /// Name-sorted `[name, units]` pairs over non-deleted orders.
    pub product_counts: Vec<(String, i64)>,
    /// Tendered totals per payment method over non-deleted orders.
    pub payment_totals: BTreeMap<String, i64>,
}

impl SettlementRecord {
    /// Compute batch aggregates. Soft-deleted orders stay in `orders` for
    /// audit but contribute nothing to the sums or product counts.
    pub fn build(batch_id: String, user: &str, orders: Vec<Order>, note: &str) -> Self {
        let mut subtotal_sum = 0;
        let mut discount_sum = 0;
        let mut total_sum = 0;
        let mut change_sum = 0;
        let mut product_counts: BTreeMap<String, i64> = BTreeMap::new();
        let mut payment_totals: BTreeMap<String, i64> = BTreeMap::new();

        for order in orders.iter().filter(|o| !o.is_deleted()) {
            subtotal_sum += order.subtotal;
            discount_sum += order.discount_amount;
            total_sum += order.total;
            change_sum += order.change_amount;
            for item in &order.items {
                *product_counts.entry(item.name.clone()).or_insert(0) += item.quantity as i64;
            }
            for (method, amount) in &order.payment_amounts {
                *payment_totals.entry(method.clone()).or_insert(0) += amount;
            }
        }

        Self {
            action: "settlement".to_string(),
            batch_id,
            user: user.to_string(),
            count: orders.len(),
            subtotal_sum,
            discount_sum,
            total_sum,
            change_sum,
            note: note.to_string(),
            orders,
            product_counts: product_counts.into_iter().collect(),
            payment_totals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn order(id: &str, subtotal: i64, discount: i64, deleted: bool) -> Order {
        Order {
            order_id: id.to_string(),
            timestamp: "2026-03-01T10:00:00+08:00".to_string(),
            user: "amy".to_string(),
            items: vec![OrderItem {
                name: "Coffee".to_string(),
                price: subtotal,
                quantity: 1,
                custom_options: None,
            }],
            subtotal,
            discount_amount: discount,
            total: (subtotal - discount).max(0),
            payment_amounts: BTreeMap::from([("cash".to_string(), subtotal)]),
            payment_method: "cash".to_string(),
            received_amount: subtotal,
            change_amount: discount,
            deleted,
            ..Default::default()
        }
    }

    #[test]
    fn timestamp_digits_sort_in_submission_order() {
        let a = Utc.with_ymd_and_hms(2026, 3, 1, 9, 59, 59).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        assert!(timestamp_digits(&a) < timestamp_digits(&b));
        assert_eq!(timestamp_digits(&a).len(), 17);
    }

    #[test]
    fn order_ids_carry_device_tag() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let id = new_order_id(&now);
        assert!(id.starts_with("20260301100000000-"));
        assert_eq!(id.split('-').nth(1).unwrap().len(), 6);
        assert!(new_settlement_id(&now).starts_with("S-20260301100000000-"));
    }

    #[test]
    fn order_id_from_timestamp_matches_digit_format() {
        let id = order_id_from_timestamp("2026-03-01T10:00:00.123+00:00").unwrap();
        assert_eq!(id, "20260301100000123");
        assert!(order_id_from_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn wire_roundtrip_preserves_order_id_key() {
        let o = order("20260301100000123-abc123", 180, 18, false);
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["orderID"], "20260301100000123-abc123");
        assert_eq!(json["discountAmount"], 18);
        let back: Order = serde_json::from_value(json).unwrap();
        assert_eq!(back, o);
    }

    #[test]
    fn deleted_at_marker_implies_deleted() {
        let mut o = order("x", 50, 0, false);
        assert!(!o.is_deleted());
        o.deleted_at = Some("2026-03-01T11:00:00+08:00".to_string());
        assert!(o.is_deleted());
        o.deleted_at = Some(String::new());
        assert!(!o.is_deleted());
    }

    #[test]
    fn settlement_record_skips_deleted_orders_in_sums() {
        let orders = vec![
            order("a", 100, 10, false),
            order("b", 200, 0, false),
            order("c", 400, 0, true),
        ];
        let record = SettlementRecord::build("S-1".to_string(), "amy", orders, "");
        assert_eq!(record.count, 3);
        assert_eq!(record.subtotal_sum, 300);
        assert_eq!(record.discount_sum, 10);
        assert_eq!(record.total_sum, 290);
        assert_eq!(record.product_counts, vec![("Coffee".to_string(), 2)]);
        assert_eq!(record.payment_totals.get("cash"), Some(&300));
    }

    #[test]
    fn archived_ids_spans_all_batches() {
        let batches = vec![
            SettlementBatch {
                id: "S-1".to_string(),
                timestamp: String::new(),
                orders: vec![order("a", 1, 0, false)],
                note: None,
            },
            SettlementBatch {
                id: "S-2".to_string(),
                timestamp: String::new(),
                orders: vec![order("b", 1, 0, false), order("c", 1, 0, true)],
                note: None,
            },
        ];
        let ids = archived_ids(&batches);
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("b"));
    }
}
