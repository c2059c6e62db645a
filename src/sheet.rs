//! Spreadsheet visualization-query fallback.
//!
//! When the scripting endpoint is unreachable the order sheet can still be
//! read through the document's visualization query, which wraps a JSON
//! payload in a JavaScript call. Columns are positional:
//!
//! | 0 | timestamp | 1 | orderID | 2 | user | 3 | items (JSON string) |
//! | 4 | subtotal | 5 | discount | 6 | total | 7 | payment method |
//! | 8 | promo | 9 | deletedBy | 10 | deletedAt |
//!
//! The first row is the sheet header and is skipped. Settled-ID information
//! is not available on this path; callers reconcile with an empty settled
//! set.

use serde_json::Value;
use tracing::warn;

use crate::ledger::LedgerError;
use crate::model::{self, Order, OrderItem};

/// Visualization query URL for a sheet tab.
pub fn visualization_query_url(sheet_id: &str, sheet_name: &str) -> String {
    let encoded_name: String = sheet_name
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~' {
                (b as char).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    format!(
        "https://docs.google.com/spreadsheets/d/{sheet_id}/gviz/tq?tqx=out:json&sheet={encoded_name}"
    )
}

/// Parse the wrapped response body into orders.
///
/// The JSON object is extracted between the first `{` and the last `}`;
/// anything else around it (the `google.visualization.Query.setResponse`
/// call, comment guards) is ignored.
pub fn parse_visualization_response(body: &str) -> Result<Vec<Order>, LedgerError> {
    let start = body.find('{');
    let end = body.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(LedgerError::Malformed(
            "unexpected visualization query response".to_string(),
        ));
    };

    let data: Value = serde_json::from_str(&body[start..=end])
        .map_err(|e| LedgerError::Malformed(format!("visualization JSON: {e}")))?;

    let rows = data
        .pointer("/table/rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    // First row is the sheet header.
    let orders = rows
        .iter()
        .skip(1)
        .filter_map(parse_row)
        .collect::<Vec<_>>();
    Ok(orders)
}

fn parse_row(row: &Value) -> Option<Order> {
    let cells = row.get("c").and_then(Value::as_array)?;

    let timestamp = cell_str(cells, 0).unwrap_or_default();
    let order_id = cell_str(cells, 1)
        .filter(|id| !id.is_empty())
        .or_else(|| model::order_id_from_timestamp(&timestamp))?;
    if order_id.len() <= 5 {
        return None;
    }

    let items = cell_str(cells, 3)
        .and_then(|raw| match serde_json::from_str::<Vec<OrderItem>>(&raw) {
            Ok(items) => Some(items),
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "unparsable items column");
                None
            }
        })
        .unwrap_or_default();

    let subtotal = cell_num(cells, 4);
    let discount_amount = cell_num(cells, 5);
    let total = cell_num(cells, 6);
    let payment_method = cell_str(cells, 7)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "cash".to_string());
    let promo_code = cell_str(cells, 8).filter(|p| !p.is_empty());
    let deleted_by = cell_str(cells, 9).filter(|d| !d.is_empty());
    let deleted_at = cell_str(cells, 10).filter(|d| !d.is_empty());
    let deleted = deleted_at.is_some();

    Some(Order {
        order_id,
        timestamp,
        user: cell_str(cells, 2).unwrap_or_default(),
        items,
        subtotal,
        discount_amount,
        total,
        promo_code,
        // The sheet has a single payment column and no tender detail; the
        // split map stays empty so a merge never clobbers richer local data.
        payment_amounts: Default::default(),
        payment_method,
        received_amount: 0,
        change_amount: 0,
        deleted,
        deleted_by,
        deleted_at,
    })
}

fn cell_str(cells: &[Value], index: usize) -> Option<String> {
    let v = cells.get(index)?.get("v")?;
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn cell_num(cells: &[Value], index: usize) -> i64 {
    let Some(v) = cells.get(index).and_then(|c| c.get("v")) else {
        return 0;
    };
    match v {
        Value::Number(n) => n.as_f64().map(|f| f.round() as i64).unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(|f| f.round() as i64).unwrap_or(0),
        _ => 0,
    }
}
