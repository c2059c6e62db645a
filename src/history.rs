//! Order history read side.
//!
//! Filtering and statistics over the engine's order snapshot. This module
//! never mutates anything; delete/settle/retry intents go through the
//! engine.

use crate::model::{Order, SettlementRecord};

/// History view filter. Both criteria are optional and combine with AND.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Case-insensitive substring match on the operator name.
    pub user_contains: Option<String>,
    /// Exact match on the order's summary payment method.
    pub payment_method: Option<String>,
}

impl HistoryFilter {
    fn matches(&self, order: &Order) -> bool {
        if let Some(needle) = &self.user_contains {
            if !order
                .user
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        if let Some(method) = &self.payment_method {
            if &order.payment_method != method {
                return false;
            }
        }
        true
    }
}

/// Orders passing the filter, in their stored order (submission order, since
/// order IDs sort lexicographically by submission time).
pub fn filter_orders<'a>(orders: &'a [Order], filter: &HistoryFilter) -> Vec<&'a Order> {
    orders.iter().filter(|o| filter.matches(o)).collect()
}

/// Displayed aggregates over a set of orders. Soft-deleted orders remain
/// listed but contribute nothing here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStats {
    pub order_count: usize,
    pub total_revenue: i64,
    pub total_discount: i64,
}

pub fn stats<'a, I>(orders: I) -> HistoryStats
where
    I: IntoIterator<Item = &'a Order>,
{
    let mut result = HistoryStats::default();
    for order in orders {
        if order.is_deleted() {
            continue;
        }
        result.order_count += 1;
        result.total_revenue += order.total;
        result.total_discount += order.discount_amount;
    }
    result
}

/// Aggregate impact of settling `orders`, shown in the confirmation step
/// before the batch commits. The batch ID is assigned at commit time, not
/// here.
pub fn settlement_preview(orders: &[Order], user: &str) -> SettlementRecord {
    SettlementRecord::build(String::new(), user, orders.to_vec(), "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderItem;
    use std::collections::BTreeMap;

    fn order(user: &str, method: &str, total: i64, deleted: bool) -> Order {
        Order {
            order_id: format!("id-{user}-{method}-{total}"),
            user: user.to_string(),
            items: vec![OrderItem {
                name: "Coffee".to_string(),
                price: total,
                quantity: 1,
                custom_options: None,
            }],
            subtotal: total + 10,
            discount_amount: 10,
            total,
            payment_amounts: BTreeMap::from([(method.to_string(), total)]),
            payment_method: method.to_string(),
            received_amount: total,
            deleted,
            ..Default::default()
        }
    }

    #[test]
    fn filters_by_user_substring_case_insensitively() {
        let orders = vec![
            order("Amy", "cash", 50, false),
            order("ben", "cash", 60, false),
        ];
        let filter = HistoryFilter {
            user_contains: Some("AM".to_string()),
            payment_method: None,
        };
        let hits = filter_orders(&orders, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].user, "Amy");
    }

    #[test]
    fn filters_by_payment_method() {
        let orders = vec![
            order("amy", "cash", 50, false),
            order("amy", "card", 60, false),
            order("amy", "linepay", 70, false),
        ];
        let filter = HistoryFilter {
            user_contains: None,
            payment_method: Some("card".to_string()),
        };
        let hits = filter_orders(&orders, &filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].total, 60);

        let all = filter_orders(&orders, &HistoryFilter::default());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn stats_exclude_soft_deleted_orders() {
        let orders = vec![
            order("amy", "cash", 100, false),
            order("amy", "cash", 60, false),
            order("amy", "cash", 999, true),
        ];
        let stats = stats(orders.iter());
        assert_eq!(stats.order_count, 2);
        assert_eq!(stats.total_revenue, 160);
        assert_eq!(stats.total_discount, 20);
    }

    #[test]
    fn preview_matches_record_aggregates_without_an_id() {
        let orders = vec![
            order("amy", "cash", 100, false),
            order("amy", "card", 60, false),
        ];
        let preview = settlement_preview(&orders, "amy");
        assert_eq!(preview.batch_id, "");
        assert_eq!(preview.count, 2);
        assert_eq!(preview.total_sum, 160);
        assert_eq!(preview.payment_totals.get("cash"), Some(&100));
        assert_eq!(preview.payment_totals.get("card"), Some(&60));
        assert_eq!(preview.product_counts, vec![("Coffee".to_string(), 2)]);
    }
}
