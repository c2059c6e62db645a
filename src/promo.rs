//! Promo-code resolution and discount math.

use serde::{Deserialize, Serialize};

/// A discount rule attached to a promo code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum Discount {
    /// Percentage off the subtotal, rounded to the nearest unit.
    Percent(i64),
    /// Fixed amount off.
    Fixed(i64),
}

/// Outcome of applying a promo code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoResult {
    pub discount: Option<Discount>,
    pub message: String,
}

/// The fixed promo table.
pub fn lookup(code: &str) -> Option<Discount> {
    match code {
        "A" => Some(Discount::Percent(10)),
        "B" => Some(Discount::Percent(20)),
        "C" => Some(Discount::Fixed(20)),
        "D" => Some(Discount::Fixed(30)),
        _ => None,
    }
}

/// Resolve a raw promo-code entry. Codes are trimmed and upper-cased before
/// lookup; an empty or unknown code clears the discount.
pub fn apply(raw_code: &str) -> PromoResult {
    let code = raw_code.trim().to_uppercase();

    if code.is_empty() {
        return PromoResult {
            discount: None,
            message: "no promo code selected".to_string(),
        };
    }

    match lookup(&code) {
        Some(discount) => {
            let message = match discount {
                Discount::Percent(value) => format!("promo {code} applied: {value}% off"),
                Discount::Fixed(value) => format!("promo {code} applied: ${value} off"),
            };
            PromoResult {
                discount: Some(discount),
                message,
            }
        }
        None => PromoResult {
            discount: None,
            message: "invalid promo code".to_string(),
        },
    }
}

/// Discount amount for a subtotal under the given rule. Percent discounts
/// round to the nearest unit.
pub fn discount_amount(subtotal: i64, discount: Option<Discount>) -> i64 {
    match discount {
        None => 0,
        Some(Discount::Percent(value)) => {
            ((subtotal as f64) * (value as f64) / 100.0).round() as i64
        }
        Some(Discount::Fixed(value)) => value.max(0),
    }
}

/// Order total after discount, clamped at zero.
pub fn total_after_discount(subtotal: i64, discount: Option<Discount>) -> i64 {
    (subtotal - discount_amount(subtotal, discount)).max(0)
}
