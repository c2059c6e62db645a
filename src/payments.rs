//! Multi-method payment entry.
//!
//! A checkout can split the tendered amount across several payment methods
//! (cash plus card, for example). The splitter tracks per-method amounts and
//! derives received / change / shortfall against the order total; the
//! submission gate in `checkout` refuses to build an order while a shortfall
//! remains.

use serde::Serialize;
use std::collections::BTreeMap;

/// Payment methods offered at the counter.
pub const PAYMENT_METHODS: &[&str] = &["cash", "card", "linepay"];

/// Per-method tendered amounts for one checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PaymentSplit {
    amounts: BTreeMap<String, i64>,
}

impl PaymentSplit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a method (starting at 0) or, if already enabled, drop it
    /// entirely along with its amount.
    pub fn toggle_method(&mut self, method: &str) {
        if self.amounts.remove(method).is_none() {
            self.amounts.insert(method.to_string(), 0);
        }
    }

    /// Overwrite a method's tendered amount. Negative input is clamped to
    /// zero; the stored state never holds a negative amount.
    pub fn set_amount(&mut self, method: &str, amount: i64) {
        self.amounts.insert(method.to_string(), amount.max(0));
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn amounts(&self) -> &BTreeMap<String, i64> {
        &self.amounts
    }

    /// Sum of all tendered amounts.
    pub fn total_received(&self) -> i64 {
        self.amounts.values().sum()
    }

    /// Change due when the tender exceeds the total.
    pub fn change(&self, total: i64) -> i64 {
        (self.total_received() - total).max(0)
    }

    /// Amount still missing when the tender does not cover the total.
    pub fn shortfall(&self, total: i64) -> i64 {
        (total - self.total_received()).max(0)
    }

    /// Methods with a non-zero amount, joined for the single-column summary
    /// field (`cash`, or `card+cash` for splits). Falls back to `cash` when
    /// nothing was entered so the spreadsheet column is never blank.
    pub fn summary_method(&self) -> String {
        let used: Vec<&str> = self
            .amounts
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(method, _)| method.as_str())
            .collect();
        if used.is_empty() {
            "cash".to_string()
        } else {
            used.join("+")
        }
    }

    pub fn clear(&mut self) {
        self.amounts.clear();
    }
}
