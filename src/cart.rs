//! Cart assembly for the order screen.
//!
//! The cart owns everything that belongs to one checkout in progress: line
//! entries, the applied discount, the promo code text, and the payment
//! split. `clear()` resets them as a unit so no stale discount or tender
//! survives into the next order.

use crate::catalog::MenuItem;
use crate::payments::PaymentSplit;
use crate::promo::{self, Discount};

/// One cart line: a catalog item at a frozen price, a quantity, and the
/// customization picked in the dialog (if any).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartEntry {
    pub item_id: u32,
    pub name: String,
    pub price: i64,
    pub quantity: u32,
    pub custom_options: Option<String>,
}

/// Checkout state under assembly.
#[derive(Debug, Clone, Default)]
pub struct Cart {
    entries: Vec<CartEntry>,
    discount: Option<Discount>,
    promo_code: String,
    promo_message: String,
    pub payment: PaymentSplit,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item. An entry with the same item identity (id + price) and
    /// identical customization gets its quantity bumped; anything else
    /// appends a fresh line. Insertion order is stable for display.
    pub fn add_item(&mut self, item: &MenuItem, custom_options: Option<String>) {
        self.add_priced_item(item, item.price, custom_options);
    }

    /// Same as [`add_item`](Self::add_item) but with an overridden price,
    /// for customizations that change the price (bundle upgrades and the
    /// like).
    pub fn add_priced_item(&mut self, item: &MenuItem, price: i64, custom_options: Option<String>) {
        let existing = self.entries.iter_mut().find(|entry| {
            entry.item_id == item.id && entry.price == price && entry.custom_options == custom_options
        });

        match existing {
            Some(entry) => entry.quantity += 1,
            None => self.entries.push(CartEntry {
                item_id: item.id,
                name: item.name.to_string(),
                price,
                quantity: 1,
                custom_options,
            }),
        }
    }

    /// Adjust an entry's quantity by `delta`; the entry is dropped when the
    /// quantity falls to zero or below. Out-of-range indices are ignored.
    pub fn update_quantity(&mut self, index: usize, delta: i32) {
        let Some(entry) = self.entries.get_mut(index) else {
            return;
        };
        let next = entry.quantity as i64 + delta as i64;
        if next <= 0 {
            self.entries.remove(index);
        } else {
            entry.quantity = next as u32;
        }
    }

    pub fn entries(&self) -> &[CartEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputed on every call; never cached across mutations.
    pub fn subtotal(&self) -> i64 {
        self.entries
            .iter()
            .map(|entry| entry.price * entry.quantity as i64)
            .sum()
    }

    pub fn discount(&self) -> Option<Discount> {
        self.discount
    }

    pub fn discount_amount(&self) -> i64 {
        promo::discount_amount(self.subtotal(), self.discount)
    }

    pub fn total(&self) -> i64 {
        promo::total_after_discount(self.subtotal(), self.discount)
    }

    pub fn promo_code(&self) -> &str {
        &self.promo_code
    }

    pub fn promo_message(&self) -> &str {
        &self.promo_message
    }

    pub fn set_promo_code(&mut self, code: &str) {
        self.promo_code = code.to_string();
    }

    /// Resolve the entered promo code against the fixed table, updating the
    /// discount and the operator-facing message together.
    pub fn apply_promo_code(&mut self) {
        let result = promo::apply(&self.promo_code);
        self.discount = result.discount;
        self.promo_message = result.message;
        if self.discount.is_some() {
            self.promo_code = self.promo_code.trim().to_uppercase();
        }
    }

    /// Reset cart lines, discount, promo code, promo message, and payment
    /// split in one step.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.discount = None;
        self.promo_code.clear();
        self.promo_message.clear();
        self.payment.clear();
    }
}
