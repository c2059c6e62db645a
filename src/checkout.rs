//! Checkout validation and canonical order construction.
//!
//! Turns the cart under assembly into the immutable [`Order`] record that
//! the submission pipeline commits locally and dispatches to the remote
//! ledger. Validation failures block submission before any state mutates.

use chrono::{DateTime, Local, TimeZone};

use crate::cart::Cart;
use crate::model::{self, Order, OrderItem};

/// Validate the cart and freeze it into an order for `user`.
///
/// Fails when the cart is empty or the tendered amount does not cover the
/// total; the error message carries the exact shortfall so the operator
/// knows how much is missing.
pub fn build_order(cart: &Cart, user: &str) -> Result<Order, String> {
    build_order_at(cart, user, Local::now())
}

/// [`build_order`] with an explicit clock, for deterministic tests.
pub fn build_order_at<Tz: TimeZone>(cart: &Cart, user: &str, at: DateTime<Tz>) -> Result<Order, String>
where
    Tz::Offset: std::fmt::Display,
{
    if cart.is_empty() {
        return Err("cart is empty".to_string());
    }

    let subtotal = cart.subtotal();
    let discount_amount = cart.discount_amount();
    let total = cart.total();
    let received = cart.payment.total_received();

    let shortfall = cart.payment.shortfall(total);
    if shortfall > 0 {
        return Err(format!(
            "insufficient payment: received {received}, total {total}, short {shortfall}"
        ));
    }

    let items = cart
        .entries()
        .iter()
        .map(|entry| OrderItem {
            name: entry.name.clone(),
            price: entry.price,
            quantity: entry.quantity,
            custom_options: entry.custom_options.clone(),
        })
        .collect();

    Ok(Order {
        order_id: model::new_order_id(&at),
        timestamp: at.to_rfc3339(),
        user: user.to_string(),
        items,
        subtotal,
        discount_amount,
        total,
        promo_code: cart
            .discount()
            .map(|_| cart.promo_code().to_string())
            .filter(|code| !code.is_empty()),
        payment_amounts: cart.payment.amounts().clone(),
        payment_method: cart.payment.summary_method(),
        received_amount: received,
        change_amount: cart.payment.change(total),
        deleted: false,
        deleted_by: None,
        deleted_at: None,
    })
}
