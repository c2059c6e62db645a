//! Static menu catalog.
//!
//! The purchasable items, their category grouping, and the customization
//! option lists offered by the order screen. Read-only at runtime; editing
//! the menu means shipping a new build, same as the price list taped to the
//! counter.

use serde::Serialize;

/// A purchasable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: u32,
    pub name: &'static str,
    pub price: i64,
    pub category: &'static str,
}

/// Display order and labels for the category sections.
pub const CATEGORY_ORDER: &[(&str, &str)] = &[
    ("drinks", "Drinks"),
    ("food", "Food"),
    ("retail", "Retail"),
];

const MENU: &[MenuItem] = &[
    MenuItem { id: 1, name: "Coffee", price: 50, category: "drinks" },
    MenuItem { id: 2, name: "Tea", price: 40, category: "drinks" },
    MenuItem { id: 4, name: "Latte", price: 70, category: "drinks" },
    MenuItem { id: 6, name: "Juice", price: 55, category: "drinks" },
    MenuItem { id: 3, name: "Sandwich", price: 80, category: "food" },
    MenuItem { id: 5, name: "Cake", price: 60, category: "food" },
    MenuItem { id: 7, name: "Drip Bag Set", price: 145, category: "retail" },
    MenuItem { id: 8, name: "House Blend Beans", price: 220, category: "retail" },
];

/// Sweetness levels offered for customizable drinks. Last entry is the
/// default selection.
pub const SWEETNESS_OPTIONS: &[&str] = &["no sugar", "light", "half", "regular"];

/// Ice levels offered for customizable drinks. Last entry is the default.
pub const ICE_OPTIONS: &[&str] = &["no ice", "less ice", "regular ice"];

/// Items that open the customization dialog instead of going straight into
/// the cart.
pub fn is_customizable(item: &MenuItem) -> bool {
    item.category == "drinks"
}

/// The full catalog in menu order.
pub fn menu_items() -> &'static [MenuItem] {
    MENU
}

/// Look up an item by ID.
pub fn find_item(id: u32) -> Option<&'static MenuItem> {
    MENU.iter().find(|item| item.id == id)
}

/// Items grouped by category, in `CATEGORY_ORDER`. Categories with no items
/// are omitted.
pub fn items_by_category() -> Vec<(&'static str, Vec<&'static MenuItem>)> {
    CATEGORY_ORDER
        .iter()
        .filter_map(|(key, label)| {
            let items: Vec<_> = MENU.iter().filter(|item| item.category == *key).collect();
            if items.is_empty() {
                None
            } else {
                Some((*label, items))
            }
        })
        .collect()
}
