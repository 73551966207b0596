//! Upstream cart records and the normalized view served to pages.

use serde::{Deserialize, Serialize};

use crate::catalog::{pick_localized, LocalizedString};

/// Fallback when a line item has no name in any locale.
pub const UNNAMED_ITEM: &str = "Unnamed item";

// ---------------------------------------------------------------------------
// Upstream records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub cent_amount: i64,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: String,
    pub product_id: String,
    #[serde(default)]
    pub name: LocalizedString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub quantity: u32,
    /// Unit price in cents.
    #[serde(default)]
    pub price_per_unit: i64,
    pub total_price: Price,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    pub id: String,
    /// Optimistic-concurrency token; every update must carry the latest.
    pub version: u64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub total_price: Price,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// Body of a cart creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartDraft {
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
}

/// One update action, tagged by `action` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CartAction {
    AddLineItem {
        product_id: String,
        variant_id: u32,
        quantity: u32,
    },
    ChangeLineItemQuantity {
        line_item_id: String,
        quantity: u32,
    },
    RemoveLineItem {
        line_item_id: String,
    },
    SetCustomerId {
        customer_id: String,
    },
}

// ---------------------------------------------------------------------------
// Normalized view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub cent_amount: i64,
    pub currency_code: String,
    pub display: String,
}

impl Money {
    pub fn new(cent_amount: i64, currency_code: impl Into<String>) -> Self {
        Self {
            cent_amount,
            currency_code: currency_code.into(),
            display: display_cents(cent_amount),
        }
    }
}

impl From<&Price> for Money {
    fn from(price: &Price) -> Self {
        Money::new(price.cent_amount, price.currency_code.clone())
    }
}

/// `$` followed by the amount in units with two decimals, e.g. `$12.05`.
pub fn display_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("${sign}{}.{:02}", abs / 100, abs % 100)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemView {
    pub line_item_id: String,
    pub product_id: String,
    pub sku: Option<String>,
    pub name: String,
    pub image_url: Option<String>,
    pub qty: u32,
    pub price_per_unit: i64,
    pub total_price: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: String,
    pub version: u64,
    pub items: Vec<CartItemView>,
    pub total: Money,
    pub total_qty: u32,
}

impl CartView {
    /// Flatten an upstream cart for `locale`.
    pub fn from_cart(cart: &Cart, locale: &str) -> Self {
        let items: Vec<CartItemView> = cart
            .line_items
            .iter()
            .map(|li| CartItemView {
                line_item_id: li.id.clone(),
                product_id: li.product_id.clone(),
                sku: li.sku.clone(),
                name: pick_localized(&li.name, locale)
                    .filter(|n| !n.is_empty())
                    .unwrap_or(UNNAMED_ITEM)
                    .to_string(),
                image_url: li.image_url.clone(),
                qty: li.quantity,
                price_per_unit: li.price_per_unit,
                total_price: Money::from(&li.total_price),
            })
            .collect();

        Self {
            id: cart.id.clone(),
            version: cart.version,
            total_qty: items.iter().fold(0u32, |acc, item| acc.saturating_add(item.qty)),
            items,
            total: Money::from(&cart.total_price),
        }
    }
}
