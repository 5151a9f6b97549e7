//! Shared domain types for the bakery order backend.
//!
//! Wire names are camelCase; inbound payloads also accept the snake_case
//! column names the legacy clients send.

use serde::{Deserialize, Serialize};

use crate::status::OrderStatus;

/// Composite key identifying a product size variant, the unit of stock
/// tracking. Variants are looked up by (product id, size), never by a
/// surrogate row id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantKey {
    #[serde(alias = "product_id")]
    pub product_id: i64,
    pub size: String,
}

impl VariantKey {
    pub fn new(product_id: i64, size: impl Into<String>) -> Self {
        Self {
            product_id,
            size: size.into(),
        }
    }
}

/// A product with its size variants nested, as returned by the catalog
/// listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub sizes: Vec<ProductVariant>,
}

/// A single size variant: price and the mutable stock count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub product_id: i64,
    pub size: String,
    pub price: i64,
    pub stock: i64,
}

/// A stored order line. Never outlives its order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub size: String,
    pub quantity: i64,
    pub note: String,
    /// Current variant unit price, joined in for display.
    pub price: i64,
}

impl OrderLine {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(self.product_id, self.size.clone())
    }
}

/// An order header with its owned line set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub pickup_date: String,
    pub pickup_slot: String,
    pub note: String,
    pub status: OrderStatus,
    pub created_at: String,
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Zero-padded four-digit receipt number shown to customers and encoded
    /// in the pickup QR code.
    pub fn receipt_number(&self) -> String {
        format!("{:04}", self.id)
    }
}

/// Inbound order payload for create and edit operations.
///
/// On edit, `status: None` keeps the current status.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDraft {
    #[serde(default, alias = "first_name")]
    pub first_name: String,
    #[serde(default, alias = "last_name")]
    pub last_name: String,
    #[serde(default, alias = "tel")]
    pub phone: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "pickup_date", alias = "date")]
    pub pickup_date: String,
    #[serde(default, alias = "pickup_slot", alias = "pickupHour")]
    pub pickup_slot: String,
    #[serde(default, alias = "message")]
    pub note: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "cakes", alias = "items")]
    pub lines: Vec<LineDraft>,
}

/// One requested line item in a draft.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDraft {
    #[serde(alias = "product_id", alias = "cake_id", alias = "cakeId")]
    pub product_id: i64,
    pub size: String,
    #[serde(alias = "amount")]
    pub quantity: i64,
    #[serde(default, alias = "message_cake", alias = "messageCake")]
    pub note: String,
}

impl LineDraft {
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(self.product_id, self.size.clone())
    }
}

/// A signed stock adjustment for one variant, produced by reconciliation
/// and by status transitions. Positive means reserve (stock decreases),
/// negative means release (stock increases).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDelta {
    pub key: VariantKey,
    pub delta: i64,
}

/// Finalized order state handed to the notification dispatcher after a
/// successful commit. The dispatcher renders the email and QR image from
/// this; `qr_payload` is the text the QR encodes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSnapshot {
    pub order_id: i64,
    pub receipt_number: String,
    pub qr_payload: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub pickup_date: String,
    pub pickup_slot: String,
    pub status: OrderStatus,
    pub lines: Vec<SnapshotLine>,
}

/// Line detail for the notification email body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotLine {
    pub product_name: String,
    pub size: String,
    pub quantity: i64,
    pub note: String,
}

impl OrderSnapshot {
    pub fn from_order(order: &Order) -> Self {
        let receipt = order.receipt_number();
        Self {
            order_id: order.id,
            receipt_number: receipt.clone(),
            qr_payload: order.id.to_string(),
            first_name: order.first_name.clone(),
            last_name: order.last_name.clone(),
            phone: order.phone.clone(),
            email: order.email.clone(),
            pickup_date: order.pickup_date.clone(),
            pickup_slot: order.pickup_slot.clone(),
            status: order.status,
            lines: order
                .lines
                .iter()
                .map(|l| SnapshotLine {
                    product_name: l.product_name.clone(),
                    size: l.size.clone(),
                    quantity: l.quantity,
                    note: l.note.clone(),
                })
                .collect(),
        }
    }
}
