use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::book::BookView;

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: i32 = 999;

/// Product data a guest cart carries alongside each line.
///
/// The client has no authenticated read path, so it keeps whatever it saw
/// when the line was added. Prices here are display-only; the server always
/// re-resolves the book by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSnapshot {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ProductSnapshot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            author: None,
            price: None,
            discount_price: None,
            image_url: None,
        }
    }
}

impl From<&BookView> for ProductSnapshot {
    fn from(book: &BookView) -> Self {
        Self {
            id: book.id.to_string(),
            title: Some(book.title.clone()),
            author: Some(book.author.clone()),
            price: Some(book.price),
            discount_price: book.discount_price,
            image_url: book.image_url.clone(),
        }
    }
}

/// Cart line in the wire shape shared by the guest cart, `/cart/merge` and checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCartLine {
    pub product: ProductSnapshot,
    pub quantity: i32,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
}

/// Persisted cart line joined with the live book row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub product: BookView,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
    pub item_count: i64,
    pub subtotal: Decimal,
}

impl CartView {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn quantity_of(&self, book_id: Uuid) -> Option<i32> {
        self.items
            .iter()
            .find(|line| line.product.id == book_id)
            .map(|line| line.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guest_line_accepts_underscore_id_and_ignores_unknown_fields() {
        let line: GuestCartLine = serde_json::from_value(json!({
            "product": {
                "_id": "0b6f4c1e-7d0a-4b8c-9c43-2f1f8e5a9b10",
                "title": "Dune",
                "price": 499,
                "categories": ["sci-fi"]
            },
            "quantity": 2,
            "addedAt": "2024-06-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(line.product.id, "0b6f4c1e-7d0a-4b8c-9c43-2f1f8e5a9b10");
        assert_eq!(line.product.price, Some(Decimal::from(499)));
        assert_eq!(line.quantity, 2);
    }

    #[test]
    fn guest_line_defaults_added_at() {
        let line: GuestCartLine = serde_json::from_value(json!({
            "product": { "id": "abc" },
            "quantity": 1
        }))
        .unwrap();
        assert_eq!(line.product.id, "abc");
        assert!(line.added_at <= Utc::now());
    }
}
