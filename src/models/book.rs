use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::from_minor_units;
use crate::entities::book;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_price: Option<Decimal>,
    pub effective_price: Decimal,
    pub stock: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&book::Model> for BookView {
    fn from(model: &book::Model) -> Self {
        Self {
            id: model.id,
            title: model.title.clone(),
            author: model.author.clone(),
            price: from_minor_units(model.price_minor),
            discount_price: model.discount_price_minor.map(from_minor_units),
            effective_price: from_minor_units(model.effective_price_minor()),
            stock: model.stock,
            image_url: model.image_url.clone(),
            updated_at: model.updated_at,
        }
    }
}

impl From<book::Model> for BookView {
    fn from(model: book::Model) -> Self {
        Self::from(&model)
    }
}
