use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::from_minor_units;
use crate::entities::{order, order_item, OrderStatus, PaymentMethod, PaymentStatus};

/// Priced order line captured at checkout initiation. Stored verbatim in
/// checkout snapshots and copied into `order_items` without re-pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineDraft {
    pub book_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price_minor: i64,
}

impl OrderLineDraft {
    pub fn line_total_minor(&self) -> Option<i64> {
        self.unit_price_minor.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingDetails {
    pub name: String,
    pub address: String,
}

/// Everything the shared order-creation helper needs.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub items: Vec<OrderLineDraft>,
    pub shipping: ShippingDetails,
    pub total_amount_minor: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub external_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemView {
    pub product: Uuid,
    pub title: String,
    pub quantity: i32,
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressView {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user: Uuid,
    pub items: Vec<OrderItemView>,
    pub shipping_address: ShippingAddressView,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_payment_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderView {
    pub fn from_parts(order: order::Model, items: Vec<order_item::Model>) -> Self {
        Self {
            id: order.id,
            user: order.user_id,
            items: items
                .into_iter()
                .map(|item| OrderItemView {
                    product: item.book_id,
                    title: item.title,
                    quantity: item.quantity,
                    price: from_minor_units(item.unit_price_minor),
                })
                .collect(),
            shipping_address: ShippingAddressView {
                name: order.shipping_name,
                address: order.shipping_address,
            },
            payment_method: order.payment_method,
            payment_status: order.payment_status,
            total_amount: from_minor_units(order.total_amount_minor),
            status: order.status,
            external_payment_session_id: order.external_payment_session_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
