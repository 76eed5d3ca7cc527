use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog book. Prices are minor currency units.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "books")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub price_minor: i64,
    pub discount_price_minor: Option<i64>,
    pub stock: i32,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Unit price actually charged: the discount price when it undercuts the list price.
    pub fn effective_price_minor(&self) -> i64 {
        match self.discount_price_minor {
            Some(discount) if discount >= 0 && discount < self.price_minor => discount,
            _ => self.price_minor,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart_item::Entity")]
    CartItems,
}

impl Related<super::cart_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CartItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(price: i64, discount: Option<i64>) -> Model {
        Model {
            id: Uuid::new_v4(),
            title: "Dune".into(),
            author: "Frank Herbert".into(),
            price_minor: price,
            discount_price_minor: discount,
            stock: 3,
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn discount_applies_only_when_lower() {
        assert_eq!(book(50_000, Some(39_900)).effective_price_minor(), 39_900);
        assert_eq!(book(50_000, Some(60_000)).effective_price_minor(), 50_000);
        assert_eq!(book(50_000, None).effective_price_minor(), 50_000);
    }
}
