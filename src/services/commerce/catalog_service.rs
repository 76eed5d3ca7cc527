use crate::{
    entities::{book, Book},
    errors::{FieldErrors, ServiceError},
    models::{to_minor_units, BookView},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Book catalog. The cart and checkout pipeline only reads from it.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookQuery {
    /// Case-sensitive substring match on title or author
    pub search: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPage {
    pub books: Vec<BookView>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookInput {
    #[validate(length(min = 1, max = 300))]
    pub title: String,
    #[validate(length(min = 1, max = 200))]
    pub author: String,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookInput {
    #[validate(length(min = 1, max = 300))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub author: Option<String>,
    pub price: Option<Decimal>,
    /// `Some(None)` clears the discount
    #[serde(default, with = "double_option")]
    pub discount_price: Option<Option<Decimal>>,
    #[validate(range(min = 0))]
    pub stock: Option<i32>,
    #[validate(url)]
    pub image_url: Option<String>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(
        value: &Option<Option<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<T>>, D::Error> {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

fn price_field(fields: &mut FieldErrors, name: &str, amount: Decimal) -> Option<i64> {
    match to_minor_units(amount) {
        Some(minor) if minor > 0 => Some(minor),
        _ => {
            fields
                .entry(name.to_string())
                .or_default()
                .push("Price must be a positive amount".to_string());
            None
        }
    }
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_books(&self, query: BookQuery) -> Result<BookPage, ServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

        let mut select = Book::find().order_by_asc(book::Column::Title);
        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            select = select.filter(
                Condition::any()
                    .add(book::Column::Title.contains(term))
                    .add(book::Column::Author.contains(term)),
            );
        }

        let paginator = select.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let books = paginator
            .fetch_page(page - 1)
            .await?
            .iter()
            .map(BookView::from)
            .collect();

        Ok(BookPage {
            books,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_book(&self, id: Uuid) -> Result<BookView, ServiceError> {
        Book::find_by_id(id)
            .one(&*self.db)
            .await?
            .map(BookView::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn create_book(&self, input: CreateBookInput) -> Result<BookView, ServiceError> {
        input.validate()?;

        let mut fields = FieldErrors::new();
        let price = price_field(&mut fields, "price", input.price);
        let discount = input
            .discount_price
            .and_then(|d| price_field(&mut fields, "discountPrice", d));
        ServiceError::check_fields(fields)?;

        let now = Utc::now();
        let model = book::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(input.title.trim().to_string()),
            author: Set(input.author.trim().to_string()),
            price_minor: Set(price.unwrap_or_default()),
            discount_price_minor: Set(discount),
            stock: Set(input.stock),
            image_url: Set(input.image_url),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(book_id = %model.id, "Book created");
        Ok(BookView::from(model))
    }

    /// Partial update. Carts and checkouts pick up new prices on their next read;
    /// placed orders keep the prices they were created with.
    #[instrument(skip(self))]
    pub async fn update_book(
        &self,
        id: Uuid,
        input: UpdateBookInput,
    ) -> Result<BookView, ServiceError> {
        input.validate()?;

        let existing = Book::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", id)))?;

        let mut fields = FieldErrors::new();
        let price = input.price.map(|p| price_field(&mut fields, "price", p));
        let discount = input
            .discount_price
            .map(|d| d.and_then(|d| price_field(&mut fields, "discountPrice", d)));
        ServiceError::check_fields(fields)?;

        let mut model: book::ActiveModel = existing.into();
        if let Some(title) = input.title {
            model.title = Set(title.trim().to_string());
        }
        if let Some(author) = input.author {
            model.author = Set(author.trim().to_string());
        }
        if let Some(Some(price)) = price {
            model.price_minor = Set(price);
        }
        if let Some(discount) = discount {
            model.discount_price_minor = Set(discount);
        }
        if let Some(stock) = input.stock {
            model.stock = Set(stock);
        }
        if let Some(image_url) = input.image_url {
            model.image_url = Set(Some(image_url));
        }
        model.updated_at = Set(Utc::now());

        let updated = model.update(&*self.db).await?;
        info!(book_id = %id, "Book updated");
        Ok(BookView::from(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn non_positive_prices_are_field_errors() {
        let mut fields = FieldErrors::new();
        assert_eq!(price_field(&mut fields, "price", dec!(499.5)), Some(49_950));
        assert_eq!(price_field(&mut fields, "price", dec!(0)), None);
        assert_eq!(price_field(&mut fields, "discountPrice", dec!(-3)), None);
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn update_distinguishes_absent_and_null_discount() {
        let absent: UpdateBookInput = serde_json::from_str(r#"{"title":"X"}"#).unwrap();
        assert_eq!(absent.discount_price, None);

        let cleared: UpdateBookInput = serde_json::from_str(r#"{"discountPrice":null}"#).unwrap();
        assert_eq!(cleared.discount_price, Some(None));

        let set: UpdateBookInput = serde_json::from_str(r#"{"discountPrice":"99.00"}"#).unwrap();
        assert_eq!(set.discount_price, Some(Some(dec!(99.00))));
    }
}
