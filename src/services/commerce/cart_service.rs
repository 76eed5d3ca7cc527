use crate::{
    entities::{book, cart_item, Book, CartItem},
    errors::{FieldErrors, ServiceError},
    events::{Event, EventSender},
    models::{
        from_minor_units, BookView, CartLineView, CartView, GuestCartLine, MAX_LINE_QUANTITY,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Persisted per-user cart.
///
/// Every mutation is a single statement or a single transaction, so two
/// requests for the same user never lose each other's updates:
/// - merge adds guest quantities onto existing lines (`quantity = quantity + n`)
/// - add replaces the quantity of an existing line
/// - increase/decrease are atomic `± 1` updates; decreasing a line at 1 deletes it
/// - no write takes a line above `MAX_LINE_QUANTITY`
/// - remove and clear are idempotent
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Input for add-or-set quantity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999, message = "Quantity must be between 1 and 999"))]
    pub quantity: i32,
}

/// Result of a guest cart merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub lines_merged: usize,
    /// Guest lines whose book no longer exists
    pub lines_skipped: usize,
    pub cart: CartView,
}

/// Validates guest lines and resolves their product ids.
///
/// Field paths follow the request array (`items[1].quantity`); nothing is
/// written unless every line is valid.
pub(crate) fn parse_guest_lines(
    lines: &[GuestCartLine],
) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut fields = FieldErrors::new();
    let mut parsed = Vec::with_capacity(lines.len());

    for (index, line) in lines.iter().enumerate() {
        if !(1..=MAX_LINE_QUANTITY).contains(&line.quantity) {
            fields
                .entry(format!("items[{}].quantity", index))
                .or_default()
                .push(quantity_range_message());
        }
        match Uuid::parse_str(line.product.id.trim()) {
            Ok(id) => parsed.push((id, line.quantity)),
            Err(_) => fields
                .entry(format!("items[{}].product._id", index))
                .or_default()
                .push("Invalid product id".to_string()),
        }
    }

    ServiceError::check_fields(fields)?;
    Ok(parsed)
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Cart lines joined with live book data, oldest first.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        load_cart(&*self.db, user_id).await
    }

    /// Merges a guest cart into the persisted cart in one transaction.
    ///
    /// Quantities are summed per book. Lines pointing at books that no longer
    /// exist are skipped rather than failing the whole merge.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn merge_guest_cart(
        &self,
        user_id: Uuid,
        lines: &[GuestCartLine],
    ) -> Result<MergeOutcome, ServiceError> {
        let parsed = parse_guest_lines(lines)?;

        let ids: Vec<Uuid> = parsed.iter().map(|(id, _)| *id).collect();
        let known: HashSet<Uuid> = if ids.is_empty() {
            HashSet::new()
        } else {
            Book::find()
                .filter(book::Column::Id.is_in(ids))
                .all(&*self.db)
                .await?
                .into_iter()
                .map(|b| b.id)
                .collect()
        };

        let txn = self.db.begin().await?;
        let mut lines_merged = 0;
        let mut lines_skipped = 0;

        for (index, (book_id, quantity)) in parsed.into_iter().enumerate() {
            if !known.contains(&book_id) {
                warn!(%user_id, %book_id, "Skipping guest cart line for unknown book");
                lines_skipped += 1;
                continue;
            }

            let updated = CartItem::update_many()
                .col_expr(
                    cart_item::Column::Quantity,
                    Expr::col(cart_item::Column::Quantity).add(quantity),
                )
                .filter(cart_item::Column::UserId.eq(user_id))
                .filter(cart_item::Column::BookId.eq(book_id))
                .filter(cart_item::Column::Quantity.lte(MAX_LINE_QUANTITY - quantity))
                .exec(&txn)
                .await?;

            if updated.rows_affected == 0 {
                // Dropping the transaction rolls back lines merged so far.
                if line_exists(&txn, user_id, book_id).await? {
                    return Err(ServiceError::invalid_field(
                        format!("items[{}].quantity", index),
                        format!("Merged quantity would exceed {} for this book", MAX_LINE_QUANTITY),
                    ));
                }
                insert_line(&txn, user_id, book_id, quantity)
                    .await
                    .map_err(|e| {
                        if e.is_unique_violation() {
                            ServiceError::Conflict(
                                "Cart was modified concurrently, retry the merge".to_string(),
                            )
                        } else {
                            e
                        }
                    })?;
            }
            lines_merged += 1;
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartMerged {
            user_id,
            lines_merged,
            lines_skipped,
        });
        info!(%user_id, lines_merged, lines_skipped, "Merged guest cart");

        Ok(MergeOutcome {
            lines_merged,
            lines_skipped,
            cart: self.get_cart(user_id).await?,
        })
    }

    /// Sets the absolute quantity of a line, inserting it when absent.
    #[instrument(skip(self))]
    pub async fn add_or_set_quantity(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        Book::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Book {} not found", input.product_id))
            })?;

        if !self
            .set_quantity(user_id, input.product_id, input.quantity)
            .await?
        {
            match insert_line(&*self.db, user_id, input.product_id, input.quantity).await {
                Ok(()) => {}
                // Lost an insert race against another request; the row exists now.
                Err(e) if e.is_unique_violation() => {
                    self.set_quantity(user_id, input.product_id, input.quantity)
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        info!(%user_id, book_id = %input.product_id, quantity = input.quantity, "Cart line set");
        self.get_cart(user_id).await
    }

    async fn set_quantity(
        &self,
        user_id: Uuid,
        book_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let res = CartItem::update_many()
            .col_expr(cart_item::Column::Quantity, Expr::value(quantity))
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .exec(&*self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    /// Removes a line. Removing an absent line is not an error.
    #[instrument(skip(self))]
    pub async fn remove_line(
        &self,
        user_id: Uuid,
        book_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .exec(&*self.db)
            .await?;
        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn increase_line(
        &self,
        user_id: Uuid,
        book_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let res = CartItem::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).add(1),
            )
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .filter(cart_item::Column::Quantity.lt(MAX_LINE_QUANTITY))
            .exec(&*self.db)
            .await?;

        if res.rows_affected == 0 {
            if line_exists(&*self.db, user_id, book_id).await? {
                return Err(ServiceError::invalid_field("quantity", quantity_range_message()));
            }
            return Err(not_in_cart(book_id));
        }
        self.get_cart(user_id).await
    }

    /// Subtracts one; a line at quantity 1 is deleted instead of reaching 0.
    #[instrument(skip(self))]
    pub async fn decrease_line(
        &self,
        user_id: Uuid,
        book_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let res = CartItem::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).sub(1),
            )
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::BookId.eq(book_id))
            .filter(cart_item::Column::Quantity.gt(1))
            .exec(&*self.db)
            .await?;

        if res.rows_affected == 0 {
            let removed = CartItem::delete_many()
                .filter(cart_item::Column::UserId.eq(user_id))
                .filter(cart_item::Column::BookId.eq(book_id))
                .filter(cart_item::Column::Quantity.lte(1))
                .exec(&*self.db)
                .await?;

            if removed.rows_affected == 0 {
                return Err(not_in_cart(book_id));
            }
        }
        self.get_cart(user_id).await
    }

    /// Empties the cart. Idempotent.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let res = CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;

        if res.rows_affected > 0 {
            self.event_sender.send_or_log(Event::CartCleared {
                user_id,
                order_id: None,
            });
        }
        self.get_cart(user_id).await
    }
}

fn quantity_range_message() -> String {
    format!("Quantity must be between 1 and {}", MAX_LINE_QUANTITY)
}

async fn line_exists<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    book_id: Uuid,
) -> Result<bool, ServiceError> {
    let count = CartItem::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .filter(cart_item::Column::BookId.eq(book_id))
        .count(conn)
        .await?;
    Ok(count > 0)
}

fn not_in_cart(book_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Book {} is not in the cart", book_id))
}

async fn insert_line<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    book_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        book_id: Set(book_id),
        quantity: Set(quantity),
        added_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

pub(crate) async fn load_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<CartView, ServiceError> {
    let rows = CartItem::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .find_also_related(Book)
        .order_by_asc(cart_item::Column::AddedAt)
        .all(conn)
        .await?;

    let mut items = Vec::with_capacity(rows.len());
    let mut item_count = 0i64;
    let mut subtotal = Decimal::ZERO;

    for (line, book) in rows {
        let Some(book) = book else {
            continue;
        };
        let line_total_minor = book
            .effective_price_minor()
            .checked_mul(i64::from(line.quantity))
            .ok_or_else(|| ServiceError::InvalidOperation("Cart line total overflow".into()))?;
        let line_total = from_minor_units(line_total_minor);

        item_count += i64::from(line.quantity);
        subtotal += line_total;
        items.push(CartLineView {
            product: BookView::from(&book),
            quantity: line.quantity,
            added_at: line.added_at,
            line_total,
        });
    }

    Ok(CartView {
        user_id,
        items,
        item_count,
        subtotal,
    })
}
