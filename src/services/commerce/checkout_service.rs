use crate::{
    config::AppConfig,
    entities::{book, checkout_snapshot, Book, CheckoutSnapshot, PaymentMethod, PaymentStatus},
    errors::{FieldErrors, ServiceError},
    events::{Event, EventSender},
    models::{
        from_minor_units, to_minor_units, GuestCartLine, NewOrder, OrderLineDraft, OrderView,
        ShippingDetails, MAX_LINE_QUANTITY,
    },
    services::payments::{HostedSessionRequest, PaymentGateway, SessionLineItem},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::cart_service::parse_guest_lines;
use super::order_service::OrderService;

pub(crate) const META_USER_ID: &str = "userId";
pub(crate) const META_NAME: &str = "name";
pub(crate) const META_ADDRESS: &str = "address";
pub(crate) const META_TOTAL: &str = "totalAmount";
pub(crate) const META_SNAPSHOT_ID: &str = "snapshotId";
pub(crate) const META_ITEMS: &str = "items";

/// How the customer pays; decides when the order is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentChoice {
    /// Order is created and the cart cleared immediately.
    CashOnDelivery,
    /// Order is created later by the finalizer, after the provider confirms payment.
    HostedPayment,
}

/// Checkout request body shared by `place-cod-order` and `create-checkout-session`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Cart is empty"))]
    pub items: Vec<GuestCartLine>,
    #[validate(length(min = 1, max = 200, message = "Name is required (max 200 characters)"))]
    pub name: String,
    #[validate(length(min = 1, max = 490, message = "Address is required (max 490 characters)"))]
    pub address: String,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CheckoutOutcome {
    Placed { order: OrderView },
    #[serde(rename_all = "camelCase")]
    Redirect { session_id: String, url: String },
}

/// Item entry in provider metadata. Prices are the captured unit prices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MetadataItem {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

/// Priced checkout, computed from authoritative catalog rows.
#[derive(Debug, Clone)]
pub(crate) struct PricedCart {
    pub lines: Vec<OrderLineDraft>,
    pub total_minor: i64,
}

/// Prices requested lines against the catalog. Duplicate books are collapsed
/// additively, keeping the position of the first occurrence.
pub(crate) fn price_lines(
    requested: &[(Uuid, i32)],
    books: &HashMap<Uuid, book::Model>,
) -> Result<PricedCart, ServiceError> {
    let mut fields = FieldErrors::new();
    let mut lines: Vec<OrderLineDraft> = Vec::new();
    let mut positions: HashMap<Uuid, usize> = HashMap::new();

    for (index, (book_id, quantity)) in requested.iter().enumerate() {
        let Some(book) = books.get(book_id) else {
            fields
                .entry(format!("items[{}].product._id", index))
                .or_default()
                .push("Book not found".to_string());
            continue;
        };

        match positions.get(book_id) {
            Some(&pos) => {
                let merged = lines[pos].quantity.saturating_add(*quantity);
                if merged > MAX_LINE_QUANTITY {
                    fields
                        .entry(format!("items[{}].quantity", index))
                        .or_default()
                        .push(format!(
                            "Combined quantity for this book exceeds {}",
                            MAX_LINE_QUANTITY
                        ));
                    continue;
                }
                lines[pos].quantity = merged;
            }
            None => {
                positions.insert(*book_id, lines.len());
                lines.push(OrderLineDraft {
                    book_id: *book_id,
                    title: book.title.clone(),
                    quantity: *quantity,
                    unit_price_minor: book.effective_price_minor(),
                });
            }
        }
    }
    ServiceError::check_fields(fields)?;

    let total_minor = lines
        .iter()
        .try_fold(0i64, |acc, line| acc.checked_add(line.line_total_minor()?))
        .ok_or_else(|| ServiceError::invalid_field("totalAmount", "Order total is too large"))?;

    Ok(PricedCart { lines, total_minor })
}

/// Builds provider metadata. The item list is only inlined when its JSON
/// encoding fits in `item_limit` characters; the snapshot id is always present.
pub(crate) fn build_metadata(
    user_id: Uuid,
    shipping: &ShippingDetails,
    total_minor: i64,
    snapshot_id: Uuid,
    lines: &[OrderLineDraft],
    item_limit: usize,
) -> Result<BTreeMap<String, String>, ServiceError> {
    let mut metadata = BTreeMap::new();
    metadata.insert(META_USER_ID.to_string(), user_id.to_string());
    metadata.insert(META_NAME.to_string(), shipping.name.clone());
    metadata.insert(META_ADDRESS.to_string(), shipping.address.clone());
    metadata.insert(
        META_TOTAL.to_string(),
        from_minor_units(total_minor).to_string(),
    );
    metadata.insert(META_SNAPSHOT_ID.to_string(), snapshot_id.to_string());

    let items: Vec<MetadataItem> = lines
        .iter()
        .map(|line| MetadataItem {
            id: line.book_id,
            name: line.title.clone(),
            price: from_minor_units(line.unit_price_minor),
            quantity: line.quantity,
        })
        .collect();
    let encoded = serde_json::to_string(&items)?;
    if encoded.chars().count() <= item_limit {
        metadata.insert(META_ITEMS.to_string(), encoded);
    }

    Ok(metadata)
}

/// Single checkout entry point for both payment methods.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    orders: OrderService,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        orders: OrderService,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            orders,
            gateway,
        }
    }

    #[instrument(skip(self, request), fields(lines = request.items.len()))]
    pub async fn initiate_checkout(
        &self,
        user_id: Uuid,
        request: CheckoutRequest,
        choice: PaymentChoice,
        customer_email: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let (priced, shipping) = self.validate_and_price(&request).await?;

        match choice {
            PaymentChoice::CashOnDelivery => {
                let order = self
                    .orders
                    .place_order(NewOrder {
                        user_id,
                        items: priced.lines,
                        shipping,
                        total_amount_minor: priced.total_minor,
                        payment_method: PaymentMethod::Cod,
                        payment_status: PaymentStatus::Pending,
                        external_session_id: None,
                    })
                    .await?;
                Ok(CheckoutOutcome::Placed { order })
            }
            PaymentChoice::HostedPayment => {
                self.start_hosted_payment(user_id, priced, shipping, customer_email)
                    .await
            }
        }
    }

    async fn validate_and_price(
        &self,
        request: &CheckoutRequest,
    ) -> Result<(PricedCart, ShippingDetails), ServiceError> {
        let mut fields = match request.validate() {
            Ok(()) => FieldErrors::new(),
            Err(e) => match ServiceError::from(e) {
                ServiceError::InvalidFields(fields) => fields,
                other => return Err(other),
            },
        };
        if request.total_amount < Decimal::ONE {
            fields
                .entry("totalAmount".to_string())
                .or_default()
                .push("Total amount must be at least 1".to_string());
        }
        let requested = match parse_guest_lines(&request.items) {
            Ok(requested) => requested,
            Err(ServiceError::InvalidFields(line_fields)) => {
                fields.extend(line_fields);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        ServiceError::check_fields(fields)?;

        let ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();
        let books: HashMap<Uuid, book::Model> = Book::find()
            .filter(book::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|b| (b.id, b))
            .collect();

        let priced = price_lines(&requested, &books)?;

        let client_total = to_minor_units(request.total_amount);
        if client_total != Some(priced.total_minor) {
            warn!(
                client_total = %request.total_amount,
                server_total = priced.total_minor,
                "Checkout total mismatch"
            );
            return Err(ServiceError::invalid_field(
                "totalAmount",
                format!(
                    "Total does not match current prices (expected {})",
                    from_minor_units(priced.total_minor)
                ),
            ));
        }

        let shipping = ShippingDetails {
            name: request.name.trim().to_string(),
            address: request.address.trim().to_string(),
        };
        Ok((priced, shipping))
    }

    /// Records a snapshot and opens a hosted session. The cart is left intact
    /// until the finalizer sees a paid session.
    async fn start_hosted_payment(
        &self,
        user_id: Uuid,
        priced: PricedCart,
        shipping: ShippingDetails,
        customer_email: Option<String>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::ServiceUnavailable("Card payments are not configured".to_string())
        })?;

        let snapshot_id = Uuid::new_v4();
        checkout_snapshot::ActiveModel {
            id: Set(snapshot_id),
            user_id: Set(user_id),
            shipping_name: Set(shipping.name.clone()),
            shipping_address: Set(shipping.address.clone()),
            total_amount_minor: Set(priced.total_minor),
            items: Set(serde_json::to_value(&priced.lines)?),
            created_at: Set(Utc::now()),
            consumed_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        let metadata = build_metadata(
            user_id,
            &shipping,
            priced.total_minor,
            snapshot_id,
            &priced.lines,
            self.config.checkout_metadata_item_limit,
        )?;

        let request = HostedSessionRequest {
            currency: self.config.currency.to_lowercase(),
            line_items: priced
                .lines
                .iter()
                .map(|line| SessionLineItem {
                    name: line.title.clone(),
                    unit_amount_minor: line.unit_price_minor,
                    quantity: line.quantity,
                })
                .collect(),
            success_url: format!(
                "{}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}",
                self.config.frontend_url.trim_end_matches('/')
            ),
            cancel_url: format!("{}/cart", self.config.frontend_url.trim_end_matches('/')),
            metadata,
            customer_email,
            client_reference_id: Some(user_id.to_string()),
        };

        let session = match gateway.create_checkout_session(request).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(cleanup) = CheckoutSnapshot::delete_by_id(snapshot_id)
                    .exec(&*self.db)
                    .await
                {
                    warn!(%snapshot_id, error = %cleanup, "Failed to delete unused checkout snapshot");
                }
                return Err(e);
            }
        };

        let url = session.url.clone().ok_or_else(|| {
            ServiceError::ExternalServiceError("Checkout session has no redirect URL".to_string())
        })?;

        self.event_sender.send_or_log(Event::CheckoutSessionCreated {
            user_id,
            session_id: session.id.clone(),
            snapshot_id,
        });
        info!(%user_id, session_id = %session.id, %snapshot_id, "Checkout session created");

        Ok(CheckoutOutcome::Redirect {
            session_id: session.id,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn book(title: &str, price: i64) -> book::Model {
        book::Model {
            id: Uuid::new_v4(),
            title: title.to_string(),
            author: "Anon".to_string(),
            price_minor: price,
            discount_price_minor: None,
            stock: 10,
            image_url: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn catalog(books: &[&book::Model]) -> HashMap<Uuid, book::Model> {
        books.iter().map(|b| (b.id, (*b).clone())).collect()
    }

    #[test]
    fn prices_from_catalog_and_collapses_duplicates() {
        let a = book("A", 10_000);
        let b = book("B", 25_000);
        let priced = price_lines(
            &[(a.id, 1), (b.id, 1), (a.id, 1)],
            &catalog(&[&a, &b]),
        )
        .unwrap();

        assert_eq!(priced.lines.len(), 2);
        assert_eq!(priced.lines[0].book_id, a.id);
        assert_eq!(priced.lines[0].quantity, 2);
        assert_eq!(priced.total_minor, 45_000);
    }

    #[test]
    fn collapsed_duplicates_respect_the_line_cap() {
        let a = book("A", 100);
        let requested = [(a.id, MAX_LINE_QUANTITY), (a.id, 1)];
        let err = price_lines(&requested, &catalog(&[&a])).unwrap_err();
        assert_matches!(
            err,
            ServiceError::InvalidFields(fields) if fields.contains_key("items[1].quantity")
        );
    }

    #[test]
    fn unknown_book_is_a_field_error() {
        let a = book("A", 10_000);
        let err = price_lines(&[(a.id, 1), (Uuid::new_v4(), 1)], &catalog(&[&a])).unwrap_err();
        assert_matches!(
            err,
            ServiceError::InvalidFields(fields) if fields.contains_key("items[1].product._id")
        );
    }

    #[test]
    fn metadata_inlines_small_item_lists() {
        let a = book("A", 10_000);
        let priced = price_lines(&[(a.id, 2)], &catalog(&[&a])).unwrap();
        let shipping = ShippingDetails {
            name: "Asha".into(),
            address: "1 MG Road".into(),
        };
        let snapshot_id = Uuid::new_v4();
        let meta = build_metadata(
            Uuid::new_v4(),
            &shipping,
            priced.total_minor,
            snapshot_id,
            &priced.lines,
            490,
        )
        .unwrap();

        assert_eq!(meta[META_TOTAL], "200.00");
        assert_eq!(meta[META_SNAPSHOT_ID], snapshot_id.to_string());
        let items: Vec<MetadataItem> = serde_json::from_str(&meta[META_ITEMS]).unwrap();
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].price, from_minor_units(10_000));
    }

    #[test]
    fn metadata_omits_item_list_over_limit_instead_of_truncating() {
        let books: Vec<book::Model> = (0..20)
            .map(|i| book(&format!("A rather long book title number {}", i), 999))
            .collect();
        let requested: Vec<(Uuid, i32)> = books.iter().map(|b| (b.id, 1)).collect();
        let refs: Vec<&book::Model> = books.iter().collect();
        let priced = price_lines(&requested, &catalog(&refs)).unwrap();
        let shipping = ShippingDetails {
            name: "Asha".into(),
            address: "1 MG Road".into(),
        };
        let meta = build_metadata(
            Uuid::new_v4(),
            &shipping,
            priced.total_minor,
            Uuid::new_v4(),
            &priced.lines,
            490,
        )
        .unwrap();

        assert!(!meta.contains_key(META_ITEMS));
        assert!(meta.contains_key(META_SNAPSHOT_ID));
        assert!(meta.values().all(|v| v.chars().count() <= 500));
    }
}
