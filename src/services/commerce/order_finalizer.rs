use crate::{
    entities::{checkout_snapshot, CheckoutSnapshot, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    models::{to_minor_units, NewOrder, OrderLineDraft, OrderView, ShippingDetails},
    services::payments::{is_valid_session_id, HostedSession, PaymentGateway},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::checkout_service::{
    MetadataItem, META_ADDRESS, META_ITEMS, META_NAME, META_SNAPSHOT_ID, META_TOTAL,
    META_USER_ID,
};
use super::order_service::{self, OrderService};

/// Turns a paid hosted session into exactly one order.
///
/// Safe to call repeatedly for the same session from the client and the
/// webhook: an existing order is returned as-is, and the UNIQUE session id
/// column settles races between concurrent callers.
#[derive(Clone)]
pub struct OrderFinalizer {
    db: Arc<DatabaseConnection>,
    orders: OrderService,
    gateway: Option<Arc<dyn PaymentGateway>>,
}

/// Order contents recovered from a session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionOrder {
    pub user_id: Uuid,
    pub shipping: ShippingDetails,
    pub total_minor: i64,
    pub lines: Vec<OrderLineDraft>,
    pub snapshot_id: Option<Uuid>,
}

fn metadata_error(what: &str) -> ServiceError {
    ServiceError::InvalidOperation(format!("Checkout session metadata is invalid: {}", what))
}

/// Reads user, shipping, total and inline items from session metadata.
/// Used when no snapshot is referenced.
pub(crate) fn order_from_metadata(session: &HostedSession) -> Result<SessionOrder, ServiceError> {
    let meta = &session.metadata;
    let get = |key: &str| meta.get(key).ok_or_else(|| metadata_error(key));

    let user_id = Uuid::parse_str(get(META_USER_ID)?).map_err(|_| metadata_error(META_USER_ID))?;
    let total = Decimal::from_str(get(META_TOTAL)?).map_err(|_| metadata_error(META_TOTAL))?;
    let total_minor = to_minor_units(total).ok_or_else(|| metadata_error(META_TOTAL))?;

    let items: Vec<MetadataItem> =
        serde_json::from_str(get(META_ITEMS)?).map_err(|_| metadata_error(META_ITEMS))?;
    let lines = items
        .into_iter()
        .map(|item| {
            Ok(OrderLineDraft {
                book_id: item.id,
                title: item.name,
                quantity: item.quantity,
                unit_price_minor: to_minor_units(item.price)
                    .ok_or_else(|| metadata_error(META_ITEMS))?,
            })
        })
        .collect::<Result<Vec<_>, ServiceError>>()?;

    Ok(SessionOrder {
        user_id,
        shipping: ShippingDetails {
            name: get(META_NAME)?.clone(),
            address: get(META_ADDRESS)?.clone(),
        },
        total_minor,
        lines,
        snapshot_id: None,
    })
}

impl OrderFinalizer {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: OrderService,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
        }
    }

    /// Completes a card checkout.
    ///
    /// `acting_user` is the authenticated caller for client-driven completion
    /// and `None` for the verified webhook.
    #[instrument(skip(self))]
    pub async fn complete_card_order(
        &self,
        session_id: &str,
        acting_user: Option<Uuid>,
    ) -> Result<OrderView, ServiceError> {
        if !is_valid_session_id(session_id) {
            return Err(ServiceError::invalid_field(
                "sessionId",
                "is not a valid checkout session id",
            ));
        }

        if let Some(existing) = self.orders.find_by_session(session_id).await? {
            ensure_owner(&existing, acting_user)?;
            info!(order_id = %existing.id, "Checkout session already completed");
            return Ok(existing);
        }

        let gateway = self.gateway.as_ref().ok_or_else(|| {
            ServiceError::ServiceUnavailable("Card payments are not configured".to_string())
        })?;
        let session = gateway.retrieve_checkout_session(session_id).await?;

        if !session.is_paid() {
            warn!(%session_id, status = ?session.payment_status, "Completion requested for unpaid session");
            return Err(ServiceError::PaymentFailed(
                "Payment has not been completed".to_string(),
            ));
        }

        let recovered = self.recover_order(&session).await?;
        if let Some(user) = acting_user {
            if user != recovered.user_id {
                warn!(%session_id, %user, "Checkout session belongs to another user");
                return Err(ServiceError::Forbidden(
                    "Checkout session belongs to another user".to_string(),
                ));
            }
        }
        if let Some(paid) = session.amount_total {
            if paid != recovered.total_minor {
                warn!(%session_id, paid, expected = recovered.total_minor, "Paid amount mismatch");
                return Err(ServiceError::Conflict(
                    "Paid amount does not match the order total".to_string(),
                ));
            }
        }

        match self.persist(session_id, &recovered).await {
            Ok(view) => {
                self.orders.publish_placed(&view, recovered.total_minor);
                info!(order_id = %view.id, %session_id, "Card order finalized");
                Ok(view)
            }
            // Another caller finalized the same session first.
            Err(e) if e.is_unique_violation() => {
                let existing = self.orders.find_by_session(session_id).await?.ok_or(e)?;
                ensure_owner(&existing, acting_user)?;
                Ok(existing)
            }
            Err(e) => Err(e),
        }
    }

    /// Prefers the server-side snapshot; falls back to inline metadata.
    async fn recover_order(&self, session: &HostedSession) -> Result<SessionOrder, ServiceError> {
        let Some(raw) = session.metadata.get(META_SNAPSHOT_ID) else {
            return order_from_metadata(session);
        };
        let snapshot_id =
            Uuid::parse_str(raw).map_err(|_| metadata_error(META_SNAPSHOT_ID))?;

        match CheckoutSnapshot::find_by_id(snapshot_id).one(&*self.db).await? {
            Some(snapshot) => {
                let lines: Vec<OrderLineDraft> = serde_json::from_value(snapshot.items)?;
                Ok(SessionOrder {
                    user_id: snapshot.user_id,
                    shipping: ShippingDetails {
                        name: snapshot.shipping_name,
                        address: snapshot.shipping_address,
                    },
                    total_minor: snapshot.total_amount_minor,
                    lines,
                    snapshot_id: Some(snapshot_id),
                })
            }
            None if session.metadata.contains_key(META_ITEMS) => {
                warn!(%snapshot_id, "Checkout snapshot missing; using session metadata");
                order_from_metadata(session)
            }
            None => Err(ServiceError::NotFound(format!(
                "Checkout snapshot {} not found",
                snapshot_id
            ))),
        }
    }

    async fn persist(
        &self,
        session_id: &str,
        recovered: &SessionOrder,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;

        let view = order_service::create_order(
            &txn,
            &NewOrder {
                user_id: recovered.user_id,
                items: recovered.lines.clone(),
                shipping: recovered.shipping.clone(),
                total_amount_minor: recovered.total_minor,
                payment_method: PaymentMethod::Card,
                payment_status: PaymentStatus::Paid,
                external_session_id: Some(session_id.to_string()),
            },
        )
        .await?;
        order_service::clear_user_cart(&txn, recovered.user_id).await?;

        if let Some(snapshot_id) = recovered.snapshot_id {
            CheckoutSnapshot::update_many()
                .col_expr(checkout_snapshot::Column::ConsumedAt, Expr::value(Some(Utc::now())))
                .filter(checkout_snapshot::Column::Id.eq(snapshot_id))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(view)
    }
}

fn ensure_owner(order: &OrderView, acting_user: Option<Uuid>) -> Result<(), ServiceError> {
    match acting_user {
        Some(user) if user != order.user => Err(ServiceError::Forbidden(
            "Checkout session belongs to another user".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payments::SessionPaymentStatus;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;

    fn session(metadata: BTreeMap<String, String>) -> HostedSession {
        HostedSession {
            id: "cs_test_1".into(),
            url: None,
            payment_status: SessionPaymentStatus::Paid,
            amount_total: Some(20_000),
            currency: Some("inr".into()),
            metadata,
        }
    }

    #[test]
    fn recovers_order_from_inline_metadata() {
        let user = Uuid::new_v4();
        let book = Uuid::new_v4();
        let mut meta = BTreeMap::new();
        meta.insert("userId".to_string(), user.to_string());
        meta.insert("name".to_string(), "Asha".to_string());
        meta.insert("address".to_string(), "1 MG Road".to_string());
        meta.insert("totalAmount".to_string(), "200.00".to_string());
        meta.insert(
            "items".to_string(),
            format!(r#"[{{"id":"{}","name":"Dune","price":"100.00","quantity":2}}]"#, book),
        );

        let order = order_from_metadata(&session(meta)).unwrap();
        assert_eq!(order.user_id, user);
        assert_eq!(order.total_minor, 20_000);
        assert_eq!(
            order.lines,
            vec![OrderLineDraft {
                book_id: book,
                title: "Dune".into(),
                quantity: 2,
                unit_price_minor: 10_000,
            }]
        );
    }

    #[test]
    fn rejects_incomplete_metadata() {
        let mut meta = BTreeMap::new();
        meta.insert("userId".to_string(), Uuid::new_v4().to_string());
        assert_matches!(
            order_from_metadata(&session(meta)),
            Err(ServiceError::InvalidOperation(_))
        );
    }
}
