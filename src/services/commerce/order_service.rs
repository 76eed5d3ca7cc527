use crate::{
    entities::{cart_item, order, order_item, CartItem, Order, OrderItem, OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    models::{NewOrder, OrderView},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order persistence shared by the COD path, the card finalizer and the admin API.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

/// Inserts the order and its lines with the prices carried by `new`.
///
/// Prices are never re-read from the catalog here, so the recorded amount is
/// exactly the amount checked out.
pub async fn create_order<C: ConnectionTrait>(
    conn: &C,
    new: &NewOrder,
) -> Result<OrderView, ServiceError> {
    if new.items.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let order = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(new.user_id),
        shipping_name: Set(new.shipping.name.clone()),
        shipping_address: Set(new.shipping.address.clone()),
        payment_method: Set(new.payment_method),
        payment_status: Set(new.payment_status),
        status: Set(OrderStatus::Placed),
        total_amount_minor: Set(new.total_amount_minor),
        external_payment_session_id: Set(new.external_session_id.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(new.items.len());
    for line in &new.items {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            book_id: Set(line.book_id),
            title: Set(line.title.clone()),
            quantity: Set(line.quantity),
            unit_price_minor: Set(line.unit_price_minor),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    Ok(OrderView::from_parts(order, items))
}

/// Deletes every cart line of `user_id`. Run in the same transaction as
/// [`create_order`] so an order and its cart clear commit together.
pub async fn clear_user_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<u64, ServiceError> {
    let res = CartItem::delete_many()
        .filter(cart_item::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

pub(crate) async fn find_by_session<C: ConnectionTrait>(
    conn: &C,
    session_id: &str,
) -> Result<Option<OrderView>, ServiceError> {
    let Some(order) = Order::find()
        .filter(order::Column::ExternalPaymentSessionId.eq(session_id))
        .one(conn)
        .await?
    else {
        return Ok(None);
    };
    let items = order_items(conn, order.id).await?;
    Ok(Some(OrderView::from_parts(order, items)))
}

async fn order_items<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(OrderItem::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?)
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates the order and clears the user's cart in one transaction.
    #[instrument(skip(self, new), fields(user_id = %new.user_id, method = %new.payment_method))]
    pub async fn place_order(&self, new: NewOrder) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;
        let view = create_order(&txn, &new).await?;
        clear_user_cart(&txn, new.user_id).await?;
        txn.commit().await?;

        self.publish_placed(&view, new.total_amount_minor);
        info!(order_id = %view.id, "Order placed");
        Ok(view)
    }

    pub(crate) fn publish_placed(&self, view: &OrderView, total_amount_minor: i64) {
        self.event_sender.send_or_log(Event::OrderPlaced {
            order_id: view.id,
            user_id: view.user,
            payment_method: view.payment_method,
            total_amount_minor,
            placed_at: view.created_at,
        });
        self.event_sender.send_or_log(Event::CartCleared {
            user_id: view.user,
            order_id: Some(view.id),
        });
    }

    pub async fn find_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderView>, ServiceError> {
        find_by_session(&*self.db, session_id).await
    }

    /// Fetches an order visible to the requester. Orders of other users are
    /// reported as missing unless the requester is an admin.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        requester: Uuid,
        is_admin: bool,
    ) -> Result<OrderView, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .filter(|o| is_admin || o.user_id == requester)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_items(&*self.db, order.id).await?;
        Ok(OrderView::from_parts(order, items))
    }

    /// Order history of one user, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = Order::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        self.with_items(orders).await
    }

    /// All orders, newest first, paginated (1-indexed pages).
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderView>, u64), ServiceError> {
        let paginator = Order::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((self.with_items(orders).await?, total))
    }

    async fn with_items(&self, orders: Vec<order::Model>) -> Result<Vec<OrderView>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut grouped: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in OrderItem::find()
            .filter(order_item::Column::OrderId.is_in(ids))
            .all(&*self.db)
            .await?
        {
            grouped.entry(item.order_id).or_default().push(item);
        }

        Ok(orders
            .into_iter()
            .map(|o| {
                let items = grouped.remove(&o.id).unwrap_or_default();
                OrderView::from_parts(o, items)
            })
            .collect())
    }

    /// Admin fulfilment update. Only forward transitions and pre-shipment
    /// cancellation are accepted.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status;
        if !old_status.can_transition_to(new_status) {
            warn!(%order_id, from = %old_status, to = %new_status, "Rejected order status change");
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot change order status from {} to {}",
                old_status, new_status
            )));
        }

        // Conditional on the status we read, so concurrent admins cannot both win.
        let res = Order::update_many()
            .col_expr(order::Column::Status, Expr::value(new_status))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(old_status))
            .exec(&*self.db)
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Order status changed concurrently".to_string(),
            ));
        }

        self.event_sender.send_or_log(Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        });
        info!(%order_id, from = %old_status, to = %new_status, "Order status updated");

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        let items = order_items(&*self.db, order_id).await?;
        Ok(OrderView::from_parts(order, items))
    }
}
