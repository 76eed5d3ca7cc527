pub mod commerce;
pub mod common;
pub mod health;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    events::EventSender,
    services::{
        commerce::{CartService, CatalogService, CheckoutService, OrderFinalizer, OrderService},
        payments::PaymentGateway,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub finalizer: Arc<OrderFinalizer>,
}

impl AppServices {
    /// `gateway` is `None` when card payments are not configured.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let orders = OrderService::new(db.clone(), event_sender.clone());

        Self {
            catalog: Arc::new(CatalogService::new(db.clone())),
            cart: Arc::new(CartService::new(db.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                event_sender,
                config,
                orders.clone(),
                gateway.clone(),
            )),
            finalizer: Arc::new(OrderFinalizer::new(db, orders.clone(), gateway)),
            orders: Arc::new(orders),
        }
    }
}
