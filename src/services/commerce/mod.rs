//! Cart, checkout and order services.
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod order_finalizer;
pub mod order_service;

pub use cart_service::{AddToCartInput, CartService, MergeOutcome};
pub use catalog_service::{BookPage, BookQuery, CatalogService, CreateBookInput, UpdateBookInput};
pub use checkout_service::{CheckoutOutcome, CheckoutRequest, CheckoutService, PaymentChoice};
pub use order_finalizer::OrderFinalizer;
pub use order_service::{clear_user_cart, create_order, OrderService};
