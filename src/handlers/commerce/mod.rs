/// Storefront API handlers
pub mod books;
pub mod carts;
pub mod orders;

pub use books::books_routes;
pub use carts::carts_routes;
pub use orders::orders_routes;
