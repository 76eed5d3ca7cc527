//! Database entities backing the storefront.
pub mod book;
pub mod cart_item;
pub mod checkout_snapshot;
pub mod order;
pub mod order_item;
pub mod refresh_token;
pub mod user;

// Re-export entities
pub use book::{Entity as Book, Model as BookModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use checkout_snapshot::{Entity as CheckoutSnapshot, Model as CheckoutSnapshotModel};
pub use order::{
    Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod, PaymentStatus,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use refresh_token::{Entity as RefreshToken, Model as RefreshTokenModel};
pub use user::{Entity as User, Model as UserModel, UserRole};
