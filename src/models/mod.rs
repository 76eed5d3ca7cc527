//! API and domain value types shared by services, handlers and the client SDK.
pub mod book;
pub mod cart;
pub mod money;
pub mod order;

pub use book::BookView;
pub use cart::{CartLineView, CartView, GuestCartLine, ProductSnapshot, MAX_LINE_QUANTITY};
pub use money::{from_minor_units, to_minor_units};
pub use order::{NewOrder, OrderItemView, OrderLineDraft, OrderView, ShippingDetails};
