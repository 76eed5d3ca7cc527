//! Client-side SDK for storefront frontends and tools.
//!
//! Guests keep their cart locally ([`GuestCart`]); on login the local cart is
//! merged into the server cart with [`merge_guest_cart_on_login`].
pub mod guest_cart;
pub mod http;
pub mod sync;

pub use guest_cart::{CartChanged, GuestCart, GuestCartStore, JsonFileStore, MemoryStore};
pub use http::StorefrontClient;
pub use sync::{merge_guest_cart_on_login, CartMerger, LoginMerge};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Guest cart storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Quantity must be between 1 and 999, got {0}")]
    InvalidQuantity(i32),
}
