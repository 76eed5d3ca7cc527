use crate::handlers::common::{parse_id, success_response};
use crate::{
    auth::AuthUser,
    errors::ApiError,
    models::GuestCartLine,
    services::commerce::AddToCartInput,
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    response::Response,
    routing::{delete, get, patch, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Creates the router for cart endpoints. Every route requires authentication.
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/merge", post(merge_cart))
        .route("/add", post(add_to_cart))
        .route("/remove/:product_id", delete(remove_from_cart))
        .route("/increase/:product_id", patch(increase_quantity))
        .route("/decrease/:product_id", patch(decrease_quantity))
        .route("/clear", delete(clear_cart))
}

/// `/cart/merge` accepts the bare guest cart array or `{ "items": [...] }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MergeCartRequest {
    Lines(Vec<GuestCartLine>),
    Wrapped { items: Vec<GuestCartLine> },
}

impl MergeCartRequest {
    fn into_lines(self) -> Vec<GuestCartLine> {
        match self {
            MergeCartRequest::Lines(lines) | MergeCartRequest::Wrapped { items: lines } => lines,
        }
    }
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let cart = state.services.cart.get_cart(user.user_id).await?;
    Ok(success_response(cart))
}

async fn merge_cart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<MergeCartRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let lines = payload.into_lines();
    let outcome = state
        .services
        .cart
        .merge_guest_cart(user.user_id, &lines)
        .await?;
    Ok(success_response(outcome))
}

async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<AddToCartInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let cart = state
        .services
        .cart
        .add_or_set_quantity(user.user_id, payload)
        .await?;
    Ok(success_response(cart))
}

async fn remove_from_cart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<String>,
) -> Result<Response, ApiError> {
    let product_id = parse_id(&product_id, "productId")?;
    let cart = state
        .services
        .cart
        .remove_line(user.user_id, product_id)
        .await?;
    Ok(success_response(cart))
}

async fn increase_quantity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<String>,
) -> Result<Response, ApiError> {
    let product_id = parse_id(&product_id, "productId")?;
    let cart = state
        .services
        .cart
        .increase_line(user.user_id, product_id)
        .await?;
    Ok(success_response(cart))
}

async fn decrease_quantity(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(product_id): Path<String>,
) -> Result<Response, ApiError> {
    let product_id = parse_id(&product_id, "productId")?;
    let cart = state
        .services
        .cart
        .decrease_line(user.user_id, product_id)
        .await?;
    Ok(success_response(cart))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let cart = state.services.cart.clear_cart(user.user_id).await?;
    Ok(success_response(cart))
}
