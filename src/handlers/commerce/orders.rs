use crate::handlers::common::{
    created_response, parse_id, success_response, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::OrderStatus,
    errors::ApiError,
    services::commerce::{CheckoutOutcome, CheckoutRequest, PaymentChoice},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    response::Response,
    routing::{get, patch, post},
    Extension, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Customer order routes (authenticated) merged with the admin routes.
/// The payment webhook is mounted separately without authentication.
pub fn orders_routes() -> Router<Arc<AppState>> {
    let customer = Router::new()
        .route("/place-cod-order", post(place_cod_order))
        .route("/create-checkout-session", post(create_checkout_session))
        .route("/complete-stripe-order", post(complete_stripe_order))
        .route("/my-orders", get(my_orders))
        .route("/:id", get(get_order))
        .with_auth();

    let admin = Router::new()
        .route("/", get(list_orders))
        .route("/:id/status", patch(update_order_status))
        .with_role("admin");

    customer.merge(admin)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteOrderRequest {
    #[serde(alias = "session_id")]
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

fn checkout_response(outcome: CheckoutOutcome) -> Response {
    match outcome {
        CheckoutOutcome::Placed { order } => created_response(order),
        CheckoutOutcome::Redirect { session_id, url } => {
            success_response(CheckoutSessionResponse { session_id, url })
        }
    }
}

async fn place_cod_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let outcome = state
        .services
        .checkout
        .initiate_checkout(user.user_id, payload, PaymentChoice::CashOnDelivery, None)
        .await?;
    Ok(checkout_response(outcome))
}

async fn create_checkout_session(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let outcome = state
        .services
        .checkout
        .initiate_checkout(
            user.user_id,
            payload,
            PaymentChoice::HostedPayment,
            user.email.clone(),
        )
        .await?;
    Ok(checkout_response(outcome))
}

async fn complete_stripe_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CompleteOrderRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let order = state
        .services
        .finalizer
        .complete_card_order(payload.session_id.trim(), Some(user.user_id))
        .await?;
    Ok(success_response(order))
}

async fn my_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let orders = state.services.orders.list_for_user(user.user_id).await?;
    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "id")?;
    let order = state
        .services
        .orders
        .get_order(id, user.user_id, user.is_admin())
        .await?;
    Ok(success_response(order))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Response, ApiError> {
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(1, 100);
    let (orders, total) = state.services.orders.list_all(page, per_page).await?;
    Ok(success_response(PaginatedResponse::new(
        orders, page, per_page, total,
    )))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let id = parse_id(&id, "id")?;
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    Ok(success_response(order))
}
