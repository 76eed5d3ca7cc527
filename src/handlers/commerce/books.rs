use crate::handlers::common::{created_response, parse_id, success_response};
use crate::{
    auth::AuthRouterExt,
    errors::ApiError,
    services::commerce::{BookQuery, CreateBookInput, UpdateBookInput},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Json, Path, Query, State},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use std::sync::Arc;

/// Public catalog reads plus admin maintenance.
pub fn books_routes() -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/", get(list_books))
        .route("/:id", get(get_book));

    let admin = Router::new()
        .route("/", post(create_book))
        .route("/:id", patch(update_book))
        .with_role("admin");

    public.merge(admin)
}

async fn list_books(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BookQuery>,
) -> Result<Response, ApiError> {
    let page = state.services.catalog.list_books(query).await?;
    Ok(success_response(page))
}

async fn get_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "id")?;
    Ok(success_response(state.services.catalog.get_book(id).await?))
}

async fn create_book(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateBookInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    Ok(created_response(
        state.services.catalog.create_book(payload).await?,
    ))
}

async fn update_book(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBookInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload?;
    let id = parse_id(&id, "id")?;
    Ok(success_response(
        state.services.catalog.update_book(id, payload).await?,
    ))
}
