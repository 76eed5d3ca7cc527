//! Bookstore storefront API
//!
//! Persisted per-user carts with guest-cart merge on login, checkout by cash on
//! delivery or hosted card payment, and exactly-once order finalization.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod models;
pub mod services;
pub mod tracing;

use axum::{routing::get, Router};
use http::HeaderValue;
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::{AuthConfig, AuthRouterExt, AuthService};
use crate::services::payments::PaymentGateway;

/// Per-request deadline applied to every route
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires services around one connection pool and event channel.
    /// `gateway` is `None` when card payments are disabled.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<events::EventSender>,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let auth_config = AuthConfig::new(
            config.jwt_secret.clone(),
            config.auth_audience.clone(),
            config.auth_issuer.clone(),
            Duration::from_secs(config.jwt_expiration as u64),
            Duration::from_secs(config.refresh_token_expiration as u64),
        )
        .with_secure_cookies(config.is_production());
        let auth = Arc::new(AuthService::new(auth_config, db.clone()));

        let services =
            handlers::AppServices::new(db.clone(), event_sender.clone(), config.clone(), gateway);

        Self {
            db,
            config,
            event_sender,
            services,
            auth,
        }
    }
}

/// Storefront routes, without global layers.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(|| async { "bookstore-api up" }))
        .nest("/health", handlers::health::health_routes())
        .nest("/books", handlers::commerce::books_routes())
        .nest("/cart", handlers::commerce::carts_routes().with_auth())
        .nest(
            "/order",
            handlers::commerce::orders_routes()
                .merge(handlers::payment_webhooks::payment_webhook_routes()),
        )
}

/// Builds the CORS layer from configuration.
pub fn build_cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, config::AppConfigError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        let layer = CorsLayer::new().allow_origin(origins);
        // Credentialed CORS cannot use wildcards.
        Ok(if cfg.cors_allow_credentials {
            layer
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PATCH,
                    http::Method::DELETE,
                ])
                .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
                .allow_credentials(true)
        } else {
            layer.allow_methods(Any).allow_headers(Any)
        })
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            "Using permissive CORS because explicit origins were not configured ({})",
            if cfg.is_development() {
                "development environment"
            } else {
                "explicit override enabled"
            }
        );
        Ok(CorsLayer::permissive())
    } else {
        Err(config::AppConfigError::Invalid(
            "Missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .to_string(),
        ))
    }
}

/// Full application router with tracing, compression, CORS, auth injection
/// and request ids.
pub fn app_router(state: AppState, cors_layer: CorsLayer) -> Router {
    let auth_service = state.auth.clone();

    api_routes()
        .with_state(Arc::new(state))
        .nest("/auth", auth::auth_routes().with_state(auth_service.clone()))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: axum::extract::Request,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}
