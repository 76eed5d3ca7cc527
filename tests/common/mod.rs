#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bookstore_api::{
    app_router,
    config::AppConfig,
    db,
    entities::{book, user, UserRole},
    errors::ServiceError,
    events::{self, EventSender},
    services::payments::{
        HostedSession, HostedSessionRequest, PaymentGateway, SessionPaymentStatus,
    },
    AppState,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "integration_test_secret_key_that_is_comfortably_longer_than_sixty_four_characters";

/// Payment provider double. Sessions start unpaid; tests flip them with
/// [`FakeGateway::mark_paid`].
#[derive(Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, HostedSession>>,
    requests: Mutex<Vec<HostedSessionRequest>>,
    retrievals: Mutex<usize>,
}

impl FakeGateway {
    pub fn mark_paid(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown fake session");
        session.payment_status = SessionPaymentStatus::Paid;
        session.url = None;
    }

    pub fn set_amount_total(&self, session_id: &str, amount_minor: i64) {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).expect("unknown fake session");
        session.amount_total = Some(amount_minor);
    }

    pub fn last_request(&self) -> HostedSessionRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no checkout session was created")
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn retrievals(&self) -> usize {
        *self.retrievals.lock().unwrap()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(
        &self,
        request: HostedSessionRequest,
    ) -> Result<HostedSession, ServiceError> {
        let mut sessions = self.sessions.lock().unwrap();
        let id = format!("cs_test_{}", sessions.len() + 1);
        let amount_total = request
            .line_items
            .iter()
            .map(|item| item.unit_amount_minor * i64::from(item.quantity))
            .sum();
        let session = HostedSession {
            id: id.clone(),
            url: Some(format!("https://pay.example.test/{}", id)),
            payment_status: SessionPaymentStatus::Unpaid,
            amount_total: Some(amount_total),
            currency: Some(request.currency.clone()),
            metadata: request.metadata.clone(),
        };
        sessions.insert(id, session.clone());
        self.requests.lock().unwrap().push(request);
        Ok(session)
    }

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<HostedSession, ServiceError> {
        *self.retrievals.lock().unwrap() += 1;
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("checkout session {}", session_id)))
    }
}

/// Application harness backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Option<Arc<FakeGateway>>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(true, |_| {}).await
    }

    /// Harness with card payments disabled.
    pub async fn without_gateway() -> Self {
        Self::build(false, |_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(true, customize).await
    }

    async fn build(with_gateway: bool, customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.sqlite").display());

        let mut cfg = AppConfig::new(
            url,
            TEST_JWT_SECRET.to_string(),
            900,
            604_800,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.frontend_url = "http://shop.test".to_string();
        cfg.stripe_webhook_secret = Some("whsec_test_secret".to_string());
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("connect test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = with_gateway.then(|| Arc::new(FakeGateway::default()));
        let port = gateway
            .clone()
            .map(|g| g as Arc<dyn PaymentGateway>);

        let state = AppState::new(Arc::new(pool), Arc::new(cfg), event_sender, port);
        let router = app_router(state.clone(), CorsLayer::permissive());

        Self {
            router,
            state,
            gateway,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn gateway(&self) -> &FakeGateway {
        self.gateway.as_deref().expect("harness built without a gateway")
    }

    pub async fn seed_user(&self, email: &str, role: UserRole) -> user::Model {
        let now = Utc::now();
        user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Test Reader".to_string()),
            email: Set(email.to_string()),
            password_hash: Set(String::new()),
            role: Set(role),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    /// Seeds a user and returns it with a bearer token.
    pub async fn signed_in(&self, email: &str, role: UserRole) -> (user::Model, String) {
        let account = self.seed_user(email, role).await;
        let tokens = self
            .state
            .auth
            .generate_token(&account)
            .await
            .expect("issue test token");
        (account, tokens.access_token)
    }

    pub async fn seed_book(&self, title: &str, price_minor: i64) -> book::Model {
        self.seed_discounted_book(title, price_minor, None).await
    }

    pub async fn seed_discounted_book(
        &self,
        title: &str,
        price_minor: i64,
        discount_minor: Option<i64>,
    ) -> book::Model {
        let now = Utc::now();
        book::ActiveModel {
            id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            author: Set("Test Author".to_string()),
            price_minor: Set(price_minor),
            discount_price_minor: Set(discount_minor),
            stock: Set(10),
            image_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed book")
    }

    /// Sends a request with an optional JSON body and bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        self.request_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request")
    }

    /// Sends raw bytes, for signature-checked endpoints.
    pub async fn request_raw(
        &self,
        uri: &str,
        payload: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(payload)).expect("build request"))
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Wire-shaped guest/checkout line for `book`.
pub fn line(book: &book::Model, quantity: i32) -> Value {
    serde_json::json!({
        "product": { "_id": book.id.to_string(), "title": book.title },
        "quantity": quantity
    })
}

pub fn metadata_of(request: &HostedSessionRequest) -> BTreeMap<String, String> {
    request.metadata.clone()
}
