use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{instrument, warn};

use super::sync::CartMerger;
use super::ClientError;
use crate::auth::AuthResponse;
use crate::errors::ErrorResponse;
use crate::models::{CartView, GuestCartLine, OrderView};
use crate::services::commerce::{AddToCartInput, CheckoutRequest, MergeOutcome};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for the storefront API.
#[derive(Debug, Clone)]
pub struct StorefrontClient {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl StorefrontClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            warn!(status = %status, message = %message, "storefront API error");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.send(self.request(method, path).json(body)).await
    }

    /// Signs in and keeps the access token for later calls.
    #[instrument(skip(self, password))]
    pub async fn login(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        let response: AuthResponse = self
            .send_json(
                Method::POST,
                "/auth/login",
                &json!({ "email": email, "password": password }),
            )
            .await?;
        self.access_token = Some(response.tokens.access_token.clone());
        Ok(response)
    }

    pub async fn get_cart(&self) -> Result<CartView, ClientError> {
        self.send(self.request(Method::GET, "/cart")).await
    }

    pub async fn add_to_cart(&self, input: &AddToCartInput) -> Result<CartView, ClientError> {
        self.send_json(Method::POST, "/cart/add", input).await
    }

    pub async fn place_cod_order(
        &self,
        request: &CheckoutRequest,
    ) -> Result<OrderView, ClientError> {
        self.send_json(Method::POST, "/order/place-cod-order", request)
            .await
    }

    pub async fn complete_card_order(&self, session_id: &str) -> Result<OrderView, ClientError> {
        self.send_json(
            Method::POST,
            "/order/complete-stripe-order",
            &json!({ "sessionId": session_id }),
        )
        .await
    }
}

#[async_trait]
impl CartMerger for StorefrontClient {
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    async fn merge_cart(&self, lines: Vec<GuestCartLine>) -> Result<MergeOutcome, ClientError> {
        self.send_json(Method::POST, "/cart/merge", &lines).await
    }
}
