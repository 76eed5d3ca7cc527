use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::{
    is_valid_session_id, HostedSession, HostedSessionRequest, PaymentGateway,
    SessionPaymentStatus,
};
use crate::{config::AppConfig, errors::ServiceError};

/// Stripe Checkout adapter
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
    payment_status: SessionPaymentStatus,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
}

impl From<StripeSession> for HostedSession {
    fn from(session: StripeSession) -> Self {
        Self {
            id: session.id,
            url: session.url,
            payment_status: session.payment_status,
            amount_total: session.amount_total,
            currency: session.currency,
            metadata: session.metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

impl StripeGateway {
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    /// `None` when no secret key is configured (card checkout disabled).
    pub fn from_config(cfg: &AppConfig) -> Result<Option<Self>, ServiceError> {
        cfg.stripe_secret_key()
            .map(|key| Self::new(key, cfg.stripe_api_base.clone(), cfg.payment_timeout()))
            .transpose()
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.api_base)
    }

    async fn parse_session(response: reqwest::Response) -> Result<HostedSession, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{}: {}",
                        b.error.kind.unwrap_or_else(|| "api_error".to_string()),
                        b.error.message.unwrap_or_default()
                    )
                })
                .unwrap_or(body);
            warn!(status = %status, detail = %detail, "Stripe API error");

            return Err(if status == StatusCode::NOT_FOUND {
                ServiceError::NotFound("Checkout session not found".to_string())
            } else {
                ServiceError::ExternalServiceError(format!(
                    "Stripe returned {}: {}",
                    status, detail
                ))
            });
        }

        let session: StripeSession = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("Failed to parse Stripe response: {}", e))
        })?;
        Ok(session.into())
    }
}

/// Stripe's form encoding of a Checkout Session create call.
fn session_form(request: &HostedSessionRequest) -> Vec<(String, String)> {
    let mut params = vec![
        ("mode".to_string(), "payment".to_string()),
        ("payment_method_types[0]".to_string(), "card".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    if let Some(email) = &request.customer_email {
        params.push(("customer_email".to_string(), email.clone()));
    }
    if let Some(reference) = &request.client_reference_id {
        params.push(("client_reference_id".to_string(), reference.clone()));
    }

    for (i, item) in request.line_items.iter().enumerate() {
        let prefix = format!("line_items[{}]", i);
        params.push((
            format!("{}[price_data][currency]", prefix),
            request.currency.clone(),
        ));
        params.push((
            format!("{}[price_data][product_data][name]", prefix),
            item.name.clone(),
        ));
        params.push((
            format!("{}[price_data][unit_amount]", prefix),
            item.unit_amount_minor.to_string(),
        ));
        params.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
    }

    for (key, value) in &request.metadata {
        params.push((format!("metadata[{}]", key), value.clone()));
    }

    params
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: HostedSessionRequest,
    ) -> Result<HostedSession, ServiceError> {
        let response = self
            .client
            .post(self.sessions_url())
            .basic_auth(&self.secret_key, Some(""))
            .form(&session_form(&request))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Stripe API error: {}", e)))?;

        let session = Self::parse_session(response).await?;
        info!(session_id = %session.id, "Stripe checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<HostedSession, ServiceError> {
        if !is_valid_session_id(session_id) {
            return Err(ServiceError::invalid_field(
                "sessionId",
                "is not a valid checkout session id",
            ));
        }

        let response = self
            .client
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .basic_auth(&self.secret_key, Some(""))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("Stripe API error: {}", e)))?;

        Self::parse_session(response).await
    }
}
