use crate::{
    errors::{ApiError, ServiceError},
    AppState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Mounted under `/order`; authenticated by signature, not by session.
pub fn payment_webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/stripe-webhook", post(stripe_webhook))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is outside the tolerance window")]
    Expired,
    #[error("no signature matched")]
    Mismatch,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    id: Option<String>,
}

fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verifies a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`).
///
/// `now` is unix seconds; the timestamp must be within `tolerance_secs` of it.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if now.abs_diff(signed_at) > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        // verify_slice compares in constant time
        if sign(secret, timestamp, payload)?.verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let secret = state
        .config
        .stripe_webhook_secret
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            ServiceError::ServiceUnavailable("Payment webhooks are not configured".to_string())
        })?;

    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("Missing webhook signature".to_string()))?;

    if let Err(e) = verify_signature(
        header,
        &body,
        secret,
        state.config.stripe_webhook_tolerance_secs,
        chrono::Utc::now().timestamp(),
    ) {
        warn!(error = %e, "Payment webhook signature verification failed");
        return Err(ServiceError::Unauthorized("Invalid webhook signature".to_string()).into());
    }

    let event: WebhookEvent = serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest {
        message: format!("Invalid webhook payload: {}", e),
    })?;

    match event.kind.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session_id = event.data.object.id.ok_or_else(|| ApiError::BadRequest {
                message: "Webhook event has no session id".to_string(),
            })?;

            match state
                .services
                .finalizer
                .complete_card_order(&session_id, None)
                .await
            {
                Ok(order) => {
                    info!(event_id = ?event.id, order_id = %order.id, %session_id, "Webhook finalized order");
                }
                // Client errors will not improve on redelivery; acknowledge them.
                Err(e) if e.status_code().is_client_error() => {
                    warn!(event_id = ?event.id, %session_id, error = %e, "Webhook session not finalized");
                }
                Err(e) => return Err(e.into()),
            }
        }
        other => {
            info!(event_id = ?event.id, event_type = other, "Ignoring payment webhook event");
        }
    }

    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn header_for(payload: &[u8], timestamp: i64) -> String {
        let mac = sign(SECRET, &timestamp.to_string(), payload).unwrap();
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = header_for(payload, 1_700_000_000);
        assert_eq!(
            verify_signature(&header, payload, SECRET, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let payload = b"{}";
        let valid = header_for(payload, 1_700_000_000);
        let header = format!("t=1700000000,v1=deadbeef,{}", valid.split_once(',').unwrap().1);
        assert_eq!(
            verify_signature(&header, payload, SECRET, 300, 1_700_000_000),
            Ok(())
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = header_for(b"{\"amount\":1}", 1_700_000_000);
        assert_eq!(
            verify_signature(&header, b"{\"amount\":2}", SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = header_for(b"{}", 1_700_000_000);
        assert_eq!(
            verify_signature(&header, b"{}", SECRET, 300, 1_700_000_301),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(
            verify_signature("v1=abc", b"{}", SECRET, 300, 0),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature("t=notanumber,v1=abc", b"{}", SECRET, 300, 0),
            Err(SignatureError::Malformed)
        );
    }
}
