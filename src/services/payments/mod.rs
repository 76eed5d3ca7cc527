//! Hosted-checkout payment provider port.
//!
//! The checkout orchestrator and the order finalizer only talk to
//! [`PaymentGateway`]; [`stripe::StripeGateway`] is the production adapter.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ServiceError;

pub mod stripe;

pub use stripe::StripeGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    NoPaymentRequired,
    #[serde(other)]
    Unpaid,
}

/// Provider view of a hosted checkout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostedSession {
    pub id: String,
    /// Redirect URL; only present while the session is open
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    /// Charged total in minor units
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl HostedSession {
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status,
            SessionPaymentStatus::Paid | SessionPaymentStatus::NoPaymentRequired
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedSessionRequest {
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub customer_email: Option<String>,
    pub client_reference_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: HostedSessionRequest,
    ) -> Result<HostedSession, ServiceError>;

    async fn retrieve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<HostedSession, ServiceError>;
}

/// Provider session ids are opaque but always `[A-Za-z0-9_]+`.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 255
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_shape() {
        assert!(is_valid_session_id("cs_test_a1B2c3"));
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../v1/customers"));
        assert!(!is_valid_session_id("cs test"));
    }

    #[test]
    fn unknown_payment_status_is_unpaid() {
        let status: SessionPaymentStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(status, SessionPaymentStatus::Unpaid);
        let status: SessionPaymentStatus = serde_json::from_str("\"paid\"").unwrap();
        assert_eq!(status, SessionPaymentStatus::Paid);
    }
}
