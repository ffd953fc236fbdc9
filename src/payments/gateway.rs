use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Serialize;
use strum::{AsRefStr, EnumString};
use thiserror::Error;

use crate::models::BillingInfo;

/// Normalized payment outcome as reported by a gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentState {
    Success,
    Failed,
    Pending,
    Unknown,
}

/// What a gateway can do, declared once at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayCapabilities {
    /// Initiation yields an authorization URL the browser must visit.
    /// When false the gateway settles the payment inline.
    pub redirect: bool,
    /// A stored authorization URL may be revisited instead of starting a new attempt.
    pub reusable_authorization: bool,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    /// Merchant reference, fresh for every attempt
    pub reference: String,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub billing: BillingInfo,
    /// Where the browser comes back to after authorizing
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone)]
pub struct Initiated {
    /// Gateway tracking identifier for this attempt
    pub payment_id: String,
    pub authorization_url: Option<String>,
    /// Settled state, reported inline by synchronous gateways only
    pub status: Option<PaymentState>,
}

/// Read-only view of a payment, always fetched fresh from the gateway.
#[derive(Debug, Clone)]
pub struct PaymentStatus {
    pub payment_id: String,
    pub state: PaymentState,
    pub amount_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Something about the payment changed; re-query its status.
    PaymentUpdate,
    /// Authentic but irrelevant to order fulfillment.
    Ignored,
}

/// A server-to-server notification decoded into a provider-agnostic shape.
#[derive(Debug, Clone)]
pub struct Notification {
    pub payment_id: Option<String>,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn update(payment_id: impl Into<String>) -> Self {
        Self {
            payment_id: Some(payment_id.into()),
            kind: NotificationKind::PaymentUpdate,
        }
    }

    pub fn ignored() -> Self {
        Self {
            payment_id: None,
            kind: NotificationKind::Ignored,
        }
    }
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway request failed: {0}")]
    Http(String),

    #[error("Gateway API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode gateway response: {0}")]
    Decode(String),

    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("Malformed notification: {0}")]
    BadPayload(String),

    #[error("Payment declined: {0}")]
    Declined(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Http(e.to_string())
        }
    }
}

/// Port over one external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name used in routes and stored on orders (e.g. "stripe").
    fn name(&self) -> &str;

    fn capabilities(&self) -> GatewayCapabilities;

    /// Start a payment attempt for `request.reference`.
    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError>;

    /// Authoritative status of a payment. The only way success is ever established.
    async fn query_status(&self, payment_id: &str) -> Result<PaymentStatus, GatewayError>;

    /// Authenticate and decode a server-to-server notification.
    fn handle_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Notification, GatewayError>;
}
