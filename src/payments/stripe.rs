use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeSettings;
use crate::error::msg;

use super::gateway::{
    GatewayCapabilities, GatewayError, InitiateRequest, Initiated, Notification, PaymentGateway,
    PaymentState, PaymentStatus,
};

type HmacSha256 = Hmac<Sha256>;

/// Stripe substitutes the checkout session id for this placeholder on redirect.
const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

/// The fields of a checkout session that matter for reconciliation.
#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    /// "open", "complete" or "expired"
    status: Option<String>,
    /// "paid", "unpaid" or "no_payment_required"
    payment_status: String,
    amount_total: Option<i64>,
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: String,
}

/// Map a checkout session's `status` / `payment_status` pair to a payment state.
fn session_state(status: Option<&str>, payment_status: &str) -> PaymentState {
    match (status, payment_status) {
        (_, "paid") | (_, "no_payment_required") => PaymentState::Success,
        (Some("expired"), _) => PaymentState::Failed,
        (Some("open"), "unpaid") | (Some("complete"), "unpaid") => PaymentState::Pending,
        _ => PaymentState::Unknown,
    }
}

/// Stripe Checkout: redirect-based, and an open session's URL can be revisited.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(settings: &StripeSettings) -> Self {
        Self {
            client: Client::builder()
                .timeout(Self::REQUEST_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            secret_key: settings.secret_key.clone(),
            webhook_secret: settings.webhook_secret.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Hard ceiling on any single Stripe API call.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<bool, GatewayError> {
        // Stripe signature format: t=timestamp,v1=signature
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            if let Some(t) = part.trim().strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.trim().strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| GatewayError::BadPayload(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| GatewayError::BadPayload(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| GatewayError::BadPayload(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| GatewayError::Http(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        // Signature length is not secret (always 64 hex chars for SHA-256)
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }

    async fn error_from_response(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        GatewayError::Api { status, body }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &str {
        "stripe"
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            redirect: true,
            reusable_authorization: true,
        }
    }

    /// Create a checkout session with one aggregated line for the whole cart.
    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        let separator = if request.return_url.contains('?') { '&' } else { '?' };
        let success_url = format!(
            "{}{}payment_id={}",
            request.return_url, separator, SESSION_ID_PLACEHOLDER
        );
        let amount = request.amount_cents.to_string();

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", success_url.as_str()),
                ("cancel_url", request.cancel_url.as_str()),
                ("client_reference_id", request.reference.as_str()),
                ("customer_email", request.billing.email.as_str()),
                ("line_items[0][quantity]", "1"),
                ("line_items[0][price_data][currency]", request.currency.as_str()),
                ("line_items[0][price_data][unit_amount]", amount.as_str()),
                (
                    "line_items[0][price_data][product_data][name]",
                    request.description.as_str(),
                ),
                ("metadata[reference]", request.reference.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let session: CreateCheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        let url = session
            .url
            .ok_or_else(|| GatewayError::Decode("checkout session has no url".into()))?;

        tracing::debug!(
            "Stripe checkout session {} created for reference {}",
            session.id,
            request.reference
        );

        Ok(Initiated {
            payment_id: session.id,
            authorization_url: Some(url),
            status: None,
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<PaymentStatus, GatewayError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.api_base,
                urlencoding::encode(payment_id)
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let session: StripeCheckoutSession = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(PaymentStatus {
            state: session_state(session.status.as_deref(), &session.payment_status),
            payment_id: session.id,
            amount_cents: session.amount_total,
        })
    }

    fn handle_notification(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Notification, GatewayError> {
        let signature = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::InvalidSignature)?;

        if !self.verify_webhook_signature(body, signature)? {
            return Err(GatewayError::InvalidSignature);
        }

        let event: StripeWebhookEvent = serde_json::from_slice(body)
            .map_err(|e| GatewayError::BadPayload(format!("Invalid JSON: {}", e)))?;

        match event.event_type.as_str() {
            "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "checkout.session.async_payment_failed"
            | "checkout.session.expired" => {
                let session: StripeEventObject = serde_json::from_value(event.data.object)
                    .map_err(|e| GatewayError::BadPayload(format!("Invalid checkout session: {}", e)))?;
                Ok(Notification::update(session.id))
            }
            other => {
                tracing::debug!("Ignoring Stripe event type {}", other);
                Ok(Notification::ignored())
            }
        }
    }
}
