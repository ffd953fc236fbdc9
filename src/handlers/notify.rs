//! Server-to-server payment notifications.
//!
//! The provider retries anything that is not 2xx, so only outcomes that a
//! retry could fix answer with an error status.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::error::msg;
use crate::extractors::Path;
use crate::payments::{GatewayError, NotificationKind};
use crate::reconcile::{self, Channel, ReconcileOutcome};

/// Result type for notification handling.
pub type NotifyResult = (StatusCode, &'static str);

fn outcome_response(outcome: &ReconcileOutcome) -> NotifyResult {
    match outcome {
        ReconcileOutcome::Completed(_) | ReconcileOutcome::AlreadyCompleted(_) => {
            (StatusCode::OK, "OK")
        }
        ReconcileOutcome::Failed => (StatusCode::OK, "Payment failed"),
        ReconcileOutcome::Pending => (StatusCode::OK, "Payment pending"),
        ReconcileOutcome::Unknown => (StatusCode::SERVICE_UNAVAILABLE, "Payment status unavailable"),
        ReconcileOutcome::MissingSnapshot => {
            (StatusCode::INTERNAL_SERVER_ERROR, "No pending payment for this id")
        }
        ReconcileOutcome::FulfillmentFailed => (StatusCode::INTERNAL_SERVER_ERROR, "Fulfillment failed"),
    }
}

pub async fn handle_notification(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> NotifyResult {
    let Some(gateway) = state.gateways.get(&provider) else {
        return (StatusCode::NOT_FOUND, msg::UNKNOWN_PROVIDER);
    };

    let notification = match gateway.gateway.handle_notification(&headers, &body) {
        Ok(n) => n,
        Err(GatewayError::InvalidSignature) => {
            tracing::warn!("{} notification rejected: invalid signature", gateway.name());
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        Err(e) => {
            tracing::warn!("{} notification rejected: {}", gateway.name(), e);
            return (StatusCode::BAD_REQUEST, "Malformed notification");
        }
    };

    if notification.kind == NotificationKind::Ignored {
        return (StatusCode::OK, "Event ignored");
    }

    let Some(payment_id) = notification.payment_id else {
        return (StatusCode::BAD_REQUEST, msg::MISSING_PAYMENT_ID);
    };

    match reconcile::reconcile(&state, gateway, &payment_id, Channel::Notification).await {
        Ok(outcome) => outcome_response(&outcome),
        Err(e) => {
            tracing::error!("Reconciliation of payment {} failed: {}", payment_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}
