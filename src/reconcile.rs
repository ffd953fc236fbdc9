//! Reconciliation of gateway outcomes into orders.
//!
//! Both the browser redirect callback and the server-to-server notification
//! end up in [`reconcile`]. Either may arrive first, twice, concurrently, or
//! never; neither is trusted to say whether the payment succeeded. The gateway
//! is always re-queried, and fulfillment collapses duplicates by payment id.

use rusqlite::Connection;
use serde::Serialize;

use crate::cart::CartStore;
use crate::db::{AppState, queries};
use crate::error::Result;
use crate::fulfillment::{self, Fulfillment, FulfillmentRequest};
use crate::id;
use crate::middleware::session::PENDING_PAYMENT_KEY;
use crate::models::{OrderStatus, OrderWithTickets, PendingPayment};
use crate::payments::{GatewayError, PaymentState, PaymentStatus, RegisteredGateway};

/// Where a reconciliation request came from.
#[derive(Debug, Clone, Copy)]
pub enum Channel<'a> {
    /// The user's browser returning from the gateway.
    BrowserCallback { session_id: &'a str },
    /// A server-to-server notification (no browser session).
    Notification,
}

impl Channel<'_> {
    fn label(&self) -> &'static str {
        match self {
            Channel::BrowserCallback { .. } => "callback",
            Channel::Notification => "notification",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call fulfilled the payment.
    Completed(OrderWithTickets),
    /// The payment had already been fulfilled; nothing changed.
    AlreadyCompleted(OrderWithTickets),
    Failed,
    Pending,
    /// Could not establish the outcome, or refused to guess.
    Unknown,
    /// Paid, but no cart snapshot survives to fulfill from.
    MissingSnapshot,
    /// Paid, but issuing the tickets failed. The pending record is kept for retry.
    FulfillmentFailed,
}

/// The status page a browser is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusPage {
    Success,
    Failed,
    Pending,
    Unknown,
}

impl StatusPage {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPage::Success => "success",
            StatusPage::Failed => "failed",
            StatusPage::Pending => "pending",
            StatusPage::Unknown => "unknown",
        }
    }

    /// Path of the page, with the payment id attached when there is one.
    pub fn path(&self, payment_id: &str) -> String {
        let page = format!("/payment/{}", self.as_str());
        if payment_id.is_empty() {
            page
        } else {
            crate::payments::append_query_params(&page, &[("payment_id", payment_id)])
        }
    }
}

impl ReconcileOutcome {
    pub fn page(&self) -> StatusPage {
        match self {
            ReconcileOutcome::Completed(_) | ReconcileOutcome::AlreadyCompleted(_) => {
                StatusPage::Success
            }
            ReconcileOutcome::Failed | ReconcileOutcome::FulfillmentFailed => StatusPage::Failed,
            ReconcileOutcome::Pending => StatusPage::Pending,
            ReconcileOutcome::Unknown | ReconcileOutcome::MissingSnapshot => StatusPage::Unknown,
        }
    }

    pub fn order(&self) -> Option<&OrderWithTickets> {
        match self {
            ReconcileOutcome::Completed(o) | ReconcileOutcome::AlreadyCompleted(o) => Some(o),
            _ => None,
        }
    }
}

/// Run the reconciliation state machine once for `payment_id`.
///
/// Only storage errors are returned as `Err`; every payment-level problem is an
/// outcome.
pub async fn reconcile(
    state: &AppState,
    gateway: &RegisteredGateway,
    payment_id: &str,
    channel: Channel<'_>,
) -> Result<ReconcileOutcome> {
    let provider = gateway.name();

    if !id::is_plausible_tracking_id(payment_id) {
        tracing::warn!("Rejected implausible payment id on {} {}", provider, channel.label());
        return Ok(ReconcileOutcome::Unknown);
    }

    if !channel_may_reconcile(state, provider, payment_id, channel)? {
        return Ok(ReconcileOutcome::Unknown);
    }

    let status = match query_status(state, gateway, payment_id).await {
        Ok(status) => status,
        Err(outcome) => return Ok(outcome),
    };

    match status.state {
        PaymentState::Success => {}
        PaymentState::Failed => {
            tracing::info!("Payment {} failed ({} {})", payment_id, provider, channel.label());
            return Ok(ReconcileOutcome::Failed);
        }
        PaymentState::Pending => {
            tracing::info!("Payment {} still pending ({} {})", payment_id, provider, channel.label());
            return Ok(ReconcileOutcome::Pending);
        }
        PaymentState::Unknown => {
            tracing::info!("Payment {} in unknown state ({} {})", payment_id, provider, channel.label());
            return Ok(ReconcileOutcome::Unknown);
        }
    }

    let mut conn = state.db.get()?;

    let Some(pending) = queries::get_pending_payment(&conn, payment_id)? else {
        return settled_without_snapshot(&conn, payment_id, channel);
    };

    if !pending.provider.eq_ignore_ascii_case(provider) {
        tracing::warn!(
            "Payment {} belongs to provider {}, not {}",
            payment_id,
            pending.provider,
            provider
        );
        return Ok(ReconcileOutcome::Unknown);
    }

    if let Some(amount) = status.amount_cents.filter(|a| *a != pending.cart.total_cents) {
        tracing::error!(
            "Amount mismatch for payment {}: gateway reports {} but cart snapshot totals {}",
            payment_id,
            amount,
            pending.cart.total_cents
        );
        return Ok(ReconcileOutcome::Unknown);
    }

    match fulfill_pending(&mut conn, &state.carts, &pending) {
        Ok(Fulfillment::Created(order)) => {
            tracing::info!(
                "Payment {} reconciled via {} {}: order {}",
                payment_id,
                provider,
                channel.label(),
                order.order.order_number
            );
            Ok(ReconcileOutcome::Completed(order))
        }
        Ok(Fulfillment::AlreadyFulfilled(order)) => {
            tracing::info!(
                "Payment {} already fulfilled as order {} ({} {})",
                payment_id,
                order.order.order_number,
                provider,
                channel.label()
            );
            Ok(ReconcileOutcome::AlreadyCompleted(order))
        }
        Err(e) => {
            tracing::error!(
                "Fulfillment failed for paid payment {} ({} {}): {}",
                payment_id,
                provider,
                channel.label(),
                e
            );
            Ok(ReconcileOutcome::FulfillmentFailed)
        }
    }
}

/// Fulfill a pending payment, then retire it.
///
/// After the order exists the pending record is deleted, and the originating
/// session's cart is cleared only if that session still points at this payment.
/// A session that has moved on to a newer cart keeps it.
pub fn fulfill_pending(
    conn: &mut Connection,
    carts: &CartStore,
    pending: &PendingPayment,
) -> Result<Fulfillment> {
    let fulfillment = fulfillment::complete(
        conn,
        &FulfillmentRequest {
            payment_id: &pending.payment_id,
            provider: &pending.provider,
            cart: &pending.cart,
            billing: &pending.billing,
            user_id: pending.user_id.as_deref(),
            session_id: Some(&pending.session_id),
            reference: Some(&pending.reference),
        },
    )?;

    // Past this point the order stands; cleanup problems are only logged.
    if let Err(e) = queries::delete_pending_payment(conn, &pending.payment_id) {
        tracing::warn!("Failed to delete pending payment {}: {}", pending.payment_id, e);
    }

    match queries::session_remove_if(conn, &pending.session_id, PENDING_PAYMENT_KEY, &pending.payment_id) {
        Ok(true) => {
            if let Err(e) = carts.clear(conn, &pending.session_id) {
                tracing::warn!("Failed to clear cart for session {}: {}", pending.session_id, e);
            }
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(
            "Failed to release pending payment pointer for session {}: {}",
            pending.session_id,
            e
        ),
    }

    Ok(fulfillment)
}

/// Browser callbacks may only reconcile payments that started in the same session.
fn channel_may_reconcile(
    state: &AppState,
    provider: &str,
    payment_id: &str,
    channel: Channel<'_>,
) -> Result<bool> {
    let Channel::BrowserCallback { session_id } = channel else {
        return Ok(true);
    };

    let conn = state.db.get()?;

    if queries::session_get(&conn, session_id, PENDING_PAYMENT_KEY)?.as_deref() == Some(payment_id) {
        return Ok(true);
    }
    let pending = queries::get_pending_payment(&conn, payment_id)?;
    if pending.is_some_and(|p| p.session_id == session_id) {
        return Ok(true);
    }
    let order = queries::get_order_by_payment_id(&conn, payment_id)?;
    if order.is_some_and(|o| o.session_id.as_deref() == Some(session_id)) {
        return Ok(true);
    }

    tracing::warn!(
        "{} callback for payment {} does not match session {}; refusing to reconcile",
        provider,
        payment_id,
        session_id
    );
    Ok(false)
}

/// Ask the gateway, bounded by the configured timeout.
async fn query_status(
    state: &AppState,
    gateway: &RegisteredGateway,
    payment_id: &str,
) -> std::result::Result<PaymentStatus, ReconcileOutcome> {
    let query = gateway.gateway.query_status(payment_id);
    match tokio::time::timeout(state.gateway_timeout, query).await {
        Ok(Ok(status)) => Ok(status),
        Ok(Err(GatewayError::Timeout)) | Err(_) => {
            tracing::warn!(
                "Status query for payment {} timed out after {:?}",
                payment_id,
                state.gateway_timeout
            );
            Err(ReconcileOutcome::Pending)
        }
        Ok(Err(e)) => {
            tracing::warn!("Status query for payment {} failed: {}", payment_id, e);
            Err(ReconcileOutcome::Unknown)
        }
    }
}

/// The gateway says paid but no pending record exists.
///
/// Usually the other channel got here first and already fulfilled it.
/// Otherwise the snapshot is gone and the payment needs manual attention.
fn settled_without_snapshot(
    conn: &Connection,
    payment_id: &str,
    channel: Channel<'_>,
) -> Result<ReconcileOutcome> {
    let order = queries::get_order_by_payment_id(conn, payment_id)?
        .filter(|o| o.status == OrderStatus::Completed);
    if let Some(order) = order {
        tracing::debug!(
            "Payment {} already fulfilled as order {} ({})",
            payment_id,
            order.order_number,
            channel.label()
        );
        let tickets = queries::list_tickets_for_order(conn, order.id)?;
        return Ok(ReconcileOutcome::AlreadyCompleted(OrderWithTickets { order, tickets }));
    }

    tracing::error!(
        "Payment {} succeeded but no cart snapshot is available ({}); needs manual recovery",
        payment_id,
        channel.label()
    );
    Ok(ReconcileOutcome::MissingSnapshot)
}
