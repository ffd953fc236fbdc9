//! Checkout: turns the session's cart into a gateway payment attempt.
//!
//! Redirect-based gateways get a durable pending payment and the browser is
//! sent to the authorization URL. Synchronous gateways settle inline and the
//! order is fulfilled before the response goes out. Which path runs depends
//! only on the capabilities the gateway declared at registration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cart::{self, Cart};
use crate::db::{AppState, queries};
use crate::error::{AppError, FieldErrors, msg};
use crate::id::EntityType;
use crate::middleware::SessionId;
use crate::middleware::session::PENDING_PAYMENT_KEY;
use crate::models::{BillingInfo, CreatePendingPayment, OrderStatus, OrderWithTickets};
use crate::payments::{
    GatewayError, InitiateRequest, PaymentState, RegisteredGateway, append_query_params,
};
use crate::reconcile::{self, StatusPage};

/// The checkout form as submitted (and echoed back on validation errors).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutForm {
    #[serde(default)]
    pub billing_email: String,
    #[serde(default)]
    pub billing_name: String,
    #[serde(default)]
    pub payment_method: String,
}

#[derive(Debug, Clone)]
pub enum CheckoutResult {
    /// Send the browser to the gateway.
    Redirect {
        payment_id: String,
        authorization_url: String,
    },
    /// Paid and fulfilled inline.
    Confirmed(OrderWithTickets),
    /// Started but not settled; show the matching status page.
    Unsettled { payment_id: String, page: StatusPage },
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Show the form again with these messages.
    #[error("Checkout rejected: {0:?}")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Other(#[from] AppError),
}

impl From<r2d2::Error> for CheckoutError {
    fn from(e: r2d2::Error) -> Self {
        CheckoutError::Other(e.into())
    }
}

/// Validate the session's cart and billing info and start a payment attempt.
///
/// A failed initiation leaves nothing behind: no pending payment, and the cart
/// is untouched.
pub async fn checkout(
    state: &AppState,
    session: &SessionId,
    form: &CheckoutForm,
) -> Result<CheckoutResult, CheckoutError> {
    let billing = BillingInfo::new(&form.billing_email, &form.billing_name);
    let mut errors = FieldErrors::new();
    billing.validate_into(&mut errors);

    let provider = form.payment_method.trim();
    let gateway = if provider.is_empty() {
        errors.add("payment_method", msg::PAYMENT_METHOD_EMPTY);
        None
    } else {
        let found = state.gateways.get(provider);
        if found.is_none() {
            errors.add("payment_method", msg::UNKNOWN_PAYMENT_METHOD);
        }
        found
    };

    let (cart, user_id) = {
        let conn = state.db.get()?;
        let cart = state.carts.get(&conn, session.as_str(), queries::now())?;
        validate_cart(&conn, &cart, &mut errors)?;
        (cart, session.user_id(&conn)?)
    };

    let gateway = match (errors.into_result(), gateway) {
        (Ok(()), Some(gateway)) => gateway,
        (Err(AppError::Validation(fields)), _) => return Err(CheckoutError::Invalid(fields)),
        (Err(e), _) => return Err(e.into()),
        (Ok(()), None) => {
            return Err(CheckoutError::Invalid(FieldErrors::single(
                "payment_method",
                msg::UNKNOWN_PAYMENT_METHOD,
            )));
        }
    };

    start_attempt(state, session, gateway, &cart, &billing, user_id).await
}

/// Pick up the session's live pending payment again.
///
/// Gateways with reusable authorizations get the stored URL; all others get a
/// fresh attempt (with a new reference) built from the stored snapshot.
pub async fn resume(state: &AppState, session: &SessionId) -> Result<CheckoutResult, CheckoutError> {
    let (pending, completed) = {
        let conn = state.db.get()?;
        let pending = session
            .pending_payment_id(&conn)?
            .map(|payment_id| queries::get_pending_payment(&conn, &payment_id))
            .transpose()?
            .flatten()
            .filter(|p| !p.is_expired(queries::now()))
            .ok_or_else(|| AppError::NotFound(msg::NO_PENDING_PAYMENT.into()))?;

        let completed = match queries::get_order_by_payment_id(&conn, &pending.payment_id)? {
            Some(order) if order.status == OrderStatus::Completed => {
                let tickets = queries::list_tickets_for_order(&conn, order.id)?;
                Some(OrderWithTickets { order, tickets })
            }
            _ => None,
        };
        (pending, completed)
    };

    if let Some(order) = completed {
        return Ok(CheckoutResult::Confirmed(order));
    }

    let gateway = state
        .gateways
        .get(&pending.provider)
        .ok_or_else(|| AppError::NotFound(msg::UNKNOWN_PROVIDER.into()))?;

    if gateway.capabilities.reusable_authorization {
        if let Some(url) = pending.authorization_url.clone() {
            tracing::debug!("Resuming payment {} at stored authorization URL", pending.payment_id);
            return Ok(CheckoutResult::Redirect {
                payment_id: pending.payment_id,
                authorization_url: url,
            });
        }
    }

    tracing::info!(
        "Re-initiating payment {} with a fresh reference",
        pending.payment_id
    );
    start_attempt(
        state,
        session,
        gateway,
        &pending.cart,
        &pending.billing,
        pending.user_id.clone(),
    )
    .await
}

/// Reject empty carts and lines that no longer fit the remaining capacity.
fn validate_cart(
    conn: &rusqlite::Connection,
    cart: &Cart,
    errors: &mut FieldErrors,
) -> crate::error::Result<()> {
    if cart.is_empty() {
        errors.add("cart", msg::CART_EMPTY);
        return Ok(());
    }

    for item in &cart.items {
        let Some(ticket_type) = queries::get_ticket_type_by_id(conn, item.ticket_type_id)? else {
            errors.add("cart", msg::TICKET_TYPE_NOT_FOUND);
            continue;
        };
        match cart::check_capacity(conn, &ticket_type, item.quantity) {
            Ok(()) => {}
            Err(AppError::Validation(_)) => errors.add("cart", msg::NOT_ENOUGH_TICKETS),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// User-facing text for a failed initiation.
fn initiation_error_message(e: &GatewayError) -> String {
    match e {
        GatewayError::Declined(reason) => format!("Payment declined: {}", reason),
        GatewayError::Api { status, .. } => {
            format!("The payment provider rejected the request (status {})", status)
        }
        GatewayError::Timeout => "The payment provider did not respond in time".to_string(),
        other => format!("The payment could not be started: {}", other),
    }
}

async fn start_attempt(
    state: &AppState,
    session: &SessionId,
    gateway: &RegisteredGateway,
    cart: &Cart,
    billing: &BillingInfo,
    user_id: Option<String>,
) -> Result<CheckoutResult, CheckoutError> {
    let description = {
        let conn = state.db.get()?;
        let event_name = match cart.event_id {
            Some(event_id) => queries::get_event_by_id(&conn, event_id)?.map(|e| e.name),
            None => None,
        };
        match event_name {
            Some(name) => format!("{} ticket(s) for {}", cart.ticket_count(), name),
            None => format!("{} ticket(s)", cart.ticket_count()),
        }
    };

    let reference = EntityType::PaymentReference.gen_id();
    let request = InitiateRequest {
        reference: reference.clone(),
        amount_cents: cart.total_cents,
        currency: state.currency.clone(),
        description,
        billing: billing.clone(),
        return_url: append_query_params(
            &format!("{}/payment/callback/{}", state.base_url, gateway.name()),
            &[("reference", &reference)],
        ),
        cancel_url: format!("{}/payment/failed", state.base_url),
    };

    let initiation = tokio::time::timeout(state.gateway_timeout, gateway.gateway.initiate(&request));
    let initiated = match initiation.await.unwrap_or(Err(GatewayError::Timeout)) {
        Ok(initiated) => initiated,
        Err(e) => {
            tracing::warn!(
                "Payment initiation via {} failed for session {}: {}",
                gateway.name(),
                session.as_str(),
                e
            );
            return Err(CheckoutError::Invalid(FieldErrors::single(
                "general",
                initiation_error_message(&e),
            )));
        }
    };

    if initiated.status == Some(PaymentState::Failed) {
        tracing::info!("Payment {} declined inline by {}", initiated.payment_id, gateway.name());
        return Err(CheckoutError::Invalid(FieldErrors::single(
            "general",
            "Payment declined",
        )));
    }

    if gateway.capabilities.redirect && initiated.authorization_url.is_none() {
        tracing::error!(
            "Gateway {} returned no authorization URL for payment {}",
            gateway.name(),
            initiated.payment_id
        );
        return Err(CheckoutError::Invalid(FieldErrors::single(
            "general",
            "The payment could not be started",
        )));
    }

    let mut conn = state.db.get()?;
    let pending = queries::create_pending_payment(
        &conn,
        &CreatePendingPayment {
            payment_id: initiated.payment_id.clone(),
            reference,
            provider: gateway.name().to_string(),
            session_id: session.as_str().to_string(),
            user_id,
            cart: cart.clone(),
            billing: billing.clone(),
            authorization_url: initiated.authorization_url.clone(),
            ttl_secs: state.pending_payment_ttl_secs,
        },
    )?;
    queries::session_put(&conn, session.as_str(), PENDING_PAYMENT_KEY, &pending.payment_id)?;

    tracing::info!(
        "Payment {} started via {}: reference={}, total_cents={}",
        pending.payment_id,
        gateway.name(),
        pending.reference,
        cart.total_cents
    );

    if gateway.capabilities.redirect {
        return Ok(CheckoutResult::Redirect {
            payment_id: pending.payment_id,
            authorization_url: initiated.authorization_url.unwrap_or_default(),
        });
    }

    match initiated.status {
        Some(PaymentState::Success) => match reconcile::fulfill_pending(&mut conn, &state.carts, &pending) {
            Ok(fulfillment) => Ok(CheckoutResult::Confirmed(fulfillment.into_order())),
            Err(e) => {
                tracing::error!(
                    "Fulfillment failed for inline payment {}: {}",
                    pending.payment_id,
                    e
                );
                Ok(CheckoutResult::Unsettled {
                    payment_id: pending.payment_id,
                    page: StatusPage::Failed,
                })
            }
        },
        _ => Ok(CheckoutResult::Unsettled {
            payment_id: pending.payment_id,
            page: StatusPage::Pending,
        }),
    }
}
