//! Order fulfillment: turns a verified payment and its cart snapshot into an
//! order with issued tickets, exactly once per payment id.
//!
//! Two layers of protection make repeated or concurrent calls collapse onto a
//! single order:
//! - `orders.payment_id` is UNIQUE and the order row is created with
//!   `INSERT OR IGNORE`, so every caller ends up looking at the same row.
//! - Ticket issuance and the `pending -> completed` transition run inside one
//!   `BEGIN IMMEDIATE` transaction that re-reads the order status first, so
//!   only one caller ever issues tickets.

use rusqlite::{Connection, TransactionBehavior};

use crate::cart::Cart;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::id;
use crate::models::{BillingInfo, CreateOrder, Order, OrderStatus, OrderWithTickets};

/// Attempts at finding an unused order number before giving up.
const ORDER_NUMBER_ATTEMPTS: usize = 3;

/// Everything needed to fulfill one payment.
#[derive(Debug, Clone, Copy)]
pub struct FulfillmentRequest<'a> {
    /// Idempotency key
    pub payment_id: &'a str,
    pub provider: &'a str,
    pub cart: &'a Cart,
    pub billing: &'a BillingInfo,
    pub user_id: Option<&'a str>,
    /// Session the checkout started from, if known
    pub session_id: Option<&'a str>,
    /// Merchant reference of the attempt, kept so a late callback can find the order
    pub reference: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub enum Fulfillment {
    /// This call issued the tickets.
    Created(OrderWithTickets),
    /// Someone else already did; nothing changed.
    AlreadyFulfilled(OrderWithTickets),
}

impl Fulfillment {
    pub fn order(&self) -> &OrderWithTickets {
        match self {
            Fulfillment::Created(o) | Fulfillment::AlreadyFulfilled(o) => o,
        }
    }

    pub fn into_order(self) -> OrderWithTickets {
        match self {
            Fulfillment::Created(o) | Fulfillment::AlreadyFulfilled(o) => o,
        }
    }
}

/// Create the order for `request.payment_id` and issue its tickets.
///
/// Safe to call any number of times, from any number of threads, for the same
/// payment id. A call that finds the order already completed returns it as
/// `AlreadyFulfilled`. If issuance fails partway the order is left `failed`
/// with no tickets and a later call retries it in place.
pub fn complete(conn: &mut Connection, request: &FulfillmentRequest<'_>) -> Result<Fulfillment> {
    let event_id = match request.cart.event_id {
        Some(event_id) if !request.cart.is_empty() => event_id,
        _ => {
            return Err(AppError::BadRequest(format!(
                "Cart snapshot for payment {} is empty",
                request.payment_id
            )));
        }
    };

    let order = ensure_order(conn, request, event_id)?;

    match order.status {
        OrderStatus::Completed => return already_fulfilled(conn, order),
        OrderStatus::Cancelled => {
            return Err(AppError::Conflict(format!(
                "Order {} for payment {} was cancelled",
                order.order_number, request.payment_id
            )));
        }
        OrderStatus::Pending | OrderStatus::Failed => {}
    }

    match issue_tickets(conn, &order, request.cart) {
        Ok(Some(fulfilled)) => {
            tracing::info!(
                "Order {} completed: payment={}, tickets={}, total_cents={}",
                fulfilled.order.order_number,
                request.payment_id,
                fulfilled.tickets.len(),
                fulfilled.order.total_cents
            );
            Ok(Fulfillment::Created(fulfilled))
        }
        Ok(None) => {
            let order = queries::get_order_by_id(conn, order.id)?
                .ok_or_else(|| AppError::Internal(format!("Order {} vanished", order.id)))?;
            already_fulfilled(conn, order)
        }
        Err(e) => {
            tracing::error!(
                "Ticket issuance failed for order {} (payment {}): {}",
                order.order_number,
                request.payment_id,
                e
            );
            if let Err(mark_err) = queries::set_order_status(conn, order.id, OrderStatus::Failed) {
                tracing::error!("Failed to mark order {} failed: {}", order.id, mark_err);
            }
            Err(e)
        }
    }
}

fn already_fulfilled(conn: &Connection, order: Order) -> Result<Fulfillment> {
    tracing::debug!(
        "Payment {} already fulfilled as order {}",
        order.payment_id,
        order.order_number
    );
    let tickets = queries::list_tickets_for_order(conn, order.id)?;
    Ok(Fulfillment::AlreadyFulfilled(OrderWithTickets { order, tickets }))
}

/// Find or create the order row for this payment.
///
/// The row is committed on its own, so a failed issuance still leaves an order
/// that can be looked up by payment id.
fn ensure_order(
    conn: &Connection,
    request: &FulfillmentRequest<'_>,
    event_id: i64,
) -> Result<Order> {
    let input = CreateOrder {
        user_id: request.user_id.map(str::to_string),
        event_id,
        total_cents: request.cart.total_cents,
        provider: request.provider.to_string(),
        payment_id: request.payment_id.to_string(),
        billing_email: request.billing.email.clone(),
        billing_name: request.billing.name.clone(),
        session_id: request.session_id.map(str::to_string),
        reference: request.reference.map(str::to_string),
    };

    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        if queries::try_insert_order(conn, &input, &id::order_number())? {
            tracing::debug!("Created pending order for payment {}", request.payment_id);
        }
        // Either we inserted it, someone else did, or the order number collided.
        if let Some(order) = queries::get_order_by_payment_id(conn, request.payment_id)? {
            return Ok(order);
        }
    }

    Err(AppError::Internal(format!(
        "Could not allocate an order number for payment {}",
        request.payment_id
    )))
}

/// Issue every ticket of the cart and complete the order, all or nothing.
///
/// Returns `None` if another caller completed the order first.
fn issue_tickets(conn: &mut Connection, order: &Order, cart: &Cart) -> Result<Option<OrderWithTickets>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    // Re-check under the write lock: a concurrent caller may have finished while we waited.
    let current = queries::get_order_by_id(&tx, order.id)?
        .ok_or_else(|| AppError::Internal(format!("Order {} vanished", order.id)))?;
    if current.status == OrderStatus::Completed {
        return Ok(None);
    }

    let timestamp = queries::now();
    let mut tickets = Vec::with_capacity(cart.ticket_count().max(0) as usize);
    for item in &cart.items {
        for _ in 0..item.quantity {
            let code = id::ticket_code(order.id, item.ticket_type_id, timestamp);
            tickets.push(queries::create_ticket(&tx, order.id, item.ticket_type_id, &code)?);
        }
    }

    if !queries::try_complete_order(&tx, order.id)? {
        return Ok(None);
    }

    let completed = queries::get_order_by_id(&tx, order.id)?
        .ok_or_else(|| AppError::Internal(format!("Order {} vanished", order.id)))?;

    tx.commit()?;

    Ok(Some(OrderWithTickets {
        order: completed,
        tickets,
    }))
}
