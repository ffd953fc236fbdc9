use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    EVENT_COLS, ORDER_COLS, PENDING_PAYMENT_COLS, TICKET_COLS, TICKET_TYPE_COLS, query_all,
    query_one,
};

/// Current unix timestamp in seconds.
pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Catalog ============

pub fn create_event(conn: &Connection, input: &CreateEvent) -> Result<Event> {
    let now = now();
    conn.execute(
        "INSERT INTO events (name, starts_at, created_at) VALUES (?1, ?2, ?3)",
        params![&input.name, input.starts_at, now],
    )?;
    Ok(Event {
        id: conn.last_insert_rowid(),
        name: input.name.clone(),
        starts_at: input.starts_at,
        created_at: now,
    })
}

pub fn count_events(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
        .map_err(Into::into)
}

pub fn get_event_by_id(conn: &Connection, id: i64) -> Result<Option<Event>> {
    query_one(
        conn,
        &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLS),
        &[&id],
    )
}

pub fn create_ticket_type(
    conn: &Connection,
    event_id: i64,
    input: &CreateTicketType,
) -> Result<TicketType> {
    let now = now();
    conn.execute(
        "INSERT INTO ticket_types (event_id, name, price_cents, capacity, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event_id, &input.name, input.price_cents, input.capacity, now],
    )?;
    Ok(TicketType {
        id: conn.last_insert_rowid(),
        event_id,
        name: input.name.clone(),
        price_cents: input.price_cents,
        capacity: input.capacity,
        created_at: now,
    })
}

pub fn get_ticket_type_by_id(conn: &Connection, id: i64) -> Result<Option<TicketType>> {
    query_one(
        conn,
        &format!("SELECT {} FROM ticket_types WHERE id = ?1", TICKET_TYPE_COLS),
        &[&id],
    )
}

/// Tickets issued for a type that still count against its capacity.
pub fn count_active_tickets_for_type(conn: &Connection, ticket_type_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM tickets WHERE ticket_type_id = ?1 AND status = 'active'",
        params![ticket_type_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Session Values ============

pub fn session_get(conn: &Connection, session_id: &str, key: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT value FROM session_values WHERE session_id = ?1 AND key = ?2",
        params![session_id, key],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

pub fn session_put(conn: &Connection, session_id: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO session_values (session_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![session_id, key, value, now()],
    )?;
    Ok(())
}

pub fn session_remove(conn: &Connection, session_id: &str, key: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM session_values WHERE session_id = ?1 AND key = ?2",
        params![session_id, key],
    )?;
    Ok(deleted > 0)
}

/// Remove a session value only if it still holds `expected`.
/// Returns false when a newer value has replaced it in the meantime.
pub fn session_remove_if(
    conn: &Connection,
    session_id: &str,
    key: &str,
    expected: &str,
) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM session_values WHERE session_id = ?1 AND key = ?2 AND value = ?3",
        params![session_id, key, expected],
    )?;
    Ok(deleted > 0)
}

/// Purge values of sessions nobody has touched within the retention period.
/// Returns the number of deleted records.
pub fn purge_stale_session_values(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - (retention_days * 86400);
    let deleted = conn.execute(
        "DELETE FROM session_values WHERE session_id IN (
            SELECT session_id FROM session_values GROUP BY session_id HAVING MAX(updated_at) < ?1
        )",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ============ Pending Payments ============

pub fn create_pending_payment(
    conn: &Connection,
    input: &CreatePendingPayment,
) -> Result<PendingPayment> {
    let now = now();
    let expires_at = now + input.ttl_secs;
    let cart_json = serde_json::to_string(&input.cart)?;

    conn.execute(
        &format!(
            "INSERT INTO pending_payments ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            PENDING_PAYMENT_COLS
        ),
        params![
            &input.payment_id,
            &input.reference,
            &input.provider,
            &input.session_id,
            &input.user_id,
            &cart_json,
            &input.billing.email,
            &input.billing.name,
            &input.authorization_url,
            now,
            expires_at,
        ],
    )?;

    Ok(PendingPayment {
        payment_id: input.payment_id.clone(),
        reference: input.reference.clone(),
        provider: input.provider.clone(),
        session_id: input.session_id.clone(),
        user_id: input.user_id.clone(),
        cart: input.cart.clone(),
        billing: input.billing.clone(),
        authorization_url: input.authorization_url.clone(),
        created_at: now,
        expires_at,
    })
}

pub fn get_pending_payment(conn: &Connection, payment_id: &str) -> Result<Option<PendingPayment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM pending_payments WHERE payment_id = ?1",
            PENDING_PAYMENT_COLS
        ),
        &[&payment_id],
    )
}

pub fn get_pending_payment_by_reference(
    conn: &Connection,
    reference: &str,
) -> Result<Option<PendingPayment>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM pending_payments WHERE reference = ?1",
            PENDING_PAYMENT_COLS
        ),
        &[&reference],
    )
}

pub fn delete_pending_payment(conn: &Connection, payment_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM pending_payments WHERE payment_id = ?1",
        params![payment_id],
    )?;
    Ok(deleted > 0)
}

/// Purge pending payments nobody reconciled before they expired.
/// Returns the number of deleted records.
///
/// A record whose order exists but never completed is kept past its expiry: the
/// snapshot is the only copy of the line items a retry needs.
pub fn purge_expired_pending_payments(conn: &Connection) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM pending_payments
         WHERE expires_at < ?1
           AND payment_id NOT IN (
               SELECT payment_id FROM orders WHERE status IN ('pending', 'failed')
           )",
        params![now()],
    )?;
    Ok(deleted)
}

// ============ Orders ============

/// Insert a `pending` order unless one already exists for the payment id or order number.
///
/// Returns true if this call inserted the row. The unique `payment_id` makes
/// concurrent fulfillments of the same payment collapse onto one row.
pub fn try_insert_order(conn: &Connection, input: &CreateOrder, order_number: &str) -> Result<bool> {
    let now = now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO orders (user_id, event_id, order_number, total_cents, status, provider,
                                       payment_id, billing_email, billing_name, session_id, created_at, updated_at,
                                       reference)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?11)",
        params![
            &input.user_id,
            input.event_id,
            order_number,
            input.total_cents,
            &input.provider,
            &input.payment_id,
            &input.billing_email,
            &input.billing_name,
            &input.session_id,
            now,
            &input.reference,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_order_by_payment_id(conn: &Connection, payment_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE payment_id = ?1", ORDER_COLS),
        &[&payment_id],
    )
}

/// The order a payment attempt produced, found by the merchant reference we sent.
pub fn get_order_by_reference(conn: &Connection, reference: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE reference = ?1", ORDER_COLS),
        &[&reference],
    )
}

pub fn get_order_by_number(conn: &Connection, order_number: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE order_number = ?1", ORDER_COLS),
        &[&order_number],
    )
}

pub fn get_order_by_id(conn: &Connection, id: i64) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        &[&id],
    )
}

/// Move a non-completed order to `status`. A completed order is never demoted.
pub fn set_order_status(conn: &Connection, id: i64, status: OrderStatus) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status != 'completed'",
        params![status.as_ref(), now(), id],
    )?;
    Ok(affected > 0)
}

/// Atomically mark an order completed.
///
/// Returns true if this call performed the transition, false if the order was
/// already completed (or cancelled) by someone else.
pub fn try_complete_order(conn: &Connection, id: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'completed', updated_at = ?1
         WHERE id = ?2 AND status IN ('pending', 'failed')",
        params![now(), id],
    )?;
    Ok(affected > 0)
}

pub fn get_order_with_tickets(conn: &Connection, order_number: &str) -> Result<Option<OrderWithTickets>> {
    let Some(order) = get_order_by_number(conn, order_number)? else {
        return Ok(None);
    };
    let tickets = list_tickets_for_order(conn, order.id)?;
    Ok(Some(OrderWithTickets { order, tickets }))
}

// ============ Tickets ============

pub fn create_ticket(
    conn: &Connection,
    order_id: i64,
    ticket_type_id: i64,
    code: &str,
) -> Result<Ticket> {
    let now = now();
    conn.execute(
        "INSERT INTO tickets (order_id, ticket_type_id, code, status, created_at)
         VALUES (?1, ?2, ?3, 'active', ?4)",
        params![order_id, ticket_type_id, code, now],
    )?;
    Ok(Ticket {
        id: conn.last_insert_rowid(),
        order_id,
        ticket_type_id,
        code: code.to_string(),
        status: TicketStatus::Active,
        created_at: now,
    })
}

pub fn list_tickets_for_order(conn: &Connection, order_id: i64) -> Result<Vec<Ticket>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM tickets WHERE order_id = ?1 ORDER BY id",
            TICKET_COLS
        ),
        &[&order_id],
    )
}
