//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to define how they are built from a row selected
//! with the matching `*_COLS` constant, then use `query_one` / `query_all`.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors.
///
/// Invalid stored values (corruption, manual edits) surface as query errors
/// instead of panics.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Deserialize a JSON text column.
fn parse_json<T: serde::de::DeserializeOwned>(row: &Row, col: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(col)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const EVENT_COLS: &str = "id, name, starts_at, created_at";

pub const TICKET_TYPE_COLS: &str = "id, event_id, name, price_cents, capacity, created_at";

pub const PENDING_PAYMENT_COLS: &str = "payment_id, reference, provider, session_id, user_id, cart_json, billing_email, billing_name, authorization_url, created_at, expires_at";

pub const ORDER_COLS: &str = "id, user_id, event_id, order_number, total_cents, status, provider, payment_id, billing_email, billing_name, session_id, created_at, updated_at, reference";

pub const TICKET_COLS: &str = "id, order_id, ticket_type_id, code, status, created_at";

// ============ FromRow Implementations ============

impl FromRow for Event {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Event {
            id: row.get(0)?,
            name: row.get(1)?,
            starts_at: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

impl FromRow for TicketType {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(TicketType {
            id: row.get(0)?,
            event_id: row.get(1)?,
            name: row.get(2)?,
            price_cents: row.get(3)?,
            capacity: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl FromRow for PendingPayment {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(PendingPayment {
            payment_id: row.get(0)?,
            reference: row.get(1)?,
            provider: row.get(2)?,
            session_id: row.get(3)?,
            user_id: row.get(4)?,
            cart: parse_json(row, 5)?,
            billing: BillingInfo {
                email: row.get(6)?,
                name: row.get(7)?,
            },
            authorization_url: row.get(8)?,
            created_at: row.get(9)?,
            expires_at: row.get(10)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            user_id: row.get(1)?,
            event_id: row.get(2)?,
            order_number: row.get(3)?,
            total_cents: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            provider: row.get(6)?,
            payment_id: row.get(7)?,
            billing_email: row.get(8)?,
            billing_name: row.get(9)?,
            session_id: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            reference: row.get(13)?,
        })
    }
}

impl FromRow for Ticket {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Ticket {
            id: row.get(0)?,
            order_id: row.get(1)?,
            ticket_type_id: row.get(2)?,
            code: row.get(3)?,
            status: parse_enum(row, 4, "status")?,
            created_at: row.get(5)?,
        })
    }
}
