use serde::{Deserialize, Serialize};

/// A ticketed event. Managed by the admin tooling; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub starts_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEvent {
    pub name: String,
    pub starts_at: i64,
}

/// A purchasable ticket category of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: i64,
    pub event_id: i64,
    pub name: String,
    /// Unit price in minor currency units
    pub price_cents: i64,
    /// Total tickets that may ever be issued (None = unlimited)
    pub capacity: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketType {
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub capacity: Option<i64>,
}
