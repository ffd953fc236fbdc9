use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Refunded,
}

/// One issued, scannable ticket. Only ever created by order fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub order_id: i64,
    pub ticket_type_id: i64,
    /// Globally unique, never reused (not even after a refund)
    pub code: String,
    pub status: TicketStatus,
    pub created_at: i64,
}
