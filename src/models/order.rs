use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::Ticket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

/// A paid order. `payment_id` is unique: one order per gateway payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: Option<String>,
    pub event_id: i64,
    pub order_number: String,
    /// Fixed from the cart snapshot at creation, never recomputed from tickets
    pub total_cents: i64,
    pub status: OrderStatus,
    pub provider: String,
    pub payment_id: String,
    pub billing_email: String,
    pub billing_name: String,
    /// Browser session the checkout started from (None when created out-of-band)
    #[serde(skip_serializing)]
    pub session_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Merchant reference of the payment attempt that produced the order
    #[serde(skip_serializing)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Option<String>,
    pub event_id: i64,
    pub total_cents: i64,
    pub provider: String,
    pub payment_id: String,
    pub billing_email: String,
    pub billing_name: String,
    pub session_id: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithTickets {
    #[serde(flatten)]
    pub order: Order,
    pub tickets: Vec<Ticket>,
}
