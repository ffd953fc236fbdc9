use serde::{Deserialize, Serialize};

use crate::cart::Cart;

use super::BillingInfo;

/// Links one gateway payment attempt to the cart and billing info that produced it.
///
/// Stored durably and keyed by the gateway's payment id, so both the browser
/// callback and the session-less notification can find it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayment {
    pub payment_id: String,
    /// Merchant reference minted for this attempt
    pub reference: String,
    pub provider: String,
    pub session_id: String,
    pub user_id: Option<String>,
    /// Cart as it was at checkout time
    pub cart: Cart,
    pub billing: BillingInfo,
    /// Where to send the browser to authorize (redirect-based gateways only)
    pub authorization_url: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl PendingPayment {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct CreatePendingPayment {
    pub payment_id: String,
    pub reference: String,
    pub provider: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub cart: Cart,
    pub billing: BillingInfo,
    pub authorization_url: Option<String>,
    pub ttl_secs: i64,
}
