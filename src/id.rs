//! Identifier and code generation.
//!
//! Merchant-side IDs use a `bo_` brand prefix so they never collide with
//! provider IDs (Stripe's `cs_`, `pi_`, etc.).
//!
//! Format: `bo_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

/// Longest tracking identifier accepted from a callback or notification.
const MAX_TRACKING_ID_LEN: usize = 255;

/// Entity types that have prefixed IDs.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    /// Merchant reference sent to the gateway, one per payment attempt.
    PaymentReference,
    /// Browser session.
    Session,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PaymentReference => "bo_ref",
            Self::Session => "bo_ses",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }

    /// Cheap format check to reject garbage before hitting the database.
    pub fn is_valid(&self, s: &str) -> bool {
        let Some(hex_part) = s
            .strip_prefix(self.prefix())
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            return false;
        };
        hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
    }
}

/// Sanity check for provider tracking identifiers arriving from untrusted requests.
///
/// The gateway is always asked about the id afterwards; this only keeps junk
/// (empty strings, control characters, megabyte-long values) out of queries and logs.
pub fn is_plausible_tracking_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_TRACKING_ID_LEN
        && s.chars().all(|c| c.is_ascii_graphic())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Human-facing order number: `BO-` followed by 12 uppercase hex characters.
pub fn order_number() -> String {
    format!("BO-{}", random_hex(6).to_uppercase())
}

/// Scannable ticket code: `TKT-{orderId}-{ticketTypeId}-{unixTimestamp}-{32 hex}`.
///
/// Uniqueness comes from the 128-bit random suffix, so codes minted by a retried
/// fulfillment never collide with an earlier attempt.
pub fn ticket_code(order_id: i64, ticket_type_id: i64, timestamp: i64) -> String {
    format!(
        "TKT-{}-{}-{}-{}",
        order_id,
        ticket_type_id,
        timestamp,
        random_hex(16)
    )
}
