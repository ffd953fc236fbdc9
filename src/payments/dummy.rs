use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::http::HeaderMap;
use uuid::Uuid;

use super::gateway::{
    GatewayCapabilities, GatewayError, InitiateRequest, Initiated, Notification, PaymentGateway,
    PaymentState, PaymentStatus,
};

/// Billing addresses on this domain are declined.
pub const DECLINE_DOMAIN: &str = "decline.test";

/// Payments remembered for status queries before the oldest are forgotten.
const DEFAULT_LEDGER_LIMIT: usize = 10_000;

#[derive(Debug, Default)]
struct Ledger {
    statuses: HashMap<String, PaymentStatus>,
    order: VecDeque<String>,
}

/// Synchronous in-process gateway for development and tests.
///
/// Payments settle during `initiate`; no money moves and nothing is redirected.
/// Only the most recent payments can be queried afterwards.
#[derive(Debug)]
pub struct DummyGateway {
    ledger: Mutex<Ledger>,
    limit: usize,
}

impl Default for DummyGateway {
    fn default() -> Self {
        Self::with_limit(DEFAULT_LEDGER_LIMIT)
    }
}

impl DummyGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            limit: limit.max(1),
        }
    }

    fn remember(&self, status: PaymentStatus) {
        let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        while ledger.order.len() >= self.limit {
            match ledger.order.pop_front() {
                Some(oldest) => {
                    ledger.statuses.remove(&oldest);
                }
                None => break,
            }
        }
        ledger.order.push_back(status.payment_id.clone());
        ledger.statuses.insert(status.payment_id.clone(), status);
    }
}

#[async_trait]
impl PaymentGateway for DummyGateway {
    fn name(&self) -> &str {
        "dummy"
    }

    fn capabilities(&self) -> GatewayCapabilities {
        GatewayCapabilities {
            redirect: false,
            reusable_authorization: false,
        }
    }

    async fn initiate(&self, request: &InitiateRequest) -> Result<Initiated, GatewayError> {
        let payment_id = format!("dummy_{}", Uuid::new_v4().as_simple());

        let declined = request
            .billing
            .email
            .rsplit_once('@')
            .is_some_and(|(_, domain)| domain.eq_ignore_ascii_case(DECLINE_DOMAIN));

        if declined {
            self.remember(PaymentStatus {
                payment_id,
                state: PaymentState::Failed,
                amount_cents: Some(request.amount_cents),
            });
            return Err(GatewayError::Declined("card declined".into()));
        }

        self.remember(PaymentStatus {
            payment_id: payment_id.clone(),
            state: PaymentState::Success,
            amount_cents: Some(request.amount_cents),
        });

        Ok(Initiated {
            payment_id,
            authorization_url: None,
            status: Some(PaymentState::Success),
        })
    }

    async fn query_status(&self, payment_id: &str) -> Result<PaymentStatus, GatewayError> {
        let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
        ledger
            .statuses
            .get(payment_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                body: format!("no such payment: {}", payment_id),
            })
    }

    fn handle_notification(
        &self,
        _headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<Notification, GatewayError> {
        Err(GatewayError::BadPayload(
            "dummy gateway does not send notifications".into(),
        ))
    }
}
