mod dummy;
mod gateway;
mod stripe;

pub use dummy::*;
pub use gateway::*;
pub use stripe::*;

use std::collections::BTreeMap;
use std::sync::Arc;

/// A gateway together with the capabilities it declared when registered.
#[derive(Clone)]
pub struct RegisteredGateway {
    pub gateway: Arc<dyn PaymentGateway>,
    pub capabilities: GatewayCapabilities,
}

impl RegisteredGateway {
    pub fn name(&self) -> &str {
        self.gateway.name()
    }
}

/// Gateways available to this deployment, keyed by provider name.
///
/// Capabilities are captured once here; request paths branch on the stored
/// flags and never inspect the concrete gateway type.
#[derive(Clone, Default)]
pub struct Gateways {
    by_name: BTreeMap<String, RegisteredGateway>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        let name = gateway.name().to_lowercase();
        let capabilities = gateway.capabilities();
        tracing::info!(
            "Registered payment gateway {} (redirect={}, reusable_authorization={})",
            name,
            capabilities.redirect,
            capabilities.reusable_authorization
        );
        self.by_name.insert(
            name,
            RegisteredGateway {
                gateway,
                capabilities,
            },
        );
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&RegisteredGateway> {
        self.by_name.get(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Append URL-encoded query parameters to a URL that may already have a query string.
pub fn append_query_params(base_url: &str, params: &[(&str, &str)]) -> String {
    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}
