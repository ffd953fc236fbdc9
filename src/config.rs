use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub dev_mode: bool,
    /// Cart lifetime, reset on every mutation.
    pub cart_ttl_secs: i64,
    /// How long a pending payment snapshot survives without being reconciled.
    pub pending_payment_ttl_secs: i64,
    /// Upper bound on a single gateway status query.
    pub gateway_timeout: Duration,
    /// ISO currency code (lowercase) for every charge.
    pub currency: String,
    /// Session values untouched for longer than this are purged.
    pub session_ttl_days: i64,
    pub stripe: Option<StripeSettings>,
    pub dummy_gateway: bool,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BOXOFFICE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_parse("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        // Stripe is only registered when both secrets are present.
        let stripe = match (
            env::var("STRIPE_SECRET_KEY").ok(),
            env::var("STRIPE_WEBHOOK_SECRET").ok(),
        ) {
            (Some(secret_key), Some(webhook_secret)) => Some(StripeSettings {
                secret_key,
                webhook_secret,
                api_base: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            }),
            _ => None,
        };

        let dummy_gateway = env::var("DUMMY_GATEWAY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(dev_mode);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "boxoffice.db".to_string()),
            base_url,
            dev_mode,
            cart_ttl_secs: env_parse("CART_TTL_SECS", 15 * 60),
            pending_payment_ttl_secs: env_parse("PENDING_PAYMENT_TTL_SECS", 24 * 60 * 60),
            gateway_timeout: Duration::from_secs(env_parse("GATEWAY_TIMEOUT_SECS", 10)),
            currency: env::var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "eur".to_string()),
            session_ttl_days: env_parse("SESSION_TTL_DAYS", 7),
            stripe,
            dummy_gateway,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
