use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::sync::Arc;
use std::time::Duration;

use boxoffice::cart::CartStore;
use boxoffice::config::Config;
use boxoffice::db::{AppState, create_pool, init_db, queries};
use boxoffice::handlers;
use boxoffice::models::{CreateEvent, CreateTicketType};
use boxoffice::payments::{DummyGateway, Gateways, StripeGateway};
use boxoffice::reconcile::{self, Channel, ReconcileOutcome};

#[derive(Parser, Debug)]
#[command(name = "boxoffice")]
#[command(about = "Timed-inventory ticket sales with reconciled payment completion")]
struct Cli {
    /// Seed the database with a demo event and ticket types (dev mode only)
    #[arg(long)]
    seed: bool,

    /// Reconcile one payment against its gateway, print the outcome and exit
    #[arg(long, value_name = "PAYMENT_ID", requires = "provider")]
    reconcile: Option<String>,

    /// Gateway the payment belongs to (for --reconcile)
    #[arg(long, requires = "reconcile")]
    provider: Option<String>,
}

fn build_gateways(config: &Config) -> Gateways {
    let mut gateways = Gateways::new();
    if let Some(ref stripe) = config.stripe {
        gateways.register(Arc::new(StripeGateway::new(stripe)));
    }
    if config.dummy_gateway {
        gateways.register(Arc::new(DummyGateway::new()));
    }
    if gateways.is_empty() {
        tracing::warn!("No payment gateway configured; checkout will reject every payment method");
    }
    gateways
}

/// Seeds a demo event for local testing. Skipped if any event exists.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count = queries::count_events(&conn).expect("Failed to count events");
    if count > 0 {
        tracing::info!("Database already has events, skipping seed");
        return;
    }

    let event = queries::create_event(
        &conn,
        &CreateEvent {
            name: "Demo Night".to_string(),
            starts_at: queries::now() + 30 * 86400,
        },
    )
    .expect("Failed to create demo event");

    let general = queries::create_ticket_type(
        &conn,
        event.id,
        &CreateTicketType {
            name: "General Admission".to_string(),
            price_cents: 2500,
            capacity: Some(200),
        },
    )
    .expect("Failed to create ticket type");

    let vip = queries::create_ticket_type(
        &conn,
        event.id,
        &CreateTicketType {
            name: "VIP".to_string(),
            price_cents: 7500,
            capacity: Some(20),
        },
    )
    .expect("Failed to create ticket type");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED");
    tracing::info!("Event: {} (id: {})", event.name, event.id);
    tracing::info!("Ticket type: {} (id: {}, {} cents)", general.name, general.id, general.price_cents);
    tracing::info!("Ticket type: {} (id: {}, {} cents)", vip.name, vip.id, vip.price_cents);
    tracing::info!("============================================");
}

/// Manual recovery: run the notification path once for a payment.
async fn reconcile_once(state: &AppState, payment_id: &str, provider: &str) -> Result<(), String> {
    let gateway = state
        .gateways
        .get(provider)
        .ok_or_else(|| format!("Gateway {} is not configured", provider))?;

    let outcome = reconcile::reconcile(state, gateway, payment_id, Channel::Notification)
        .await
        .map_err(|e| format!("Reconciliation failed: {}", e))?;

    match &outcome {
        ReconcileOutcome::Completed(order) | ReconcileOutcome::AlreadyCompleted(order) => {
            println!(
                "{}: order {} ({} tickets, {} cents)",
                outcome.page().as_str(),
                order.order.order_number,
                order.tickets.len(),
                order.order.total_cents
            );
        }
        other => println!("{}: {:?}", other.page().as_str(), other),
    }
    Ok(())
}

/// Spawns a background task that purges expired pending payments and stale sessions.
/// Runs every 5 minutes.
fn spawn_cleanup_task(state: AppState, session_ttl_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60);
        loop {
            tokio::time::sleep(interval).await;
            let conn = match state.db.get() {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                    continue;
                }
            };
            match queries::purge_expired_pending_payments(&conn) {
                Ok(count) if count > 0 => {
                    tracing::debug!("Purged {} expired pending payments", count);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to purge pending payments: {}", e),
            }
            match queries::purge_stale_session_values(&conn, session_ttl_days) {
                Ok(count) if count > 0 => {
                    tracing::debug!("Purged {} stale session values", count);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to purge session values: {}", e),
            }
        }
    });
    tracing::info!("Background cleanup task started (runs every 5 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
        gateways: Arc::new(build_gateways(&config)),
        carts: CartStore::new(config.cart_ttl_secs),
        pending_payment_ttl_secs: config.pending_payment_ttl_secs,
        gateway_timeout: config.gateway_timeout,
        currency: config.currency.clone(),
    };

    if let (Some(payment_id), Some(provider)) = (cli.reconcile.as_deref(), cli.provider.as_deref()) {
        if let Err(e) = reconcile_once(&state, payment_id, provider).await {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
        return;
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BOXOFFICE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_cleanup_task(state.clone(), config.session_ttl_days);

    let app = handlers::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Boxoffice server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
