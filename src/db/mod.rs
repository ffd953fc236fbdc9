mod from_row;
pub mod queries;
mod schema;

pub use schema::init_db;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::cart::CartStore;
use crate::payments::Gateways;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Base URL for gateway return URLs (e.g., https://tickets.example.com)
    pub base_url: String,
    /// Gateways registered at startup, keyed by provider name
    pub gateways: Arc<Gateways>,
    pub carts: CartStore,
    pub pending_payment_ttl_secs: i64,
    /// Upper bound on one gateway status query during reconciliation
    pub gateway_timeout: Duration,
    pub currency: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // Concurrent writers wait on the lock instead of failing with SQLITE_BUSY.
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
    });
    Pool::builder().max_size(10).build(manager)
}
