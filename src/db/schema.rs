use rusqlite::Connection;

/// Initialize the database schema. Safe to run on every startup.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    // File databases switch to WAL; in-memory ones report "memory" and stay as they are.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

    conn.execute_batch(
        r#"
        -- Catalog (managed by admin tooling, read-only for checkout)
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            starts_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- capacity NULL = unlimited
        CREATE TABLE IF NOT EXISTS ticket_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL CHECK (price_cents >= 0),
            capacity INTEGER CHECK (capacity IS NULL OR capacity >= 0),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ticket_types_event ON ticket_types(event_id);

        -- Server-side session values (cart JSON, pending payment pointer, user id)
        CREATE TABLE IF NOT EXISTS session_values (
            session_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (session_id, key)
        );
        CREATE INDEX IF NOT EXISTS idx_session_values_updated ON session_values(updated_at);

        -- One row per gateway payment attempt, keyed by the gateway's payment id.
        -- Readable without a browser session so notifications can fulfill.
        CREATE TABLE IF NOT EXISTS pending_payments (
            payment_id TEXT PRIMARY KEY,
            reference TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            session_id TEXT NOT NULL,
            user_id TEXT,
            cart_json TEXT NOT NULL,
            billing_email TEXT NOT NULL,
            billing_name TEXT NOT NULL,
            authorization_url TEXT,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_payments_expires ON pending_payments(expires_at);

        -- payment_id UNIQUE is the fulfillment idempotency key
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT,
            event_id INTEGER NOT NULL REFERENCES events(id),
            order_number TEXT NOT NULL UNIQUE,
            total_cents INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'cancelled', 'failed')),
            provider TEXT NOT NULL,
            payment_id TEXT NOT NULL UNIQUE,
            billing_email TEXT NOT NULL,
            billing_name TEXT NOT NULL,
            session_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            reference TEXT UNIQUE
        );
        CREATE INDEX IF NOT EXISTS idx_orders_session ON orders(session_id);

        CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            ticket_type_id INTEGER NOT NULL REFERENCES ticket_types(id),
            code TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK (status IN ('active', 'refunded')),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tickets_order ON tickets(order_id);
        CREATE INDEX IF NOT EXISTS idx_tickets_type_status ON tickets(ticket_type_id, status);
        "#,
    )
}
