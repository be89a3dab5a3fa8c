//! Database schema for the SQLite key-value store

/// SQL schema for the store
pub const SCHEMA_SQL: &str = r#"
-- Policy, proxy and preference entries
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at);

-- Monotonic counters (incr)
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL DEFAULT 0
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
