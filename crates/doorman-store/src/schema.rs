use rusqlite::Connection;

/// Stored in `PRAGMA user_version` once the schema is applied.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    id             TEXT NOT NULL UNIQUE,
    name           TEXT,
    email          TEXT,
    phone          TEXT,
    embedding      TEXT,
    status         TEXT,
    enrolled_at    TEXT,
    provider_model TEXT
);

CREATE TABLE IF NOT EXISTS audit_log (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp      TEXT NOT NULL,
    authorized     INTEGER NOT NULL,
    identity_id    TEXT NOT NULL,
    identity_name  TEXT NOT NULL,
    confidence     REAL NOT NULL,
    reason         TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log (timestamp);
";

/// Idempotent: safe to run on every open.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::info!(from = version, to = SCHEMA_VERSION, "database schema applied");
    }
    Ok(())
}
