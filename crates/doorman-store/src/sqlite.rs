use crate::schema::apply_schema;
use doorman_core::{
    format_timestamp, parse_timestamp, AuditEntry, AuditLog, AuditOrder, AuditRecord, GalleryStore,
    Identity, IdentityPatch, RawIdentityRecord, StoreError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const IDENTITY_COLUMNS: &str = "id, name, email, phone, embedding, status, enrolled_at, provider_model";

/// SQLite-backed gallery store and audit log.
///
/// Thread-safe via an internal `Mutex<Connection>`; every call holds the
/// lock for its whole duration.
pub struct SqliteStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(unavailable)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(unavailable)?;
        apply_schema(&conn).map_err(unavailable)?;
        tracing::info!(path = %path.display(), journal_mode = %mode, "database opened");

        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(unavailable)?;
        apply_schema(&conn).map_err(unavailable)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `PRAGMA quick_check`.
    pub fn integrity_check(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let result: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(unavailable)?;
        if result == "ok" {
            Ok(())
        } else {
            Err(StoreError::Corrupt(result))
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))
    }
}

fn unavailable(err: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<RawIdentityRecord> {
    let id: String = row.get(0)?;
    let embedding_text: Option<String> = row.get(4)?;
    // An unreadable embedding leaves the record in the store but out of any index.
    let embedding = embedding_text.and_then(|text| match serde_json::from_str::<Vec<f32>>(&text) {
        Ok(values) => Some(values),
        Err(e) => {
            tracing::warn!(identity = %id, error = %e, "stored embedding does not parse");
            None
        }
    });

    Ok(RawIdentityRecord {
        id,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        embedding,
        status: row.get(5)?,
        enrolled_at: row.get(6)?,
        provider_model: row.get(7)?,
    })
}

fn get_identity(conn: &Connection, id: &str) -> Result<Option<RawIdentityRecord>, StoreError> {
    conn.query_row(
        &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1"),
        params![id],
        identity_from_row,
    )
    .optional()
    .map_err(unavailable)
}

impl GalleryStore for SqliteStore {
    fn get_all(&self) -> Result<Vec<RawIdentityRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {IDENTITY_COLUMNS} FROM identities ORDER BY seq"))
            .map_err(unavailable)?;
        let rows = stmt.query_map([], identity_from_row).map_err(unavailable)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(unavailable)
    }

    fn get(&self, id: &str) -> Result<Option<RawIdentityRecord>, StoreError> {
        let conn = self.lock()?;
        get_identity(&conn, id)
    }

    fn put(&self, identity: &Identity) -> Result<(), StoreError> {
        let embedding = serde_json::to_string(identity.embedding.as_slice())
            .map_err(|e| StoreError::Corrupt(format!("embedding serialization failed: {e}")))?;
        let conn = self.lock()?;
        if get_identity(&conn, &identity.id)?.is_some() {
            return Err(StoreError::IdentityExists(identity.id.clone()));
        }
        conn.execute(
            "INSERT INTO identities (id, name, email, phone, embedding, status, enrolled_at, provider_model)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                identity.id,
                identity.name,
                identity.email,
                identity.phone,
                embedding,
                identity.status.as_str(),
                format_timestamp(&identity.enrolled_at),
                identity.provider_model,
            ],
        )
        .map_err(unavailable)?;
        tracing::debug!(identity = %identity.id, dim = identity.embedding.len(), "identity stored");
        Ok(())
    }

    fn patch(&self, id: &str, patch: &IdentityPatch) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE identities SET
                    name = COALESCE(?2, name),
                    email = COALESCE(?3, email),
                    phone = COALESCE(?4, phone),
                    status = COALESCE(?5, status)
                 WHERE id = ?1",
                params![
                    id,
                    patch.name,
                    patch.email,
                    patch.phone,
                    patch.status.map(|s| s.as_str()),
                ],
            )
            .map_err(unavailable)?;
        if changed == 0 {
            return Err(StoreError::IdentityNotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<RawIdentityRecord, StoreError> {
        let conn = self.lock()?;
        let record = get_identity(&conn, id)?.ok_or_else(|| StoreError::IdentityNotFound(id.to_string()))?;
        conn.execute("DELETE FROM identities WHERE id = ?1", params![id])
            .map_err(unavailable)?;
        Ok(record)
    }
}

struct AuditRow {
    id: i64,
    timestamp: String,
    authorized: bool,
    identity_id: String,
    identity_name: String,
    confidence: f64,
    reason: Option<String>,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            authorized: row.get(2)?,
            identity_id: row.get(3)?,
            identity_name: row.get(4)?,
            confidence: row.get(5)?,
            reason: row.get(6)?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry, StoreError> {
        let timestamp = parse_timestamp(&self.timestamp).ok_or_else(|| {
            StoreError::Corrupt(format!("audit entry {} has timestamp '{}'", self.id, self.timestamp))
        })?;
        Ok(AuditEntry {
            log_id: self.id.to_string(),
            record: AuditRecord {
                timestamp,
                authorized: self.authorized,
                identity_id: self.identity_id,
                identity_name: self.identity_name,
                confidence: self.confidence as f32,
                reason: self.reason,
            },
        })
    }
}

impl AuditLog for SqliteStore {
    fn record(&self, record: AuditRecord) -> Result<String, StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_log (timestamp, authorized, identity_id, identity_name, confidence, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                format_timestamp(&record.timestamp),
                record.authorized,
                record.identity_id,
                record.identity_name,
                f64::from(record.confidence),
                record.reason,
            ],
        )
        .map_err(unavailable)?;
        Ok(conn.last_insert_rowid().to_string())
    }

    fn list(&self, limit: usize, order: AuditOrder) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, authorized, identity_id, identity_name, confidence, reason
                 FROM audit_log ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(unavailable)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = stmt
            .query_map(params![limit], AuditRow::from_row)
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;

        if order == AuditOrder::Insertion {
            rows.sort_by_key(|row| row.id);
        }

        rows.into_iter().map(AuditRow::into_entry).collect()
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM audit_log", []).map_err(unavailable)?;
        tracing::info!(removed, "audit log cleared");
        Ok(removed)
    }
}
