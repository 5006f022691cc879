//! Audit trail of recognition attempts.

use crate::store::StoreError;
use crate::types::{Identity, MatchResult, UNKNOWN_NAME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

/// Identity id recorded when nobody was recognized.
pub const UNKNOWN_ID: &str = "unknown";

/// One recognition attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub authorized: bool,
    pub identity_id: String,
    pub identity_name: String,
    pub confidence: f32,
    /// Set only when access was denied.
    #[serde(default)]
    pub reason: Option<String>,
}

impl AuditRecord {
    pub fn granted(identity_id: impl Into<String>, identity_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            timestamp: Utc::now(),
            authorized: true,
            identity_id: identity_id.into(),
            identity_name: identity_name.into(),
            confidence,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            authorized: false,
            identity_id: UNKNOWN_ID.to_string(),
            identity_name: UNKNOWN_NAME.to_string(),
            confidence: 0.0,
            reason: Some(reason.into()),
        }
    }

    /// Record for a completed match decision.
    pub fn from_match(result: &MatchResult, identity: Option<&Identity>) -> Self {
        match (result.matched, identity) {
            (true, Some(identity)) => Self::granted(&identity.id, &identity.name, result.confidence),
            _ => {
                let reason = result.reason.map(|r| r.as_str()).unwrap_or("no match");
                Self::denied(reason)
            }
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// An appended record with the id the log assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub log_id: String,
    #[serde(flatten)]
    pub record: AuditRecord,
}

/// Order of the records returned by [`AuditLog::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOrder {
    /// Reverse-chronological by timestamp.
    #[default]
    NewestFirst,
    /// Oldest first, as appended.
    Insertion,
}

impl AuditOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewestFirst => "newest",
            Self::Insertion => "insertion",
        }
    }
}

impl fmt::Display for AuditOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "newest" | "newest_first" | "desc" => Ok(Self::NewestFirst),
            "insertion" | "oldest" | "asc" => Ok(Self::Insertion),
            other => Err(format!("unknown audit order: {other}")),
        }
    }
}

/// Append-only log of recognition attempts.
///
/// Bulk [`clear`](AuditLog::clear) is the only way records leave the log.
pub trait AuditLog: Send + Sync {
    /// Append a record, returning its log id.
    fn record(&self, record: AuditRecord) -> Result<String, StoreError>;

    /// The `limit` most recent records, arranged per `order`.
    fn list(&self, limit: usize, order: AuditOrder) -> Result<Vec<AuditEntry>, StoreError>;

    /// Remove every record, returning how many there were.
    fn clear(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryLogState {
    next_id: u64,
    entries: Vec<(u64, AuditRecord)>,
}

/// In-process audit log.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    state: Mutex<MemoryLogState>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryLogState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".into()))
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: AuditRecord) -> Result<String, StoreError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let id = state.next_id;
        state.entries.push((id, record));
        Ok(id.to_string())
    }

    fn list(&self, limit: usize, order: AuditOrder) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.lock()?;
        let mut selected: Vec<&(u64, AuditRecord)> = state.entries.iter().collect();
        // Most recent by timestamp, later insertion first on ties.
        selected.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp).then(b.0.cmp(&a.0)));
        selected.truncate(limit);
        if order == AuditOrder::Insertion {
            selected.sort_by_key(|(id, _)| *id);
        }

        Ok(selected
            .into_iter()
            .map(|(id, record)| AuditEntry {
                log_id: id.to_string(),
                record: record.clone(),
            })
            .collect())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let removed = state.entries.len();
        state.entries.clear();
        Ok(removed)
    }
}
