use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Display name used when a stored record carries none.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding has no values")]
    Empty,
    #[error("embedding value at index {index} is not finite")]
    NonFinite { index: usize },
}

/// Face embedding vector (typically 128- or 512-dimensional).
///
/// Always non-empty and finite; the length is fixed per provider model and
/// never truncated or padded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(EmbeddingError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Inactive,
}

impl IdentityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(format!("unknown identity status '{other}'")),
        }
    }
}

/// An identity record as the gallery store hands it over.
///
/// Every field except `id` may be absent or malformed; [`Identity::from_raw`]
/// is the only way to turn one into something the matcher will look at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIdentityRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub enrolled_at: Option<String>,
    #[serde(default)]
    pub provider_model: Option<String>,
}

/// Why a raw record did not make it into a gallery index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordRejection {
    #[error("identity is not active")]
    Inactive,
    #[error("unknown status '{0}'")]
    InvalidStatus(String),
    #[error("record has no embedding")]
    MissingEmbedding,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] EmbeddingError),
    #[error("record has no enrollment timestamp")]
    MissingTimestamp,
    #[error("unparseable enrollment timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("embedding from model '{found}', expected '{expected}'")]
    IncompatibleModel { expected: String, found: String },
    #[error("embedding has {found} dimensions, expected {expected}")]
    IncompatibleDimension { expected: usize, found: usize },
    #[error("id already present in the index")]
    DuplicateId,
}

impl RecordRejection {
    /// Structurally broken, as opposed to filtered by policy.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::InvalidStatus(_)
                | Self::MissingEmbedding
                | Self::InvalidEmbedding(_)
                | Self::MissingTimestamp
                | Self::InvalidTimestamp(_)
        )
    }
}

/// A validated, enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub embedding: Embedding,
    pub status: IdentityStatus,
    pub enrolled_at: DateTime<Utc>,
    pub provider_model: String,
}

impl Identity {
    /// A freshly enrolled, active identity timestamped now.
    pub fn enroll(
        id: impl Into<String>,
        name: impl Into<String>,
        embedding: Embedding,
        provider_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            phone: None,
            embedding,
            status: IdentityStatus::Active,
            enrolled_at: Utc::now(),
            provider_model: provider_model.into(),
        }
    }

    pub fn with_contact(mut self, email: Option<String>, phone: Option<String>) -> Self {
        self.email = email.filter(|e| !e.is_empty());
        self.phone = phone.filter(|p| !p.is_empty());
        self
    }

    /// Validate a store record.
    ///
    /// A missing status reads as inactive and a missing name as "Unknown".
    /// A missing embedding or timestamp rejects the record.
    pub fn from_raw(raw: RawIdentityRecord) -> Result<Self, RecordRejection> {
        let status = match raw.status.as_deref() {
            None => IdentityStatus::Inactive,
            Some(s) => s
                .parse()
                .map_err(|_| RecordRejection::InvalidStatus(s.to_string()))?,
        };
        let values = raw.embedding.ok_or(RecordRejection::MissingEmbedding)?;
        let embedding = Embedding::new(values)?;
        let enrolled_at = match raw.enrolled_at.as_deref() {
            None => return Err(RecordRejection::MissingTimestamp),
            Some(ts) => {
                parse_timestamp(ts).ok_or_else(|| RecordRejection::InvalidTimestamp(ts.to_string()))?
            }
        };

        Ok(Self {
            id: raw.id,
            name: raw.name.unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            email: raw.email.filter(|e| !e.is_empty()),
            phone: raw.phone.filter(|p| !p.is_empty()),
            embedding,
            status,
            enrolled_at,
            provider_model: raw.provider_model.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    pub fn to_raw(&self) -> RawIdentityRecord {
        RawIdentityRecord {
            id: self.id.clone(),
            name: Some(self.name.clone()),
            email: self.email.clone(),
            phone: self.phone.clone(),
            embedding: Some(self.embedding.as_slice().to_vec()),
            status: Some(self.status.as_str().to_string()),
            enrolled_at: Some(format_timestamp(&self.enrolled_at)),
            provider_model: Some(self.provider_model.clone()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }
}

/// Metadata edit for an enrolled identity. The embedding is not editable;
/// re-enrollment creates a new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Option<IdentityStatus>,
}

impl IdentityPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.status.is_none()
    }

    pub fn apply_to(&self, record: &mut RawIdentityRecord) {
        if let Some(name) = &self.name {
            record.name = Some(name.clone());
        }
        if let Some(email) = &self.email {
            record.email = Some(email.clone());
        }
        if let Some(phone) = &self.phone {
            record.phone = Some(phone.clone());
        }
        if let Some(status) = self.status {
            record.status = Some(status.as_str().to_string());
        }
    }
}

/// Why a decision ended without a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The gallery had no active, compatible identities.
    EmptyGallery,
    /// Every gallery entry was skipped as incomparable.
    NoComparableEntries,
    /// The closest candidate was not within the distance threshold.
    BelowThreshold,
    /// Within the threshold, but under the minimum confidence gate.
    LowConfidence,
}

impl NoMatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyGallery => "no registered identities",
            Self::NoComparableEntries => "no comparable identities",
            Self::BelowThreshold => "below threshold",
            Self::LowConfidence => "confidence below minimum",
        }
    }
}

impl fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of matching a query embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// ID of the matched identity (if any).
    pub identity_id: Option<String>,
    /// Display name of the matched identity (if any).
    pub identity_name: Option<String>,
    /// Distance to the closest candidate. Infinite when nothing was compared.
    pub distance: f32,
    /// Confidence in [0, 1]; zero when not matched.
    pub confidence: f32,
    pub reason: Option<NoMatchReason>,
}

impl MatchResult {
    pub fn no_match(distance: f32, reason: NoMatchReason) -> Self {
        Self {
            matched: false,
            identity_id: None,
            identity_name: None,
            distance,
            confidence: 0.0,
            reason: Some(reason),
        }
    }
}

/// Fixed-width RFC 3339 (microseconds, `Z`) so lexical order is chronological.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Accepts RFC 3339, or a naive ISO-8601 timestamp read as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
