//! doorman-core: Access decision engine for face-embedding door control.
//!
//! Compares a query embedding against a gallery of enrolled identities,
//! scores the best candidate, guards enrollment against duplicates and
//! produces the audit record for every recognition attempt. Performs no I/O:
//! image handling, embedding extraction and persistence sit behind the
//! collaborator traits in [`provider`], [`store`] and [`audit`].

pub mod audit;
pub mod confidence;
pub mod enrollment;
pub mod gallery;
pub mod matcher;
pub mod metric;
pub mod provider;
pub mod store;
pub mod types;

pub use audit::{AuditEntry, AuditLog, AuditOrder, AuditRecord, MemoryAuditLog, UNKNOWN_ID};
pub use confidence::ConfidenceModel;
pub use enrollment::{Conflict, DuplicateCheck, EnrollmentGuard};
pub use gallery::{BuildStats, Compatibility, GalleryIndex};
pub use matcher::{MatchEngine, MatchPolicy, MatchReport, SkippedEntry};
pub use metric::{Distance, DistanceMetric, MetricError};
pub use provider::{EmbeddingProvider, ExtractionError};
pub use store::{GalleryStore, MemoryGalleryStore, StoreError};
pub use types::{
    format_timestamp, parse_timestamp, Embedding, EmbeddingError, Identity, IdentityPatch,
    IdentityStatus, MatchResult, NoMatchReason, RawIdentityRecord, RecordRejection, UNKNOWN_NAME,
};
