//! doorman-store: SQLite persistence for the gallery and the audit log.
//!
//! One database file holds both tables. [`SqliteStore`] implements the core
//! [`GalleryStore`](doorman_core::GalleryStore) and
//! [`AuditLog`](doorman_core::AuditLog) traits behind a single mutex-guarded
//! connection.

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;
