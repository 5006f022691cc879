//! doormand: HTTP access-control daemon.
//!
//! Accepts face images over HTTP, hands them to the engine thread for
//! extraction, matching and auditing, and manages the enrolled identities.

pub mod config;
pub mod engine;
pub mod error;
pub mod provider;
pub mod routes;
pub mod server;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use engine::{spawn_engine, EngineError, EngineHandle, EngineSettings};
pub use error::ApiError;
pub use server::build_router;
pub use state::AppState;
