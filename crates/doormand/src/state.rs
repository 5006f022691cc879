use crate::config::Config;
use crate::engine::EngineHandle;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: EngineHandle,
}

impl AppState {
    pub fn new(config: Config, engine: EngineHandle) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}
