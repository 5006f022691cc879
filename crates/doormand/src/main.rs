use anyhow::{Context, Result};
use doorman_store::SqliteStore;
use doormand::provider::RemoteEmbeddingProvider;
use doormand::{spawn_engine, AppState, Config, EngineSettings};
use std::sync::Arc;
use std::time::Duration;

// The blocking extractor client is built outside the async runtime.
fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;
    doormand::telemetry::init_tracing(&config)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "doormand starting");

    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );
    if let Err(e) = store.integrity_check() {
        tracing::warn!(error = %e, "database integrity check failed");
    }

    let provider = RemoteEmbeddingProvider::new(
        config.provider_url.clone(),
        config.provider_model.clone(),
        Duration::from_secs(config.provider_timeout_secs),
    )
    .context("building embedding provider client")?;
    tracing::info!(url = provider.url(), model = %config.provider_model, "embedding provider configured");

    let engine = spawn_engine(
        Arc::new(provider),
        store.clone(),
        store,
        EngineSettings::from_config(&config),
    )
    .context("starting engine")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(doormand::server::serve(AppState::new(config, engine)))
}
