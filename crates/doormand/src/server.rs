//! Router construction and the HTTP serve loop.

use crate::routes::{access, logs, not_found, system, users};
use crate::state::AppState;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::Router;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the router with all routes and middleware.
///
/// CORS is permissive: the dashboard is served from another origin.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Cors and Timeout need a `Default` inner body, which the limit's
    // response body is not, so the limit sits outside both.
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes()))
        .layer(cors)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(state.config.request_timeout_secs),
        ))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .route("/api/register", post(access::register))
        .route("/api/recognize", post(access::recognize))
        .route("/api/verify", post(access::verify))
        .route("/api/users", get(users::list_users))
        .route(
            "/api/user/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/api/logs", get(logs::list_logs))
        .route("/api/logs/clear", delete(logs::clear_logs))
        .route("/api/config", get(system::config))
        .route("/api/health", get(system::health))
        .fallback(not_found)
        .layer(middleware)
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.socket_addr()?;
    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        timeout_secs = state.config.request_timeout_secs,
        max_body_mb = state.config.max_body_mb,
        "doormand listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("doormand shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
