mod config;
mod db;
mod error;
mod middleware;
mod models;
mod repository;
mod routes;
mod schemas;
mod services;
mod state;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::Router;
use config::AppConfig;
use middleware::cors::build_cors_layer;
use middleware::request_id::inject_request_id;
use state::AppState;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env();
    let state = AppState::build(config).await?;

    if !state.config.ledger_writes_enabled {
        tracing::warn!("LEDGER_WRITES_ENABLED is off; write endpoints answer 403");
    }

    let mut app = Router::new()
        .nest(&state.config.api_prefix, routes::v1_router())
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            Duration::from_secs(state.config.request_timeout_seconds),
        ))
        .layer(axum::middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&state.config))
        .with_state(state.clone());

    if state.config.rate_limit_enabled {
        // Burst of `RATE_LIMIT_BURST_SIZE`, refilling `RATE_LIMIT_PER_SECOND`, keyed by peer IP.
        let governor_config = GovernorConfigBuilder::default()
            .per_second(state.config.rate_limit_per_second.max(1))
            .burst_size(state.config.rate_limit_burst_size.max(1))
            .finish()
            .ok_or("invalid rate limit configuration")?;
        app = app.layer(GovernorLayer::new(governor_config));
    }

    let socket_addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    tracing::info!(
        app_name = %state.config.app_name,
        environment = %state.config.environment,
        api_prefix = %state.config.api_prefix,
        rate_limit_enabled = state.config.rate_limit_enabled,
        "Rent ledger backend listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "SIGTERM handler unavailable; waiting for Ctrl+C");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, finishing in-flight requests");
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}
