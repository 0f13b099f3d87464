use std::net::SocketAddr;

use anyhow::Context;
use db::DBService;
use server::{AppState, config::Config, routes};
use services::services::rate_limit::RateLimiter;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _sentry = utils::logging::init(config.sentry_dsn.as_deref());

    let db = DBService::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;

    let general_limiter = RateLimiter::new(config.general_rate_limit.clone())
        .context("invalid general rate limit")?;
    let api_limiter =
        RateLimiter::new(config.api_rate_limit.clone()).context("invalid API rate limit")?;
    general_limiter.spawn_cleanup(config.rate_limit_cleanup);
    api_limiter.spawn_cleanup(config.rate_limit_cleanup);

    let app = routes::router(AppState::new(db, general_limiter, api_limiter));

    let listener = tokio::net::TcpListener::bind(config.server_addr()).await?;
    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
}
