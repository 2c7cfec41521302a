use anyhow::Result;
use chat_api::run as run_api;
use chat_core::{ChatContext, Config};
use tracing;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so the log format can follow NODE_ENV
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.is_production() {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        environment = %config.server.environment,
        max_connections_per_user = config.websocket.max_connections_per_user,
        "Starting property chat server"
    );

    let ctx = ChatContext::new(config);
    tracing::info!("Chat context initialized");

    run_api(ctx).await?;

    Ok(())
}
