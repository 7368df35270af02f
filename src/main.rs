//! Entry point: load config, wire dependencies, and run the server.

use chatline::config::Config;
use chatline::{create_app, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let state = AppState::from_config(&config)?;
    if state.bridge.start().await?.is_some() {
        tracing::info!(channel = %config.delivery_channel, "delivery bridge listening");
    }

    let app = create_app(state);

    tracing::info!(
        addr = %config.server_addr,
        origins = ?config.allowed_origins,
        "listening"
    );
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
