use anyhow::{Context, Result};
use log::info;
use market_data::build_cache;
use market_data::config::ServiceConfig;
use market_data::logger::init_logger_with;
use prediction_server::server::Server;
use prediction_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env().context("loading configuration")?;
    init_logger_with(&config.monitoring.log_level, Some(&config.log_path()));
    config
        .ensure_directories()
        .context("creating model, log and metrics directories")?;

    if config.is_development() {
        info!("Running in development mode");
    }

    let cache = build_cache(&config.cache).await;
    info!(
        "Starting prediction server (cache: {})",
        cache.as_ref().map_or("disabled", |c| c.backend())
    );

    let state = AppState::new(config, cache);
    Server::init(state).run().await?;

    info!("Server stopped");
    Ok(())
}
