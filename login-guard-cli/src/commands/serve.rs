use anyhow::{Context, Result};
use login_guard::{observability, server::Server, state::AppState};

use super::load_config;

pub async fn execute(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    observability::init_tracing(&config)?;
    config.log_startup_warnings();

    let state = AppState::connect(config)
        .await
        .context("Failed to open the audit store")?;

    let result = Server::new(state).serve().await;
    observability::shutdown_tracing();
    result.context("Server stopped with an error")
}
