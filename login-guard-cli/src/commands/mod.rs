use anyhow::{Context, Result};
use login_guard::config::Config;

pub mod events;
pub mod prune;
pub mod serve;
pub mod status;

/// Load configuration from `path`, or from the standard locations
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path)),
        None => Config::load().context("Failed to load configuration"),
    }
}
