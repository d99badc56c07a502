use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use login_guard::{
    observability,
    retention::{PruneOutcome, RetentionPruner},
    state::AppState,
};

use super::load_config;

#[derive(Args)]
pub struct PruneArgs {
    /// Retention horizon in days, overriding the configuration
    #[arg(long, value_name = "DAYS")]
    pub days: Option<u64>,
}

pub async fn execute(config_path: Option<&str>, args: PruneArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    observability::init_tracing(&config)?;
    config.log_startup_warnings();

    if let Some(days) = args.days {
        if days == 0 {
            anyhow::bail!("--days must be at least 1");
        }
        config.retention.retention_days = days;
    }

    let holder = config.instance_id();
    let state = AppState::connect(config)
        .await
        .context("Failed to open the audit store")?;

    let pruner = RetentionPruner::new(
        state.config().retention.clone(),
        state.store().clone(),
        state.clock().clone(),
        holder,
    )
    .with_health(state.health().clone());

    match pruner.run_once().await.context("Retention run failed")? {
        PruneOutcome::Completed(report) => {
            println!(
                "{} deleted {} event(s) older than {}",
                "Pruned:".green().bold(),
                report.deleted,
                report.cutoff.to_rfc3339()
            );
            if let Some(archive) = report.archive {
                println!("{} {}", "Archived to:".bold(), archive.display());
            }
        }
        PruneOutcome::Skipped => {
            println!(
                "{} another instance holds the retention lease",
                "Skipped:".yellow().bold()
            );
        }
    }

    Ok(())
}
