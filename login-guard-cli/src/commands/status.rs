use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use login_guard::{handlers::LoginAttemptStatus, state::AppState};

use super::load_config;

#[derive(Args)]
pub struct StatusArgs {
    /// Identity to check (email address or `browser:<token>`)
    pub identity: String,

    /// Print the same JSON body as the status endpoint
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(config_path: Option<&str>, args: StatusArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let state = AppState::connect(config)
        .await
        .context("Failed to open the audit store")?;

    let decision = state.gate().evaluate(&args.identity).await;
    let status = LoginAttemptStatus::from(&decision);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{} {}", "Identity:".bold(), decision.identity);
    println!(
        "{} {} of {} in the last {} minutes",
        "Failures:".bold(),
        status.attempts,
        status.threshold,
        state.gate().config().window_minutes
    );

    if decision.fail_open {
        println!(
            "{} audit store unreachable, attempts are being admitted",
            "Warning:".yellow().bold()
        );
    }

    match status.retry_after_seconds {
        Some(secs) if status.blocked => {
            println!("{} {} (retry in {}s)", "Status:".bold(), "BLOCKED".red().bold(), secs)
        }
        _ => println!("{} {}", "Status:".bold(), "allowed".green()),
    }

    Ok(())
}
