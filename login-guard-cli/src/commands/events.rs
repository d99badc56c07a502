use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use colored::Colorize;
use login_guard::{
    audit::{normalize_identity, AuditLogStore, AuthEventKind},
    clock::Clock,
    state::AppState,
};

use super::load_config;

#[derive(Args)]
pub struct EventsArgs {
    /// Identity whose events to list
    pub identity: String,

    /// How far back to look, in hours
    #[arg(long, default_value_t = 24)]
    pub hours: i64,

    /// Print one JSON record per line
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(config_path: Option<&str>, args: EventsArgs) -> Result<()> {
    if args.hours <= 0 {
        anyhow::bail!("--hours must be a positive number of hours");
    }

    let config = load_config(config_path)?;
    let state = AppState::connect(config)
        .await
        .context("Failed to open the audit store")?;

    let identity = normalize_identity(&args.identity);
    let since = state
        .clock()
        .now()
        .checked_sub_signed(Duration::try_hours(args.hours).unwrap_or(Duration::MAX))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let events = state
        .store()
        .query(&identity, since)
        .await
        .with_context(|| format!("Failed to read audit events for {}", identity))?;

    if args.json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    if events.is_empty() {
        println!("No events for {} in the last {} hours", identity, args.hours);
        return Ok(());
    }

    for event in &events {
        let kind = match event.kind {
            AuthEventKind::LoginSuccess => event.kind.as_str().green(),
            AuthEventKind::LoginFailed => event.kind.as_str().yellow(),
            AuthEventKind::LoginRateLimited => event.kind.as_str().red(),
        };
        println!("{}  {}", event.timestamp.to_rfc3339(), kind);
    }

    let skipped = state.store().skipped_records();
    if skipped > 0 {
        println!(
            "\n{} {} unreadable record(s) skipped",
            "Warning:".yellow().bold(),
            skipped
        );
    }

    Ok(())
}
