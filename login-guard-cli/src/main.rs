use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

use commands::{events::EventsArgs, prune::PruneArgs, status::StatusArgs};

/// login-guard - login-attempt throttling and authentication audit log
#[derive(Parser)]
#[command(name = "login-guard")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Read configuration from this file instead of the standard locations
    #[arg(short, long, global = true, value_name = "FILE", env = "LOGIN_GUARD_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service and the retention pruner
    Serve,
    /// Show the throttle decision for an identity
    Status(StatusArgs),
    /// List recent audit events for an identity
    Events(EventsArgs),
    /// Run one retention pass and exit
    Prune(PruneArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Serve => commands::serve::execute(config).await,
        Commands::Status(args) => commands::status::execute(config, args).await,
        Commands::Events(args) => commands::events::execute(config, args).await,
        Commands::Prune(args) => commands::prune::execute(config, args).await,
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}
