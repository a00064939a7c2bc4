//! NutriForge Scheduler
//!
//! Cron-style maintenance jobs over the food store. Each invocation runs
//! one job and prints its report as JSON.

mod jobs;

use clap::{Parser, Subcommand};
use nutriforge_common::{
    config::{AppConfig, ObservabilityConfig},
    open_store, VERSION,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scheduler", version, about = "NutriForge maintenance jobs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reset failed records older than the cooldown and queue them again
    Sweep {
        /// Override retry.cooldown_hours
        #[arg(long)]
        cooldown_hours: Option<i64>,
    },
    /// Rescore stored records and promote clean ones to verified
    Verify {
        #[arg(long, default_value_t = 500)]
        limit: u64,
    },
    /// Flag same-name duplicates, keeping the best-scored record
    Duplicates,
    /// Queue records that still need enrichment but have no queue entry
    Backfill {
        #[arg(long, default_value_t = 500)]
        limit: u64,
    },
    /// List records waiting for human review
    Review {
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    init_tracing(&config.observability);

    info!(command = ?cli.command, "Starting NutriForge Scheduler v{}", VERSION);

    let store = open_store(&config.database).await?;
    let output = jobs::run(cli.command, store, &config).await.map_err(|e| {
        error!(error = %e, "Scheduled job failed");
        e
    })?;

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sweep_override() {
        let cli = Cli::parse_from(["scheduler", "sweep", "--cooldown-hours", "6"]);
        assert!(matches!(cli.command, Command::Sweep { cooldown_hours: Some(6) }));
    }

    #[test]
    fn test_limits_default() {
        let cli = Cli::parse_from(["scheduler", "backfill"]);
        assert!(matches!(cli.command, Command::Backfill { limit: 500 }));
    }
}
