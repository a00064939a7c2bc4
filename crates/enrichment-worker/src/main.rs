//! NutriForge Enrichment Worker
//!
//! Drains the enrichment queue:
//! 1. Claims a bounded batch of pending entries
//! 2. Looks each food up with the configured nutrient provider
//! 3. Merges the nutrients, rescores and writes the record back
//! 4. Marks the entry completed or failed
//!
//! Each process start is one pass unless `--interval-secs` is given.

use clap::{Parser, Subcommand};
use nutriforge_common::{
    config::{AppConfig, ObservabilityConfig},
    enrichment::{EnrichmentWorker, RunSummary, WorkerOptions},
    open_store,
    provider::{create_provider, FoodQuery, ProviderLookup},
    EnrichmentQueue, VERSION,
};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "enrichment-worker", version, about = "Enrich queued foods with provider data")]
struct Cli {
    /// Entries to claim per pass (defaults to worker.batch_size)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Overwrite stored values with provider values
    #[arg(long)]
    force_refresh: bool,

    /// Keep running, one pass every N seconds
    #[arg(long)]
    interval_secs: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Look up a single food and print the result; touches no data
    Lookup {
        name: String,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        serving: Option<String>,
    },
    /// Print queue counts by status
    Stats,
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

    info!("Starting NutriForge Enrichment Worker v{}", VERSION);

    let provider = create_provider(&config.provider)?;
    info!(provider = provider.name(), "Provider initialized");

    if let Some(Command::Lookup { name, brand, serving }) = &cli.command {
        let query = FoodQuery {
            name: name.clone(),
            brand: brand.clone(),
            serving_description: serving.clone(),
            category: None,
        };
        provider.acquire().await;
        return match provider.lookup(&query).await {
            Ok(ProviderLookup::Found(nutrients)) => {
                println!("{}", serde_json::to_string_pretty(&nutrients)?);
                Ok(())
            }
            Ok(ProviderLookup::NoMatch) => {
                println!("No match for {:?}", query.search_text());
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Lookup failed");
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };
    }

    let store = open_store(&config.database).await?;

    if let Some(Command::Stats) = cli.command {
        let stats = store.stats().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let options = WorkerOptions::from_config(&config);
    let worker = EnrichmentWorker::new(store, provider, options)
        .with_force_refresh(cli.force_refresh || config.worker.force_refresh);
    let batch_size = cli.batch_size.unwrap_or(config.worker.batch_size);

    let Some(interval) = cli.interval_secs.map(Duration::from_secs) else {
        let summary = worker.run_once(batch_size).await.map_err(|e| {
            error!(error = %e, "Enrichment run aborted");
            e
        })?;
        print_summary(&summary)?;
        return Ok(());
    };

    info!(interval_secs = interval.as_secs(), batch_size, "Running on an interval");
    let mut consecutive_failures = 0;

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        match worker.run_once(batch_size).await {
            Ok(summary) => {
                consecutive_failures = 0;
                print_summary(&summary)?;
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    error = %e,
                    failures = consecutive_failures,
                    "Enrichment run aborted"
                );
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Enrichment worker shutting down");
    Ok(())
}

fn print_summary(summary: &RunSummary) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_flags() {
        let cli = Cli::parse_from(["enrichment-worker", "--batch-size", "20", "--force-refresh"]);
        assert_eq!(cli.batch_size, Some(20));
        assert!(cli.force_refresh);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_lookup() {
        let cli = Cli::parse_from(["enrichment-worker", "lookup", "Greek Yogurt", "--brand", "Fage"]);
        match cli.command {
            Some(Command::Lookup { name, brand, serving }) => {
                assert_eq!(name, "Greek Yogurt");
                assert_eq!(brand.as_deref(), Some("Fage"));
                assert!(serving.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
