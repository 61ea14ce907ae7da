//! regharvest CLI — harvest regulatory circulars and upsert them into the
//! shared store.
//!
//! Commands:
//! - `run` — harvest SEBI/BSE/NSE circulars from the last N days and store them
//! - `check` — verify store connectivity and table access before a first run

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regharvest_core::sources::{BseScraper, NseScraper, SebiScraper};
use regharvest_core::{CircularRecord, CircularSource};
use regharvest_runner::{
    run_pipeline, CircularWriter, PipelineOptions, Report, RestStore, StoreConfig, StoreError,
};

#[derive(Parser)]
#[command(
    name = "regharvest",
    about = "Regulatory circular harvesting pipeline (SEBI / BSE / NSE)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest circulars from all sources and upsert them into the store.
    Run {
        /// Harvest window in days (today back to today minus days).
        #[arg(long, default_value_t = 14)]
        days: u32,

        /// Seconds to pause between sources.
        #[arg(long, default_value_t = 2)]
        pause_secs: u64,

        /// Store config TOML file. Falls back to REGHARVEST_STORE_* env vars.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Harvest without writing to the store.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// Emit the report as JSON instead of a summary table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Verify the store connection and table access.
    Check {
        /// Store config TOML file. Falls back to REGHARVEST_STORE_* env vars.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// Accepts every record without touching the network; `stored` counts in a
/// dry run mean "would have been written".
struct DryRunWriter;

impl CircularWriter for DryRunWriter {
    fn upsert(&self, _record: &CircularRecord) -> Result<(), StoreError> {
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            days,
            pause_secs,
            config,
            dry_run,
            json,
        } => cmd_run(days, pause_secs, config.as_deref(), dry_run, json),
        Commands::Check { config } => cmd_check(config.as_deref()),
    }
}

fn load_store_config(path: Option<&Path>) -> Result<StoreConfig> {
    match path {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading store config from {}", path.display())),
        None => StoreConfig::from_env().context(
            "loading store config from the environment (set REGHARVEST_STORE_URL and \
             REGHARVEST_STORE_KEY, or pass --config)",
        ),
    }
}

fn cmd_run(
    days: u32,
    pause_secs: u64,
    config: Option<&Path>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let writer: Box<dyn CircularWriter> = if dry_run {
        Box::new(DryRunWriter)
    } else {
        let config = load_store_config(config)?;
        Box::new(RestStore::new(&config)?)
    };

    let mut adapters: Vec<Box<dyn CircularSource>> = vec![
        Box::new(SebiScraper::new()?),
        Box::new(BseScraper::new()?),
        Box::new(NseScraper::new()?),
    ];
    let options = PipelineOptions {
        days,
        inter_source_pause: Duration::from_secs(pause_secs),
    };

    let report = run_pipeline(&mut adapters, writer.as_ref(), &options);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, dry_run);
    }
    Ok(())
}

fn print_report(report: &Report, dry_run: bool) {
    let mode = if dry_run { " (dry run)" } else { "" };
    println!("Harvest report{mode}");
    println!("{:<8} {:>8} {:>8} {:>8}  {}", "source", "scraped", "stored", "skipped", "error");
    for (source, entry) in &report.sources {
        println!(
            "{:<8} {:>8} {:>8} {:>8}  {}",
            source.to_string(),
            entry.scraped,
            entry.stored,
            entry.skipped,
            entry.error.as_deref().unwrap_or("-"),
        );
    }
    println!(
        "total: {} scraped, {} stored, {} skipped",
        report.total_scraped(),
        report.total_stored(),
        report.total_skipped(),
    );
}

fn cmd_check(config: Option<&Path>) -> Result<()> {
    let config = load_store_config(config)?;
    let store = RestStore::new(&config)?;
    store
        .probe()
        .with_context(|| format!("probing store table '{}'", config.table))?;
    println!("[PASS] store reachable, table '{}' accessible", config.table);
    Ok(())
}
