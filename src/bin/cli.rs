//! Talk search sync CLI
//!
//! Converges a search collection to a local JSON array of records.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use talksearch_sync::{
    error::{AppError, Result},
    models::{Config, Record},
    remote::AlgoliaIndex,
    sync::{ConsoleObserver, SyncContext, SyncReport},
    utils::log::{self as console, LogLevel},
};

/// talksearch-sync - Diff-based search index synchronization
#[derive(Parser, Debug)]
#[command(
    name = "talksearch-sync",
    version,
    about = "Zero-downtime sync of talk records into a search index"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "TALKSEARCH_CONFIG", default_value = "talksearch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync a record file into the configured index
    Sync {
        /// JSON array of records
        #[arg(long)]
        records: PathBuf,
    },

    /// Show what a sync would change, without writing
    Plan {
        #[arg(long)]
        records: PathBuf,
    },

    /// Show the identifiers listed in the production manifest
    Manifest,

    /// Validate configuration and, optionally, a record file
    Validate {
        #[arg(long)]
        records: Option<PathBuf>,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
    console::init(LogLevel::parse(level));
}

fn load_config(path: &Path) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env();
    config
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let records = Record::load_all(path)?;
    log::info!("Loaded {} record(s) from {}", records.len(), path.display());
    Ok(records)
}

fn context(config: &Config) -> Result<SyncContext> {
    config.validate_credentials()?;
    let index = AlgoliaIndex::new(&config.algolia)?;
    Ok(SyncContext::from_config(Arc::new(index), config)?
        .with_observer(Arc::new(ConsoleObserver)))
}

fn print_report(report: &SyncReport) {
    console::summary(
        &format!("Sync of '{}'", report.index_name),
        &[
            ("Live before", report.remote_count.to_string()),
            ("Live after", report.local_count.to_string()),
            ("Added", report.added.to_string()),
            ("Deleted", report.deleted.to_string()),
            ("Manifest entries", report.manifest_entries.to_string()),
            (
                "Duration",
                format!("{:.1}s", report.duration().num_milliseconds() as f64 / 1000.0),
            ),
        ],
    );
}

fn print_failure(error: &AppError) {
    let mut items = vec![("Error", error.to_string())];
    if let AppError::Step { state, .. } = error {
        items.push(("Failed during", state.description().to_string()));
    }
    let production = if error.requires_reconciliation() {
        "may disagree with its manifest until the next successful sync"
    } else {
        "untouched"
    };
    items.push(("Production", production.to_string()));
    console::failure("Sync did not complete", &items);
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config);

    match cli.command {
        Command::Sync { records } => {
            let records = load_records(&records)?;
            let context = context(&config)?;

            console::header(&format!("Syncing into '{}'", context.names().production));
            let report = context.run(&records).await?;
            print_report(&report);
        }

        Command::Plan { records } => {
            let records = load_records(&records)?;
            let context = context(&config)?;

            let plan = context.plan(&records).await?;
            console::summary(
                &format!("Plan for '{}'", context.names().production),
                &[
                    ("Live", plan.remote_count.to_string()),
                    ("Local", plan.local_count.to_string()),
                    ("To add", plan.to_add.to_string()),
                    ("To delete", plan.to_delete.to_string()),
                ],
            );
        }

        Command::Manifest => {
            let context = context(&config)?;
            let ids = context.remote_object_ids().await?;

            console::info(&format!(
                "'{}' lists {} identifier(s)",
                context.names().manifest_production,
                ids.len()
            ));
            for id in &ids {
                println!("{id}");
            }
        }

        Command::Validate { records } => {
            log::info!("Validating configuration...");

            config.validate()?;
            config.validate_credentials()?;
            console::success("Config OK");

            if let Some(path) = records {
                let records = load_records(&path)?;
                if records.is_empty() {
                    return Err(AppError::validation(format!(
                        "{} contains no records",
                        path.display()
                    )));
                }
                console::success(&format!("{} record(s) OK", records.len()));
            }
        }
    }

    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_failure(&e);
            ExitCode::FAILURE
        }
    }
}
