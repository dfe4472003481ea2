use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sehat::commands;
use sehat::config::Config;

#[derive(Parser)]
#[command(
    name = "sehat",
    version,
    about = "Resumable multi-phase healthcare provider directory crawler",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collection pipeline
    Run {
        /// Phase to run (0=cities, 1=hospitals, 2=enrichment, 3=doctors).
        /// Omit to run all four in order.
        #[arg(short, long)]
        phase: Option<u8>,

        /// Number of worker tasks
        #[arg(short, long)]
        workers: Option<usize>,

        /// Maximum units to process this run: cities in phase 0, newly
        /// discovered hospitals in phase 1, pending records in phases 2-3.
        /// Omit to drain all pending work.
        #[arg(short, long)]
        limit: Option<u64>,
    },

    /// Show record counts per collection and status
    Stats,

    /// Verify doctor-hospital relationship consistency
    Verify,

    /// Run one-shot legacy data reconciliation
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Run {
            phase,
            workers,
            limit,
        } => {
            if let Some(workers) = workers {
                config.crawl.workers = workers.max(1);
            }
            commands::run::run(config, phase, limit).await?;
        }
        Commands::Stats => commands::report::stats(config)?,
        Commands::Verify => commands::report::verify(config)?,
        Commands::Migrate => commands::report::migrate(config)?,
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }
    Ok(())
}
