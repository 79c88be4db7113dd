use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use seoul_city_extractor::constants::DEFAULT_CONFIG_PATH;
use seoul_city_extractor::observability::metrics;
use seoul_city_extractor::pipeline::scheduler;
use seoul_city_extractor::{build_pipeline, logging, Config};

#[derive(Parser)]
#[command(name = "seoul_city_extractor")]
#[command(about = "Seoul city data ingestion: population and road traffic into SQLite")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once for the configured areas and exit
    Run {
        /// Override the configured areas (comma-separated area codes)
        #[arg(long)]
        areas: Option<String>,
    },
    /// Run the pipeline on the configured interval until Ctrl-C
    Schedule,
    /// Print the configured area codes
    Areas,
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    let _log_guard = logging::init_logging();
    metrics::init();

    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Areas => {
            for code in &config.pipeline.area_codes {
                println!("{}", code);
            }
        }
        Commands::Run { areas } => {
            if let Some(list) = areas {
                config.pipeline.area_codes = list
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            config.validate()?;
            let pipeline = build_pipeline(&config)?;
            let cancel = CancellationToken::new();
            cancel_on_ctrl_c(cancel.clone());

            info!("Running once for {} areas", pipeline.areas().len());
            let report = pipeline.run_once(&cancel).await?;
            for outcome in &report.outcomes {
                match &outcome.result {
                    Ok(r) => println!("{:<15} {} rows appended", r.table_name, r.rows_written),
                    Err(e) => println!("{:<15} FAILED: {}", outcome.kind.table_name(), e),
                }
            }
            if let Err(e) = report.into_result() {
                error!("Run finished with failures");
                return Err(e.into());
            }
        }
        Commands::Schedule => {
            config.validate()?;
            let pipeline = build_pipeline(&config)?;
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());

            let stats = scheduler::run_hourly(
                &pipeline,
                config.schedule_interval(),
                &shutdown,
                None,
            )
            .await;
            info!("{} scheduled runs, {} failed", stats.runs, stats.failed);
        }
    }
    Ok(())
}
