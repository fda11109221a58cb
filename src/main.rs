//! sandscan - sandwich attack detector
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

use sandscan::common::constants::Env;
use sandscan::common::errors::DetectError;
use sandscan::common::sink::FileLogSink;
use sandscan::common::streams::connect;
use sandscan::common::utils::setup_logger;
use sandscan::sandwich::scanner::{validate_range, BlockScanner, DetectorConfig};

#[derive(Parser)]
#[command(name = "sandscan", about = "Detect sandwich attacks in mined blocks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow new blocks until interrupted
    Live {
        /// Stop after this many blocks
        #[arg(long)]
        max_blocks: Option<u64>,
    },
    /// Scan an inclusive range of mined blocks
    Range { start: u64, end: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file.
    dotenv().ok();
    let cli = Cli::parse();

    let env = Env::new().context("loading configuration")?;
    setup_logger(env.log_level)?;
    info!("Starting sandscan");

    let mut config = DetectorConfig::from_env(&env)?;
    if let Command::Live { max_blocks } = &cli.command {
        config.max_live_blocks = *max_blocks;
    }

    let provider = Arc::new(connect(env.require_wss_url()?).await?);
    if let Command::Range { start, end } = &cli.command {
        validate_range(provider.as_ref(), *start, *end).await?;
    }

    let sink = FileLogSink::create(&env.log_dir)
        .with_context(|| format!("creating log file in {:?}", env.log_dir))?;
    info!("Writing findings to {:?}", sink.path());

    let scanner = Arc::new(BlockScanner::new(provider, Arc::new(config), Arc::new(sink)));

    let stopper = scanner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop();
        }
    });

    let result = match cli.command {
        Command::Live { .. } => scanner.start_live_detection().await,
        Command::Range { start, end } => scanner.start_range_detection(start, end).await,
    };

    match result {
        Ok(summary) => {
            info!(
                "Detection finished: {} blocks ({} failed), {} findings",
                summary.blocks, summary.failed_blocks, summary.findings
            );
            Ok(())
        }
        Err(DetectError::Cancelled) => {
            info!("Detection stopped");
            Ok(())
        }
        Err(e) => {
            error!("Detection failed: {}", e);
            Err(e.into())
        }
    }
}
