//! Command line front end.
//!
//! Exit codes: 0 when every table completed without findings, 1 when every
//! table completed but discrepancies were found, 2 when a table could not be
//! validated or the run could not start.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use table_validator::domain::report::ReportVerdict;
use table_validator::infrastructure::{AppConfig, build_coordinator, init_logging_with_config};

#[derive(Debug, Parser)]
#[command(name = "table-validator", version, about)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    config: PathBuf,

    /// Continue unfinished runs from their last checkpoint
    #[arg(long)]
    resume: bool,

    /// Validate only these tables (table id or source table name)
    #[arg(long, num_args = 1..)]
    tables: Vec<String>,

    /// Overrides the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load_validated(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return incomplete();
        }
    };

    let mut logging = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging.level.clone_from(level);
    }
    if let Err(e) = init_logging_with_config(&logging) {
        eprintln!("Failed to initialize logging: {e:#}");
        return incomplete();
    }

    let coordinator = match build_coordinator(&config).await {
        Ok(coordinator) => coordinator,
        Err(e) => {
            error!("Startup failed: {e:#}");
            return incomplete();
        }
    };

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight chunks and pausing");
            cancel.cancel();
        }
    });

    let selected = (!cli.tables.is_empty()).then_some(cli.tables.as_slice());
    match coordinator.run_all(selected, cli.resume).await {
        Ok(report) => {
            println!("{}", report.render_text());
            let verdict = report.verdict();
            info!(?verdict, "Validation finished");
            ExitCode::from(exit_code(verdict))
        }
        Err(e) => {
            error!("Validation could not start: {e}");
            incomplete()
        }
    }
}

fn exit_code(verdict: ReportVerdict) -> u8 {
    u8::try_from(verdict.exit_code()).unwrap_or(2)
}

fn incomplete() -> ExitCode {
    ExitCode::from(exit_code(ReportVerdict::Incomplete))
}
