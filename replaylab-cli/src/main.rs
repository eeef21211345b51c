//! ReplayLab CLI: run backtests from TOML config files.
//!
//! Commands:
//! - `run`: replay one config and print its report
//! - `batch`: replay several configs in parallel and print one summary each
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use replaylab_runner::{run_backtest, run_batch, RunConfig, RunReport};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "replaylab",
    about = "ReplayLab CLI: deterministic bar replay backtests"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay one backtest config.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Print the full report as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Replay several configs in parallel.
    Batch {
        /// TOML config files.
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, json } => run_cmd(&config, json),
        Commands::Batch { configs } => batch_cmd(&configs),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: &Path) -> Result<RunConfig> {
    RunConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn run_cmd(path: &Path, json: bool) -> Result<()> {
    let config = load_config(path)?;
    let report = run_backtest(&config).with_context(|| format!("running {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn batch_cmd(paths: &[PathBuf]) -> Result<()> {
    let configs = paths
        .iter()
        .map(|p| load_config(p))
        .collect::<Result<Vec<_>>>()?;
    info!(runs = configs.len(), "starting batch");

    let mut failed = 0;
    for (path, result) in paths.iter().zip(run_batch(&configs)) {
        match result {
            Ok(report) => println!("{}", report.summary_line()),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e}", path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} runs failed", paths.len());
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("{}", report.summary_line());
    if report.trades.is_empty() {
        println!("  no trades");
        return;
    }
    println!(
        "  {:>8}  {:<5}  {:>8}  {:<10}  {:>10}  {:<10}  {:>10}  {:>10}",
        "pos", "side", "qty", "entry", "price", "exit", "price", "net P&L"
    );
    for t in &report.trades {
        let exit_day = t
            .exit_time
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "open".into());
        let exit_price = t
            .exit_price
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:>8}  {:<5}  {:>8.0}  {:<10}  {:>10.2}  {:<10}  {:>10}  {:>10.2}",
            t.position.to_string(),
            format!("{:?}", t.side),
            t.quantity,
            t.entry_time.format("%Y-%m-%d"),
            t.entry_price,
            exit_day,
            exit_price,
            t.net_pnl
        );
    }
    println!("  digest {}", report.digest);
}
