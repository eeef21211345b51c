//! Backtest runner: wires a config to a coordinator and its workers.
//!
//! Entry points:
//! - `run_backtest()`: streams bars from the config's CSV file. Used by the CLI.
//! - `run_backtest_on_bars()`: replays pre-loaded bars, no I/O.
//! - `run_batch()`: several independent backtests in parallel, one
//!   coordinator per config.

use std::thread::JoinHandle;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, info_span, warn};

use replaylab_core::domain::{Bar, Contract, StrategyId};
use replaylab_core::replay::{
    spawn_strategy, RecordingSink, ReplayCoordinator, ReplayError, Strategy, TracingSink,
};
use replaylab_core::SourceError;

use crate::config::{ConfigError, RunConfig};
use crate::data_loader::CsvBarSource;
use crate::report::RunReport;
use crate::strategies::{BracketManager, BreakoutEntry};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Source(#[from] SourceError),
    #[error("replay error: {0}")]
    Replay(#[from] ReplayError),
    #[error("failed to spawn strategy worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("strategy worker '{0}' panicked")]
    WorkerPanicked(String),
}

/// Run one backtest, streaming bars from the configured CSV file.
pub fn run_backtest(config: &RunConfig) -> Result<RunReport, RunError> {
    config.validate()?;
    let (from, to) = config.backtest.window();
    let bars = CsvBarSource::new(&config.backtest.bars)
        .with_bar_size(config.backtest.bar_size)
        .stream(from, to)?;
    run_with_feed(config, bars)
}

/// Run one backtest over pre-loaded bars. `config.backtest.bars` is ignored;
/// the coordinator still rejects bars that are malformed or out of order.
pub fn run_backtest_on_bars(config: &RunConfig, bars: Vec<Bar>) -> Result<RunReport, RunError> {
    config.validate()?;
    run_with_feed(config, bars.into_iter().map(Ok))
}

/// Run each config on its own coordinator, in parallel. Results keep the
/// order of `configs`.
pub fn run_batch(configs: &[RunConfig]) -> Vec<Result<RunReport, RunError>> {
    configs.par_iter().map(run_backtest).collect()
}

fn run_with_feed<I>(config: &RunConfig, bars: I) -> Result<RunReport, RunError>
where
    I: IntoIterator<Item = Result<Bar, SourceError>>,
{
    let run_id = config.run_id();
    let symbol = config.backtest.symbol.as_str();
    let span = info_span!("backtest", symbol, run = &run_id[..12]);
    let _enter = span.enter();

    let contract = Contract::new(config.backtest.contract_id, symbol);
    let mut coordinator = ReplayCoordinator::new(
        contract,
        config.replay.clone(),
        (RecordingSink::new(), TracingSink),
    );

    // The entry and its manager trade the same positions, so they share an id.
    let strategy_id = StrategyId(1);
    let mut strategies: Vec<Box<dyn Strategy>> =
        vec![Box::new(BreakoutEntry::new(config.strategy.clone()))];
    if config.strategy.separate_manager {
        strategies.push(Box::new(BracketManager::new(config.strategy.clone())));
    }
    let active = strategies.iter().filter(|s| s.starts_active()).count();

    let mut workers = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        let env = coordinator.worker_env(strategy_id);
        workers.push(spawn_strategy(strategy, env)?);
    }

    let outcome = coordinator.run(bars, active);
    join_workers(workers)?;
    let outcome = outcome?;

    if let Some(position) = outcome.open_position {
        warn!(%position, "run ended with an open position");
    }

    let ledger = coordinator.ledger();
    let ledger = ledger.lock();
    let (recording, _) = coordinator.sink();
    let report = RunReport::build(run_id, symbol, &outcome, &ledger, recording);
    info!(
        status = ?report.status,
        bars = report.bars_published,
        trades = report.trades.len(),
        net_pnl = report.net_pnl,
        "backtest complete"
    );
    Ok(report)
}

/// Wait for every worker; the coordinator has already broadcast the end of
/// the replay, so none of them blocks.
fn join_workers(workers: Vec<JoinHandle<Box<dyn Strategy>>>) -> Result<(), RunError> {
    let mut panicked = None;
    for worker in workers {
        let name = worker.thread().name().unwrap_or("replay-worker").to_string();
        if worker.join().is_err() {
            warn!(worker = %name, "strategy worker panicked");
            panicked.get_or_insert(name);
        }
    }
    match panicked {
        Some(name) => Err(RunError::WorkerPanicked(name)),
        None => Ok(()),
    }
}
