//! ReplayLab Runner: backtest orchestration on top of the replay engine.
//!
//! This crate builds on `replaylab-core` to provide:
//! - TOML run configs with a content-addressed run id
//! - CSV bar loading with date-range filtering
//! - Reference strategies (breakout entry, bracket position manager)
//! - Single and parallel batch backtests with a per-run report

pub mod config;
pub mod data_loader;
pub mod report;
pub mod runner;
pub mod strategies;

pub use config::{BacktestSection, ConfigError, RunConfig, RunId};
pub use data_loader::CsvBarSource;
pub use report::{RunReport, TradeSummary};
pub use runner::{run_backtest, run_backtest_on_bars, run_batch, RunError};
pub use strategies::{BracketManager, BreakoutEntry, Direction, StrategyParams};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<StrategyParams>();
        assert_sync::<StrategyParams>();
    }

    #[test]
    fn report_is_send_sync() {
        assert_send::<RunReport>();
        assert_sync::<RunReport>();
    }

    #[test]
    fn run_error_is_send() {
        assert_send::<RunError>();
    }

    #[test]
    fn strategies_are_send() {
        assert_send::<BreakoutEntry>();
        assert_send::<BracketManager>();
    }
}
