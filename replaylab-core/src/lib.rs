//! ReplayLab Core: deterministic bar replay and order-fill matching.
//!
//! This crate contains:
//! - Domain types (bars, orders, fills, positions, order states)
//! - Order ledger with an audit trail of every status transition
//! - Fill matcher (pure) with one-cancels-all resolution
//! - Replay coordinator that drives strategy workers on their own threads
//!   through a per-bar barrier
//! - Bar source trait and an in-memory source

pub mod domain;
pub mod ledger;
pub mod matching;
pub mod replay;
pub mod source;

pub use ledger::{CommissionSchedule, LedgerError, OrderLedger};
pub use matching::{match_order, resolve_oca, MatchError};
pub use replay::{ReplayConfig, ReplayCoordinator, ReplayError, RunOutcome, RunStatus};
pub use source::{BarSize, BarSource, InMemoryBarSource, SourceError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything that crosses the worker thread boundary
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();
        require_send::<domain::Order>();
        require_sync::<domain::Order>();
        require_send::<domain::Fill>();
        require_sync::<domain::Fill>();
        require_send::<domain::Position>();
        require_sync::<domain::Position>();
        require_send::<domain::OrderState>();
        require_sync::<domain::OrderState>();

        // Shared run state
        require_send::<OrderLedger>();
        require_sync::<OrderLedger>();
        require_send::<replay::SharedDataset>();
        require_sync::<replay::SharedDataset>();
        require_send::<replay::SignalBoard>();
        require_sync::<replay::SignalBoard>();
        require_send::<replay::StrategyHandle>();
        require_sync::<replay::StrategyHandle>();
        require_send::<replay::CancelToken>();
        require_sync::<replay::CancelToken>();

        // Worker side
        require_send::<replay::WorkerEnv>();
        require_send::<replay::ReplayEvent>();
        require_send::<replay::StrategyContext>();

        // Errors
        require_send::<ReplayError>();
        require_sync::<ReplayError>();
        require_send::<LedgerError>();
        require_sync::<LedgerError>();
    }

    /// Architecture contract: the matcher decides from the order and the bar
    /// alone. It cannot see the ledger, so it cannot change order state.
    #[test]
    fn matcher_takes_no_ledger() {
        fn _check(order: &domain::Order, bar: &domain::Bar) -> Result<Option<f64>, MatchError> {
            match_order(order, bar)
        }
    }
}
