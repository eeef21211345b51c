//! Signal board: the lifecycle flags workers raise and the coordinator waits on.
//!
//! All flags live in one `BoardState` behind a single mutex, with one condvar
//! that every signal notifies. The coordinator never busy-waits; each blocking
//! step is a predicate over the state, re-checked on every wake-up, and every
//! wait gives up on cancellation.

use super::config::RuleBarrier;
use crate::domain::PositionId;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of one worker thread, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Where the coordinator was blocked. Carried by stall diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitStage {
    FirstStart,
    RuleCompletion,
    PositionCovered,
    PositionClose,
}

impl fmt::Display for WaitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WaitStage::FirstStart => "waiting for the first strategy start",
            WaitStage::RuleCompletion => "waiting for rule completion",
            WaitStage::PositionCovered => "waiting for position cover",
            WaitStage::PositionClose => "waiting for position close",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Cancelled,
    TimedOut(Duration),
}

#[derive(Debug, Default)]
pub(crate) struct BoardState {
    pub(crate) started: BTreeSet<WorkerId>,
    pub(crate) running: BTreeSet<WorkerId>,
    pub(crate) responded: BTreeSet<WorkerId>,
    pub(crate) covered: BTreeSet<PositionId>,
    pub(crate) cancelled: bool,
    next_worker: u64,
}

impl BoardState {
    /// Rule barrier for the current bar. An empty running set always passes.
    pub(crate) fn rules_complete(&self, barrier: RuleBarrier) -> bool {
        if self.running.is_empty() {
            return true;
        }
        match barrier {
            RuleBarrier::Any => self.running.iter().any(|w| self.responded.contains(w)),
            RuleBarrier::All => self.running.is_subset(&self.responded),
        }
    }
}

#[derive(Debug, Default)]
pub struct SignalBoard {
    state: Mutex<BoardState>,
    changed: Condvar,
}

impl SignalBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand out a handle for a new worker. The worker is not running until
    /// it calls [`StrategyHandle::started`].
    pub fn register(self: &Arc<Self>) -> StrategyHandle {
        let mut state = self.state.lock();
        state.next_worker += 1;
        StrategyHandle {
            board: Arc::clone(self),
            worker: WorkerId(state.next_worker),
        }
    }

    pub fn cancel_token(self: &Arc<Self>) -> CancelToken {
        CancelToken {
            board: Arc::clone(self),
        }
    }

    pub fn running_count(&self) -> usize {
        self.state.lock().running.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Start a new bar: forget last bar's rule completions and covers.
    pub(crate) fn begin_bar(&self) {
        let mut state = self.state.lock();
        state.responded.clear();
        state.covered.clear();
    }

    /// Block until `ready` holds, the board is cancelled, or `deadline`
    /// elapses. Cancellation is checked first.
    pub(crate) fn wait_until<F>(&self, deadline: Option<Duration>, mut ready: F) -> WaitOutcome
    where
        F: FnMut(&BoardState) -> bool,
    {
        let start = Instant::now();
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return WaitOutcome::Cancelled;
            }
            if ready(&state) {
                return WaitOutcome::Ready;
            }
            match deadline {
                None => self.changed.wait(&mut state),
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return WaitOutcome::TimedOut(elapsed);
                    }
                    self.changed.wait_for(&mut state, limit - elapsed);
                }
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut BoardState)) {
        let mut state = self.state.lock();
        f(&mut state);
        drop(state);
        self.changed.notify_all();
    }
}

/// A worker's side of the board. Every signal wakes the coordinator.
#[derive(Debug, Clone)]
pub struct StrategyHandle {
    board: Arc<SignalBoard>,
    worker: WorkerId,
}

impl StrategyHandle {
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// The worker is live and takes part in the rule barrier.
    pub fn started(&self) {
        let worker = self.worker;
        self.board.update(|s| {
            s.started.insert(worker);
            s.running.insert(worker);
        });
    }

    /// The worker is done for the rest of the run.
    pub fn complete(&self) {
        let worker = self.worker;
        self.board.update(|s| {
            s.running.remove(&worker);
            s.responded.remove(&worker);
        });
    }

    /// The worker has finished evaluating its rules for the current bar.
    pub fn rule_complete(&self) {
        let worker = self.worker;
        self.board.update(|s| {
            s.responded.insert(worker);
        });
    }

    /// Protective orders for a freshly opened position are in the ledger.
    pub fn position_covered(&self, position: PositionId) {
        self.board.update(|s| {
            s.covered.insert(position);
        });
    }

    pub fn is_running(&self) -> bool {
        self.board.state.lock().running.contains(&self.worker)
    }
}

/// Cooperative cancellation for a replay run. Clone freely across threads.
#[derive(Debug, Clone)]
pub struct CancelToken {
    board: Arc<SignalBoard>,
}

impl CancelToken {
    /// Wake every wait and stop the run at the next synchronization point.
    pub fn cancel(&self) {
        self.board.update(|s| s.cancelled = true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.board.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StrategyId;
    use std::thread;

    #[test]
    fn worker_ids_are_sequential() {
        let board = SignalBoard::new();
        assert_eq!(board.register().worker_id(), WorkerId(1));
        assert_eq!(board.register().worker_id(), WorkerId(2));
    }

    #[test]
    fn start_and_complete_track_running() {
        let board = SignalBoard::new();
        let handle = board.register();
        assert!(!handle.is_running());
        handle.started();
        assert!(handle.is_running());
        assert_eq!(board.running_count(), 1);
        handle.complete();
        assert_eq!(board.running_count(), 0);
    }

    #[test]
    fn all_barrier_needs_every_running_worker() {
        let board = SignalBoard::new();
        let a = board.register();
        let b = board.register();
        a.started();
        b.started();

        a.rule_complete();
        {
            let state = board.state.lock();
            assert!(state.rules_complete(RuleBarrier::Any));
            assert!(!state.rules_complete(RuleBarrier::All));
        }
        b.rule_complete();
        assert!(board.state.lock().rules_complete(RuleBarrier::All));

        board.begin_bar();
        assert!(!board.state.lock().rules_complete(RuleBarrier::Any));
    }

    #[test]
    fn completed_worker_drops_out_of_barrier() {
        let board = SignalBoard::new();
        let a = board.register();
        let b = board.register();
        a.started();
        b.started();
        a.rule_complete();
        b.complete();
        assert!(board.state.lock().rules_complete(RuleBarrier::All));
    }

    #[test]
    fn empty_running_set_passes_barrier() {
        let board = SignalBoard::new();
        assert!(board.state.lock().rules_complete(RuleBarrier::All));
    }

    #[test]
    fn wait_wakes_on_signal_from_another_thread() {
        let board = SignalBoard::new();
        let handle = board.register();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.started();
        });
        let outcome = board.wait_until(Some(Duration::from_secs(5)), |s| !s.started.is_empty());
        assert_eq!(outcome, WaitOutcome::Ready);
        worker.join().unwrap();
    }

    #[test]
    fn cancel_wakes_blocked_wait() {
        let board = SignalBoard::new();
        let token = board.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        let outcome = board.wait_until(None, |_| false);
        assert_eq!(outcome, WaitOutcome::Cancelled);
        canceller.join().unwrap();
    }

    #[test]
    fn cancellation_wins_over_ready_predicate() {
        let board = SignalBoard::new();
        board.cancel_token().cancel();
        assert_eq!(board.wait_until(None, |_| true), WaitOutcome::Cancelled);
    }

    #[test]
    fn deadline_times_out() {
        let board = SignalBoard::new();
        let outcome = board.wait_until(Some(Duration::from_millis(10)), |_| false);
        assert!(matches!(outcome, WaitOutcome::TimedOut(d) if d >= Duration::from_millis(10)));
    }

    #[test]
    fn covers_are_per_position_and_reset_each_bar() {
        let board = SignalBoard::new();
        let handle = board.register();
        let first = PositionId::new(StrategyId(1), 1);
        let second = PositionId::new(StrategyId(2), 1);
        handle.position_covered(first);
        {
            let state = board.state.lock();
            assert!(state.covered.contains(&first));
            assert!(!state.covered.contains(&second));
        }
        board.begin_bar();
        assert!(board.state.lock().covered.is_empty());
    }
}
