//! Strategy workers: the trait user logic implements and the driver loop that
//! runs it on its own thread.
//!
//! The driver owns the lifecycle signals. A strategy never has to remember to
//! call `rule_complete`; it only decides when to activate, when to report a
//! covered position, and when it is finished.

use super::dataset::SharedDataset;
use super::signals::{StrategyHandle, WorkerId};
use crate::domain::{
    Bar, Fill, Order, OrderId, OrderRequest, Position, PositionId, PositionStatus, StrategyId,
};
use crate::ledger::{LedgerError, OrderLedger};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info_span, warn};

/// What the coordinator tells a worker, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayEvent {
    Bar {
        index: usize,
        bar: Bar,
    },
    Filled {
        fill: Fill,
        order: Order,
        position: PositionId,
        position_status: PositionStatus,
    },
    Cancelled {
        order: Order,
    },
    /// No more events follow.
    End,
}

/// Everything a worker thread needs, handed out by
/// [`ReplayCoordinator::worker_env`](super::ReplayCoordinator::worker_env).
#[derive(Debug)]
pub struct WorkerEnv {
    pub(crate) strategy_id: StrategyId,
    pub(crate) handle: StrategyHandle,
    pub(crate) events: Receiver<ReplayEvent>,
    pub(crate) ledger: Arc<Mutex<OrderLedger>>,
    pub(crate) dataset: Arc<SharedDataset>,
}

impl WorkerEnv {
    pub fn strategy_id(&self) -> StrategyId {
        self.strategy_id
    }

    pub fn worker_id(&self) -> WorkerId {
        self.handle.worker_id()
    }
}

/// User strategy logic. Callbacks run on the worker's thread.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Inactive workers receive every event but skip `on_bar` and stay out of
    /// the rule barrier until they call [`StrategyContext::activate`].
    fn starts_active(&self) -> bool {
        true
    }

    fn on_bar(
        &mut self,
        ctx: &mut StrategyContext,
        index: usize,
        bar: &Bar,
    ) -> Result<(), LedgerError>;

    fn on_fill(
        &mut self,
        _ctx: &mut StrategyContext,
        _fill: &Fill,
        _order: &Order,
        _position_status: PositionStatus,
    ) -> Result<(), LedgerError> {
        Ok(())
    }

    fn on_cancel(&mut self, _ctx: &mut StrategyContext, _order: &Order) -> Result<(), LedgerError> {
        Ok(())
    }

    /// Replay ended while the worker was still running.
    fn on_end(&mut self, _ctx: &mut StrategyContext) {}
}

impl<T: Strategy + ?Sized> Strategy for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn starts_active(&self) -> bool {
        (**self).starts_active()
    }
    fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize, bar: &Bar) -> Result<(), LedgerError> {
        (**self).on_bar(ctx, index, bar)
    }
    fn on_fill(
        &mut self,
        ctx: &mut StrategyContext,
        fill: &Fill,
        order: &Order,
        position_status: PositionStatus,
    ) -> Result<(), LedgerError> {
        (**self).on_fill(ctx, fill, order, position_status)
    }
    fn on_cancel(&mut self, ctx: &mut StrategyContext, order: &Order) -> Result<(), LedgerError> {
        (**self).on_cancel(ctx, order)
    }
    fn on_end(&mut self, ctx: &mut StrategyContext) {
        (**self).on_end(ctx)
    }
}

/// A strategy's view of the run: its lifecycle signals, the ledger, and the
/// published bars.
#[derive(Debug)]
pub struct StrategyContext {
    strategy_id: StrategyId,
    handle: StrategyHandle,
    ledger: Arc<Mutex<OrderLedger>>,
    dataset: Arc<SharedDataset>,
    active: bool,
    finished: bool,
}

impl StrategyContext {
    pub fn strategy_id(&self) -> StrategyId {
        self.strategy_id
    }

    pub fn worker_id(&self) -> WorkerId {
        self.handle.worker_id()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Join the rule barrier from the next bar on.
    pub fn activate(&mut self) {
        if !self.active && !self.finished {
            self.active = true;
            self.handle.started();
        }
    }

    /// Leave the rule barrier but keep receiving events. A position manager
    /// does this when its position closes and re-activates on the next entry.
    pub fn deactivate(&mut self) {
        if self.active {
            self.active = false;
            self.handle.complete();
        }
    }

    /// Leave the run. The driver stops delivering events afterwards.
    pub fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.active = false;
            self.handle.complete();
        }
    }

    /// Protective orders for the freshly opened `position` are in place.
    pub fn cover_position(&self, position: PositionId) {
        self.handle.position_covered(position);
    }

    // ── Ledger ─────────────────────────────────────────────────────────

    pub fn create_position(&self) -> PositionId {
        self.ledger.lock().create_position(self.strategy_id)
    }

    pub fn submit(
        &self,
        position: PositionId,
        request: OrderRequest,
    ) -> Result<OrderId, LedgerError> {
        self.ledger.lock().submit(position, request)
    }

    /// The strategy's pending or open position.
    pub fn current_position(&self) -> Option<Position> {
        self.ledger.lock().current_position(self.strategy_id).cloned()
    }

    pub fn position(&self, id: PositionId) -> Result<Position, LedgerError> {
        self.ledger.lock().find_position(id).cloned()
    }

    pub fn open_orders(&self, position: PositionId) -> Vec<Order> {
        self.ledger
            .lock()
            .open_orders(position)
            .into_iter()
            .cloned()
            .collect()
    }

    // ── Bars ───────────────────────────────────────────────────────────

    pub fn bar_count(&self) -> usize {
        self.dataset.len()
    }

    pub fn bar(&self, index: usize) -> Option<Bar> {
        self.dataset.get(index)
    }

    /// Up to `n` most recent published bars, oldest first.
    pub fn recent_bars(&self, n: usize) -> Vec<Bar> {
        self.dataset.recent(n)
    }
}

/// Drive `strategy` until the replay ends or the strategy finishes, then
/// hand it back.
///
/// A callback error finishes the worker; the coordinator carries on without it.
pub fn run_strategy<S: Strategy>(mut strategy: S, env: WorkerEnv) -> S {
    let WorkerEnv {
        strategy_id,
        handle,
        events,
        ledger,
        dataset,
    } = env;
    let mut ctx = StrategyContext {
        strategy_id,
        handle,
        ledger,
        dataset,
        active: false,
        finished: false,
    };

    let span = info_span!(
        "worker",
        strategy = strategy.name(),
        id = %strategy_id,
        worker = %ctx.worker_id()
    );
    let _enter = span.enter();

    if strategy.starts_active() {
        ctx.activate();
    }

    for event in events.iter() {
        let result = match event {
            ReplayEvent::Bar { index, bar } => {
                if ctx.active {
                    let result = strategy.on_bar(&mut ctx, index, &bar);
                    ctx.handle.rule_complete();
                    result
                } else {
                    Ok(())
                }
            }
            ReplayEvent::Filled {
                fill,
                order,
                position_status,
                ..
            } => strategy.on_fill(&mut ctx, &fill, &order, position_status),
            ReplayEvent::Cancelled { order } => strategy.on_cancel(&mut ctx, &order),
            ReplayEvent::End => {
                debug!("replay ended");
                if !ctx.finished {
                    strategy.on_end(&mut ctx);
                }
                break;
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "strategy callback failed, finishing worker");
            ctx.finish();
        }
        if ctx.finished {
            debug!("worker finished");
            break;
        }
    }

    ctx.finish();
    strategy
}

/// Run `strategy` on a named thread.
pub fn spawn_strategy<S>(strategy: S, env: WorkerEnv) -> io::Result<JoinHandle<S>>
where
    S: Strategy + 'static,
{
    let name = format!("replay-{}", strategy.name());
    thread::Builder::new()
        .name(name)
        .spawn(move || run_strategy(strategy, env))
}
