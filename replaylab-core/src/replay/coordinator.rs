//! Replay coordinator: publishes bars one at a time, waits for the strategy
//! workers, then resolves pending orders against the bar.
//!
//! Per bar:
//! 1. Publish the bar (shared dataset + broadcast to workers).
//! 2. Wait for the rule barrier.
//! 3. Evaluation pass: accept new orders, match working orders, apply fills
//!    and cancels in the ledger, then report them.
//! 4. If positions opened, wait until each of them is covered and run the
//!    pass again so their protective orders see the same bar. The follow-up
//!    pass only accepts orders of the positions it waited for, and repeats
//!    while it keeps opening positions.
//! 5. If a position closed, wait for the extra workers it spawned to finish.
//! 6. Stop once no worker is running.
//!
//! Bars must be sane and strictly increasing in time; anything else aborts
//! the run as an upstream data error.
//!
//! All state transitions happen on the coordinator's thread, inside the
//! evaluation pass, in position then order id order. Ids are keyed by
//! strategy, so under the `All` barrier the pass sees the same orders and
//! walks them the same way whatever the thread schedule. Orders a worker
//! places in reaction to a fill or cancel, other than a cover, are accepted
//! on the next bar. Workers that share a `StrategyId` must hand positions to
//! each other through the cover signal rather than create them concurrently.

use super::config::ReplayConfig;
use super::dataset::SharedDataset;
use super::signals::{BoardState, CancelToken, SignalBoard, WaitOutcome, WaitStage};
use super::sink::ExecutionSink;
use super::worker::{ReplayEvent, WorkerEnv};
use crate::domain::{
    Bar, Contract, Fill, Order, OrderId, OrderState, PositionId, PositionStatus, StrategyId,
};
use crate::ledger::{LedgerError, OrderLedger};
use crate::matching::{match_order, resolve_oca, OcaCandidate};
use crate::source::SourceError;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

/// Coordinator lifecycle, for observation and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    WaitingForFirstStrategyStart,
    ReplayingBars,
    WaitingForRuleCompletion,
    EvaluatingFills,
    WaitingForPositionCovered,
    WaitingForPositionClose,
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every bar was published.
    BarsExhausted,
    /// No worker was left running.
    StrategiesFinished,
    /// The cancel token fired.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub bars_published: usize,
    pub fills: usize,
    pub cancels: usize,
    /// A position still exposed when the run ended.
    pub open_position: Option<PositionId>,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("strategy stalled {stage} at bar {bar_index} (waited {waited_ms} ms)")]
    StrategyStalled {
        stage: WaitStage,
        bar_index: usize,
        waited_ms: u64,
    },

    #[error("upstream data error at bar {bar_index}: {source}")]
    UpstreamData {
        bar_index: usize,
        #[source]
        source: SourceError,
    },

    #[error("fill evaluation failed for {symbol} at {bar_time}: {source}")]
    Evaluation {
        symbol: String,
        bar_time: DateTime<Utc>,
        #[source]
        source: LedgerError,
    },
}

/// A ledger change made during a pass, reported once the lock is released.
#[derive(Debug)]
enum Transition {
    Accepted {
        order: Order,
    },
    Filled {
        fill: Fill,
        order: Order,
        state: OrderState,
        position: PositionId,
        position_status: PositionStatus,
    },
    Cancelled {
        order: Order,
        state: OrderState,
    },
}

#[derive(Debug, Default, Clone)]
struct PassResult {
    /// Positions that went from pending to open, in id order.
    opened: Vec<PositionId>,
    closed: bool,
}

impl PassResult {
    fn merge(&mut self, other: PassResult) {
        self.opened.extend(other.opened);
        self.closed |= other.closed;
    }
}

/// Which positions may have their `Unsubmit` orders accepted in a pass.
#[derive(Debug, Clone, Copy)]
enum Accept<'a> {
    All,
    Only(&'a [PositionId]),
    Nothing,
}

impl Accept<'_> {
    fn allows(&self, position: PositionId) -> bool {
        match self {
            Accept::All => true,
            Accept::Only(ids) => ids.contains(&position),
            Accept::Nothing => false,
        }
    }
}

pub struct ReplayCoordinator<S: ExecutionSink> {
    contract: Contract,
    config: ReplayConfig,
    board: Arc<SignalBoard>,
    ledger: Arc<Mutex<OrderLedger>>,
    dataset: Arc<SharedDataset>,
    subscribers: Vec<Sender<ReplayEvent>>,
    sink: S,
    state: CoordinatorState,
    fills: usize,
    cancels: usize,
}

impl<S: ExecutionSink> ReplayCoordinator<S> {
    pub fn new(contract: Contract, config: ReplayConfig, sink: S) -> Self {
        let ledger = OrderLedger::new(config.commission.clone());
        Self {
            contract,
            config,
            board: SignalBoard::new(),
            ledger: Arc::new(Mutex::new(ledger)),
            dataset: Arc::new(SharedDataset::new()),
            subscribers: Vec::new(),
            sink,
            state: CoordinatorState::WaitingForFirstStrategyStart,
            fills: 0,
            cancels: 0,
        }
    }

    /// Register a worker. Each worker gets its own event channel; events are
    /// buffered until the worker reads them.
    pub fn worker_env(&mut self, strategy_id: StrategyId) -> WorkerEnv {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        WorkerEnv {
            strategy_id,
            handle: self.board.register(),
            events: rx,
            ledger: Arc::clone(&self.ledger),
            dataset: Arc::clone(&self.dataset),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.board.cancel_token()
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn ledger(&self) -> Arc<Mutex<OrderLedger>> {
        Arc::clone(&self.ledger)
    }

    pub fn dataset(&self) -> Arc<SharedDataset> {
        Arc::clone(&self.dataset)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Replay in-memory bars.
    pub fn run_bars(
        &mut self,
        bars: Vec<Bar>,
        strategy_count: usize,
    ) -> Result<RunOutcome, ReplayError> {
        self.run(bars.into_iter().map(Ok), strategy_count)
    }

    /// Replay `bars` until they run out, every worker finishes, or the run is
    /// cancelled. Blocks the calling thread.
    ///
    /// `strategy_count` is the number of workers that start active. The first
    /// bar is published once that many have started; after a position closes
    /// the coordinator waits until no more than that many are running.
    pub fn run<I>(&mut self, bars: I, strategy_count: usize) -> Result<RunOutcome, ReplayError>
    where
        I: IntoIterator<Item = Result<Bar, SourceError>>,
    {
        let span = info_span!("replay", contract = %self.contract);
        let _enter = span.enter();
        info!(
            workers = self.subscribers.len(),
            strategy_count,
            barrier = ?self.config.rule_barrier,
            "replay starting"
        );

        let result = self.replay(bars.into_iter(), strategy_count.max(1));
        self.teardown(&result);
        result
    }

    fn replay<I>(&mut self, bars: I, strategy_count: usize) -> Result<RunOutcome, ReplayError>
    where
        I: Iterator<Item = Result<Bar, SourceError>>,
    {
        let mut published = 0;
        let mut last_time: Option<DateTime<Utc>> = None;

        self.state = CoordinatorState::WaitingForFirstStrategyStart;
        if !self.wait(WaitStage::FirstStart, 0, |s| s.started.len() >= strategy_count)? {
            return Ok(self.outcome(RunStatus::Cancelled, published));
        }

        for (index, next) in bars.enumerate() {
            let bar = next
                .and_then(|bar| check_bar(bar, last_time))
                .map_err(|source| ReplayError::UpstreamData {
                    bar_index: index,
                    source,
                })?;
            last_time = Some(bar.time);
            if self.board.is_cancelled() {
                return Ok(self.outcome(RunStatus::Cancelled, published));
            }

            self.state = CoordinatorState::ReplayingBars;
            self.board.begin_bar();
            self.dataset.push(bar.clone());
            self.broadcast(ReplayEvent::Bar {
                index,
                bar: bar.clone(),
            });
            published += 1;
            debug!(index, time = %bar.time, close = bar.close, "bar published");

            self.state = CoordinatorState::WaitingForRuleCompletion;
            let barrier = self.config.rule_barrier;
            if !self.wait(WaitStage::RuleCompletion, index, |s| s.rules_complete(barrier))? {
                return Ok(self.outcome(RunStatus::Cancelled, published));
            }

            self.state = CoordinatorState::EvaluatingFills;
            let pass = self.evaluate_pass(&bar, Accept::All)?;
            let mut closed = pass.closed;
            let mut opened = pass.opened;

            while !opened.is_empty() {
                let accept = if self.config.require_position_cover {
                    self.state = CoordinatorState::WaitingForPositionCovered;
                    let waiting = &opened;
                    if !self.wait(WaitStage::PositionCovered, index, |s| {
                        s.running.is_empty() || waiting.iter().all(|p| s.covered.contains(p))
                    })? {
                        return Ok(self.outcome(RunStatus::Cancelled, published));
                    }
                    Accept::Only(&opened)
                } else {
                    Accept::Nothing
                };
                self.state = CoordinatorState::EvaluatingFills;
                let rerun = self.evaluate_pass(&bar, accept)?;
                closed |= rerun.closed;
                opened = rerun.opened;
            }

            if closed {
                self.state = CoordinatorState::WaitingForPositionClose;
                if !self.wait(WaitStage::PositionClose, index, |s| {
                    s.running.len() <= strategy_count
                })? {
                    return Ok(self.outcome(RunStatus::Cancelled, published));
                }
            }

            if self.board.running_count() == 0 {
                return Ok(self.outcome(RunStatus::StrategiesFinished, published));
            }
        }

        Ok(self.outcome(RunStatus::BarsExhausted, published))
    }

    /// Block on the signal board. `Ok(false)` means cancelled.
    fn wait<F>(&mut self, stage: WaitStage, bar_index: usize, ready: F) -> Result<bool, ReplayError>
    where
        F: FnMut(&BoardState) -> bool,
    {
        match self.board.wait_until(self.config.wait_deadline(), ready) {
            WaitOutcome::Ready => Ok(true),
            WaitOutcome::Cancelled => {
                info!(%stage, bar_index, "replay cancelled");
                Ok(false)
            }
            WaitOutcome::TimedOut(waited) => {
                let err = ReplayError::StrategyStalled {
                    stage,
                    bar_index,
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                };
                warn!(error = %err, "strategy stalled");
                self.sink.on_warning(&self.contract, &err.to_string());
                Err(err)
            }
        }
    }

    /// One evaluation pass over every position that is not closed yet.
    fn evaluate_pass(&mut self, bar: &Bar, accept: Accept<'_>) -> Result<PassResult, ReplayError> {
        let mut transitions = Vec::new();
        let mut result = PassResult::default();
        {
            let mut ledger = self.ledger.lock();
            let positions: Vec<PositionId> = ledger
                .positions()
                .filter(|p| !p.is_closed())
                .map(|p| p.id)
                .collect();

            for position in positions {
                let accept_new = accept.allows(position);
                let outcome = evaluate_position(&mut ledger, position, bar, accept_new, &mut transitions)
                    .map_err(|source| ReplayError::Evaluation {
                        symbol: self.contract.symbol.clone(),
                        bar_time: bar.time,
                        source,
                    })?;
                result.merge(outcome);
            }
        }

        self.report(transitions);
        Ok(result)
    }

    fn report(&mut self, transitions: Vec<Transition>) {
        for transition in transitions {
            match transition {
                Transition::Accepted { order } => {
                    self.sink
                        .on_open_order(order.id, &self.contract, &order, &OrderState::submitted());
                }
                Transition::Filled {
                    fill,
                    order,
                    state,
                    position,
                    position_status,
                } => {
                    debug!(
                        order = %order.id,
                        %position,
                        price = fill.price,
                        qty = fill.quantity,
                        "order filled"
                    );
                    self.fills += 1;
                    self.sink.on_open_order(order.id, &self.contract, &order, &state);
                    self.sink.on_exec_details(order.id, &self.contract, &fill);
                    self.broadcast(ReplayEvent::Filled {
                        fill,
                        order,
                        position,
                        position_status,
                    });
                }
                Transition::Cancelled { order, state } => {
                    debug!(order = %order.id, reason = ?state.warning_text, "order cancelled");
                    self.cancels += 1;
                    self.sink.on_open_order(order.id, &self.contract, &order, &state);
                    self.broadcast(ReplayEvent::Cancelled { order });
                }
            }
        }
    }

    fn broadcast(&self, event: ReplayEvent) {
        for tx in &self.subscribers {
            // A worker that finished has dropped its receiver.
            let _ = tx.send(event.clone());
        }
    }

    fn outcome(&self, status: RunStatus, bars_published: usize) -> RunOutcome {
        let open_position = self
            .ledger
            .lock()
            .positions()
            .find(|p| p.is_open())
            .map(|p| p.id);
        RunOutcome {
            status,
            bars_published,
            fills: self.fills,
            cancels: self.cancels,
            open_position,
        }
    }

    fn teardown(&mut self, result: &Result<RunOutcome, ReplayError>) {
        self.state = CoordinatorState::Drained;
        self.broadcast(ReplayEvent::End);
        self.subscribers.clear();

        match result {
            Ok(outcome) => {
                if outcome.status != RunStatus::Cancelled {
                    self.sink.on_historical_data_end(&self.contract);
                }
                if let Some(position) = outcome.open_position {
                    warn!(%position, status = ?outcome.status, "replay ended with an open position");
                }
                info!(
                    status = ?outcome.status,
                    bars = outcome.bars_published,
                    fills = outcome.fills,
                    cancels = outcome.cancels,
                    "replay finished"
                );
            }
            Err(e) => warn!(error = %e, "replay aborted"),
        }

        self.sink.on_cancel_realtime_bars(&self.contract);
        self.sink.on_cancel_broker_data(&self.contract);
    }
}

/// Resolve one position's orders against `bar`.
///
/// Opening orders are always eligible. Closing orders are only eligible when
/// the position was already open when the pass started and still is; a
/// position opened during this pass gets its protective orders checked on the
/// follow-up pass.
fn evaluate_position(
    ledger: &mut OrderLedger,
    position: PositionId,
    bar: &Bar,
    accept_new: bool,
    out: &mut Vec<Transition>,
) -> Result<PassResult, LedgerError> {
    let mut result = PassResult::default();

    if accept_new {
        for id in ledger.accept_pending(position)? {
            if let Some(order) = ledger.get(id) {
                out.push(Transition::Accepted {
                    order: order.clone(),
                });
            }
        }
    }

    let was_open = ledger.has_open_position(position);
    let candidates: Vec<Order> = ledger
        .working_orders(position)
        .into_iter()
        .cloned()
        .collect();
    let mut visited: BTreeSet<OrderId> = BTreeSet::new();

    for order in &candidates {
        if !visited.insert(order.id) || !ledger.get(order.id).is_some_and(Order::is_working) {
            continue;
        }

        let eligible = |o: &Order, ledger: &OrderLedger| {
            o.is_working() && (o.opens_position || (was_open && ledger.has_open_position(position)))
        };

        match &order.oca_group {
            Some(group) => {
                let members: Vec<Order> = ledger
                    .oca_members(position, group)
                    .into_iter()
                    .cloned()
                    .collect();
                let mut offers = Vec::with_capacity(members.len());
                for member in &members {
                    visited.insert(member.id);
                    let fill_price = if eligible(member, &*ledger) {
                        checked_match(member, bar)
                    } else {
                        None
                    };
                    offers.push(OcaCandidate {
                        order_id: member.id,
                        fill_price,
                    });
                }

                if let Some(resolution) = resolve_oca(&offers, bar) {
                    result.merge(fill(ledger, resolution.winner, resolution.fill_price, bar, out)?);
                    for id in resolution.cancelled {
                        cancel(ledger, id, "OCA sibling filled", out)?;
                    }
                }
            }
            None => {
                if eligible(order, &*ledger) {
                    if let Some(price) = checked_match(order, bar) {
                        result.merge(fill(ledger, order.id, price, bar, out)?);
                    }
                }
            }
        }

        if result.closed {
            let leftovers: Vec<OrderId> =
                ledger.open_orders(position).iter().map(|o| o.id).collect();
            for id in leftovers {
                cancel(ledger, id, "position closed", out)?;
            }
            break;
        }
    }

    Ok(result)
}

/// Reject bars that are malformed or do not move forward in time.
fn check_bar(bar: Bar, last_time: Option<DateTime<Utc>>) -> Result<Bar, SourceError> {
    if !bar.is_sane() {
        return Err(SourceError::InvalidBar {
            time: bar.time,
            reason: format!(
                "inconsistent prices o={} h={} l={} c={}",
                bar.open, bar.high, bar.low, bar.close
            ),
        });
    }
    if let Some(last) = last_time.filter(|last| bar.time <= *last) {
        return Err(SourceError::InvalidBar {
            time: bar.time,
            reason: format!("not after the previous bar at {last}"),
        });
    }
    Ok(bar)
}

fn checked_match(order: &Order, bar: &Bar) -> Option<f64> {
    match match_order(order, bar) {
        Ok(price) => price,
        Err(e) => {
            warn!(order = %order.id, error = %e, "order skipped for this bar");
            None
        }
    }
}

fn fill(
    ledger: &mut OrderLedger,
    order_id: OrderId,
    price: f64,
    bar: &Bar,
    out: &mut Vec<Transition>,
) -> Result<PassResult, LedgerError> {
    let order = ledger
        .get(order_id)
        .ok_or(LedgerError::OrderNotFound(order_id))?;
    let (position, quantity) = (order.position_id, order.remaining_quantity());
    let before = ledger.find_position(position)?.status;

    let (fill, state) = ledger.apply_fill(order_id, price, quantity, bar.time)?;

    let after = ledger.find_position(position)?.status;
    let order = ledger
        .get(order_id)
        .cloned()
        .ok_or(LedgerError::OrderNotFound(order_id))?;
    out.push(Transition::Filled {
        fill,
        order,
        state,
        position,
        position_status: after,
    });

    let opened = before != PositionStatus::Open && after == PositionStatus::Open;
    Ok(PassResult {
        opened: if opened { vec![position] } else { Vec::new() },
        closed: before == PositionStatus::Open && after == PositionStatus::Closed,
    })
}

fn cancel(
    ledger: &mut OrderLedger,
    order_id: OrderId,
    reason: &str,
    out: &mut Vec<Transition>,
) -> Result<(), LedgerError> {
    let state = ledger.cancel(order_id, reason)?;
    let order = ledger
        .get(order_id)
        .cloned()
        .ok_or(LedgerError::OrderNotFound(order_id))?;
    out.push(Transition::Cancelled { order, state });
    Ok(())
}
