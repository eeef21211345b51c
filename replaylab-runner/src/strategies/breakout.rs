//! Channel breakout entry.
//!
//! When flat, places an opening stop at the highest high (long) and/or the
//! lowest low (short) of the previous `lookback` bars. With both sides the two
//! stops share an OCA group so only one can open the position. The entry
//! order stays working until it fills.

use super::{submit_bracket, Direction, StrategyParams};
use replaylab_core::domain::{Bar, Fill, OcaGroup, Order, OrderRequest, PositionStatus, Side};
use replaylab_core::replay::{Strategy, StrategyContext};
use replaylab_core::LedgerError;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BreakoutEntry {
    params: StrategyParams,
    entries: usize,
}

impl BreakoutEntry {
    pub fn new(params: StrategyParams) -> Self {
        Self { params, entries: 0 }
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Channel over the `lookback` bars before `index`.
    fn channel(&self, ctx: &StrategyContext) -> Option<(f64, f64)> {
        let mut window = ctx.recent_bars(self.params.lookback + 1);
        window.pop();
        if window.len() < self.params.lookback {
            return None;
        }
        let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        Some((high, low))
    }
}

impl Strategy for BreakoutEntry {
    fn name(&self) -> &str {
        "breakout-entry"
    }

    fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize, _bar: &Bar) -> Result<(), LedgerError> {
        if ctx.current_position().is_some() {
            return Ok(());
        }
        if self.params.max_trades.is_some_and(|max| self.entries >= max) {
            debug!(entries = self.entries, "max trades reached");
            ctx.finish();
            return Ok(());
        }
        let Some((high, low)) = self.channel(ctx) else {
            return Ok(());
        };

        let position = ctx.create_position();
        let qty = self.params.quantity;
        debug!(index, %position, high, low, "placing breakout entry");
        match self.params.direction {
            Direction::Long => {
                ctx.submit(position, OrderRequest::stop(Side::Buy, qty, high).opening())?;
            }
            Direction::Short => {
                ctx.submit(position, OrderRequest::stop(Side::Sell, qty, low).opening())?;
            }
            Direction::Both => {
                let group = OcaGroup::new(format!("entry-{position}"));
                ctx.submit(
                    position,
                    OrderRequest::stop(Side::Buy, qty, high)
                        .opening()
                        .oca(group.clone()),
                )?;
                ctx.submit(
                    position,
                    OrderRequest::stop(Side::Sell, qty, low).opening().oca(group),
                )?;
            }
        }
        Ok(())
    }

    fn on_fill(
        &mut self,
        ctx: &mut StrategyContext,
        fill: &Fill,
        order: &Order,
        position_status: PositionStatus,
    ) -> Result<(), LedgerError> {
        if !order.opens_position || position_status != PositionStatus::Open {
            return Ok(());
        }
        if order.position_id.strategy != ctx.strategy_id() {
            return Ok(());
        }

        self.entries += 1;
        if !self.params.separate_manager {
            submit_bracket(ctx, order.position_id, fill, &self.params)?;
            ctx.cover_position(order.position_id);
        }
        Ok(())
    }
}
