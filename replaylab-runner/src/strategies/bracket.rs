//! Position manager worker.
//!
//! Sleeps until an entry fills, then joins the run, registers the bracket,
//! and reports the position covered. When the position closes it steps back
//! out of the rule barrier and waits for the next entry.

use super::{submit_bracket, StrategyParams};
use replaylab_core::domain::{Bar, Fill, Order, PositionStatus};
use replaylab_core::replay::{Strategy, StrategyContext};
use replaylab_core::LedgerError;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BracketManager {
    params: StrategyParams,
    managed: usize,
}

impl BracketManager {
    pub fn new(params: StrategyParams) -> Self {
        Self { params, managed: 0 }
    }

    /// Positions this manager has protected.
    pub fn managed(&self) -> usize {
        self.managed
    }
}

impl Strategy for BracketManager {
    fn name(&self) -> &str {
        "bracket-manager"
    }

    fn starts_active(&self) -> bool {
        false
    }

    fn on_bar(&mut self, _ctx: &mut StrategyContext, _index: usize, _bar: &Bar) -> Result<(), LedgerError> {
        Ok(())
    }

    fn on_fill(
        &mut self,
        ctx: &mut StrategyContext,
        fill: &Fill,
        order: &Order,
        position_status: PositionStatus,
    ) -> Result<(), LedgerError> {
        if order.position_id.strategy != ctx.strategy_id() {
            return Ok(());
        }

        match position_status {
            PositionStatus::Open if order.opens_position => {
                ctx.activate();
                submit_bracket(ctx, order.position_id, fill, &self.params)?;
                self.managed += 1;
                debug!(position = %order.position_id, "bracket placed");
                ctx.cover_position(order.position_id);
            }
            PositionStatus::Closed => {
                debug!(position = %order.position_id, "position closed, standing down");
                ctx.deactivate();
            }
            _ => {}
        }
        Ok(())
    }
}
