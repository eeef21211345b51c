//! Reference strategies the runner can wire up from a config file.
//!
//! - [`BreakoutEntry`]: stop entry beyond the recent channel.
//! - [`BracketManager`]: a separate position-manager worker that protects each
//!   entry with a one-cancels-all stop and target.

pub mod bracket;
pub mod breakout;

pub use bracket::BracketManager;
pub use breakout::BreakoutEntry;

use replaylab_core::domain::{Fill, OcaGroup, OrderRequest, PositionId};
use replaylab_core::replay::StrategyContext;
use replaylab_core::LedgerError;
use serde::{Deserialize, Serialize};

/// Which side of the channel to trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Long,
    Short,
    /// Both stops at once, in one OCA group.
    Both,
}

/// `[strategy]` table of a run config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Bars in the breakout channel, excluding the current one.
    pub lookback: usize,
    pub quantity: f64,
    pub direction: Direction,
    /// Protective stop distance from the entry price.
    pub stop_offset: f64,
    /// Profit target distance from the entry price.
    pub target_offset: f64,
    /// Run the bracket in its own worker instead of inside the entry worker.
    pub separate_manager: bool,
    /// Stop entering after this many entries.
    pub max_trades: Option<usize>,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            lookback: 20,
            quantity: 100.0,
            direction: Direction::Long,
            stop_offset: 1.0,
            target_offset: 2.0,
            separate_manager: true,
            max_trades: None,
        }
    }
}

impl StrategyParams {
    pub fn validate(&self) -> Result<(), String> {
        if self.lookback == 0 {
            return Err("strategy.lookback must be at least 1".into());
        }
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(format!("strategy.quantity must be positive, got {}", self.quantity));
        }
        if !(self.stop_offset.is_finite() && self.stop_offset > 0.0) {
            return Err(format!(
                "strategy.stop_offset must be positive, got {}",
                self.stop_offset
            ));
        }
        if !(self.target_offset.is_finite() && self.target_offset > 0.0) {
            return Err(format!(
                "strategy.target_offset must be positive, got {}",
                self.target_offset
            ));
        }
        Ok(())
    }
}

/// Register the stop and target for a just-filled entry, as one OCA group.
pub(crate) fn submit_bracket(
    ctx: &StrategyContext,
    position: PositionId,
    entry: &Fill,
    params: &StrategyParams,
) -> Result<(), LedgerError> {
    let exit = entry.side.opposite();
    let sign = entry.side.sign();
    let stop = entry.price - sign * params.stop_offset;
    let target = entry.price + sign * params.target_offset;
    let group = OcaGroup::new(format!("bracket-{position}"));

    ctx.submit(
        position,
        OrderRequest::stop(exit, entry.quantity, stop).oca(group.clone()),
    )?;
    ctx.submit(
        position,
        OrderRequest::limit(exit, entry.quantity, target).oca(group),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(StrategyParams::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_lookback() {
        let params = StrategyParams {
            lookback: 0,
            ..StrategyParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn direction_parses_lowercase() {
        let params: StrategyParams = toml::from_str("direction = \"both\"").unwrap();
        assert_eq!(params.direction, Direction::Both);
        assert_eq!(params.lookback, 20);
    }
}
