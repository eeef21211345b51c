//! Backtest report: what a run did, built from the ledger and the recorded
//! sink events after the coordinator has drained.

use crate::config::RunId;
use chrono::{DateTime, Utc};
use replaylab_core::domain::{Order, Position, PositionId, PositionSide};
use replaylab_core::replay::{RecordingSink, RunOutcome, RunStatus};
use replaylab_core::OrderLedger;
use serde::{Deserialize, Serialize};

/// One position's round trip. `exit_*` is `None` while exposure remains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeSummary {
    pub position: PositionId,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub realized_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
}

impl TradeSummary {
    /// Summarize a position that has opened. Pending positions yield `None`.
    pub fn from_position<'a>(
        position: &Position,
        orders: impl IntoIterator<Item = &'a Order>,
    ) -> Option<Self> {
        let side = position.side?;
        let entry_time = position.opened_at?;

        let mut quantity = 0.0;
        let mut exit_qty = 0.0;
        let mut exit_notional = 0.0;
        for order in orders.into_iter().filter(|o| o.position_id == position.id) {
            let Some(price) = order.avg_fill_price else {
                continue;
            };
            if order.opens_position {
                quantity += order.filled_quantity;
            } else {
                exit_qty += order.filled_quantity;
                exit_notional += price * order.filled_quantity;
            }
        }

        let exit_price = (position.is_closed() && exit_qty > 0.0).then(|| exit_notional / exit_qty);
        Some(Self {
            position: position.id,
            side,
            quantity,
            entry_time,
            entry_price: position.avg_entry_price,
            exit_time: position.closed_at,
            exit_price,
            realized_pnl: position.realized_pnl,
            commission: position.commission,
            net_pnl: position.net_pnl(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.exit_time.is_some()
    }
}

/// Result of one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub symbol: String,
    pub status: RunStatus,
    pub bars_published: usize,
    pub fills: usize,
    pub cancels: usize,
    pub trades: Vec<TradeSummary>,
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub open_position: Option<PositionId>,
    /// BLAKE3 digest of the recorded event stream. Identical configs over
    /// identical bars produce identical digests.
    pub digest: String,
}

impl RunReport {
    pub fn build(
        run_id: RunId,
        symbol: &str,
        outcome: &RunOutcome,
        ledger: &OrderLedger,
        recording: &RecordingSink,
    ) -> Self {
        let trades: Vec<TradeSummary> = ledger
            .positions()
            .filter_map(|p| TradeSummary::from_position(p, ledger.orders()))
            .collect();
        let gross_pnl = trades.iter().map(|t| t.realized_pnl).sum();
        let commission = trades.iter().map(|t| t.commission).sum();
        let net_pnl = trades.iter().map(|t| t.net_pnl).sum();

        Self {
            run_id,
            symbol: symbol.to_string(),
            status: outcome.status,
            bars_published: outcome.bars_published,
            fills: recording.fills().count(),
            cancels: recording.cancelled().count(),
            trades,
            gross_pnl,
            commission,
            net_pnl,
            open_position: outcome.open_position,
            digest: recording.digest(),
        }
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &TradeSummary> {
        self.trades.iter().filter(|t| t.is_closed())
    }

    /// One-line human summary.
    pub fn summary_line(&self) -> String {
        let status = match self.status {
            RunStatus::BarsExhausted => "bars exhausted",
            RunStatus::StrategiesFinished => "strategies finished",
            RunStatus::Cancelled => "cancelled",
        };
        format!(
            "{symbol}: {bars} bars, {status}, {trades} trades ({closed} closed), {fills} fills, \
             {cancels} cancels, net P&L {net:.2} (commission {commission:.2}) [{id}]",
            symbol = self.symbol,
            bars = self.bars_published,
            trades = self.trades.len(),
            closed = self.closed_trades().count(),
            fills = self.fills,
            cancels = self.cancels,
            net = self.net_pnl,
            commission = self.commission,
            id = &self.run_id[..self.run_id.len().min(12)],
        )
    }
}
