//! Position: the trade aggregate that owns a strategy's orders for one
//! round of market exposure.

use super::ids::{OrderId, PositionId, StrategyId};
use super::order::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const QTY_EPSILON: f64 = 1e-9;

/// Position lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    /// Orders exist but nothing has opened yet.
    Pending,
    /// An opening order has filled and exposure remains.
    Open,
    /// Exposure is back to zero. Terminal.
    Closed,
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_opening(side: Side) -> Self {
        match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }

    fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub strategy_id: StrategyId,
    pub status: PositionStatus,
    pub side: Option<PositionSide>,
    pub open_quantity: f64,
    pub avg_entry_price: f64,
    pub realized_pnl: f64,
    pub commission: f64,
    pub order_ids: Vec<OrderId>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn new(id: PositionId, strategy_id: StrategyId) -> Self {
        Self {
            id,
            strategy_id,
            status: PositionStatus::Pending,
            side: None,
            open_quantity: 0.0,
            avg_entry_price: 0.0,
            realized_pnl: 0.0,
            commission: 0.0,
            order_ids: Vec::new(),
            opened_at: None,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    /// Net P&L after commissions.
    pub fn net_pnl(&self) -> f64 {
        self.realized_pnl - self.commission
    }

    /// Add exposure. The first opening fill fixes the side.
    pub(crate) fn apply_opening_fill(
        &mut self,
        side: Side,
        price: f64,
        quantity: f64,
        time: DateTime<Utc>,
    ) {
        if self.side.is_none() {
            self.side = Some(PositionSide::from_opening(side));
            self.opened_at = Some(time);
        }
        let total = self.open_quantity + quantity;
        self.avg_entry_price = if total > 0.0 {
            (self.avg_entry_price * self.open_quantity + price * quantity) / total
        } else {
            price
        };
        self.open_quantity = total;
        self.status = PositionStatus::Open;
    }

    /// Reduce exposure and realize P&L. Returns true if the position closed.
    pub(crate) fn apply_closing_fill(
        &mut self,
        price: f64,
        quantity: f64,
        time: DateTime<Utc>,
    ) -> bool {
        let sign = self.side.map(PositionSide::sign).unwrap_or(1.0);
        let closed_qty = quantity.min(self.open_quantity);
        self.realized_pnl += (price - self.avg_entry_price) * closed_qty * sign;
        self.open_quantity -= closed_qty;
        if self.open_quantity <= QTY_EPSILON {
            self.open_quantity = 0.0;
            self.status = PositionStatus::Closed;
            self.closed_at = Some(time);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    #[test]
    fn long_round_trip_realizes_pnl() {
        let mut pos = Position::new(PositionId::new(StrategyId(1), 1), StrategyId(1));
        pos.apply_opening_fill(Side::Buy, 10.0, 100.0, t());
        assert!(pos.is_open());
        assert_eq!(pos.side, Some(PositionSide::Long));

        let closed = pos.apply_closing_fill(10.5, 100.0, t());
        assert!(closed);
        assert!(pos.is_closed());
        assert!((pos.realized_pnl - 50.0).abs() < 1e-9);
    }

    #[test]
    fn short_round_trip_realizes_pnl() {
        let mut pos = Position::new(PositionId::new(StrategyId(1), 1), StrategyId(1));
        pos.apply_opening_fill(Side::Sell, 20.0, 10.0, t());
        assert_eq!(pos.side, Some(PositionSide::Short));
        pos.apply_closing_fill(19.0, 10.0, t());
        assert!((pos.realized_pnl - 10.0).abs() < 1e-9);
    }

    #[test]
    fn partial_close_keeps_position_open() {
        let mut pos = Position::new(PositionId::new(StrategyId(1), 1), StrategyId(1));
        pos.apply_opening_fill(Side::Buy, 10.0, 100.0, t());
        assert!(!pos.apply_closing_fill(11.0, 40.0, t()));
        assert!(pos.is_open());
        assert_eq!(pos.open_quantity, 60.0);
    }

    #[test]
    fn scaling_in_averages_entry() {
        let mut pos = Position::new(PositionId::new(StrategyId(1), 1), StrategyId(1));
        pos.apply_opening_fill(Side::Buy, 10.0, 100.0, t());
        pos.apply_opening_fill(Side::Buy, 12.0, 100.0, t());
        assert!((pos.avg_entry_price - 11.0).abs() < 1e-9);
        assert_eq!(pos.open_quantity, 200.0);
    }
}
