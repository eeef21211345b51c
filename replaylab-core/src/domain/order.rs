//! Order types, order lifecycle states, and order requests.

use super::ids::{OcaGroup, OrderId, PositionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// How the order is priced. Prices live on the order itself
/// (`limit_price`, `aux_price`), as a broker ticket carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Fills at the bar's open.
    Market,
    /// Triggers on `aux_price`.
    Stop,
    /// Triggers on `aux_price`, then bounded by `limit_price`.
    StopLimit,
    /// Fills at `limit_price` or better.
    Limit,
}

impl OrderKind {
    /// Broker-style short code (MKT, STP, STPLMT, LMT).
    pub fn code(self) -> &'static str {
        match self {
            OrderKind::Market => "MKT",
            OrderKind::Stop => "STP",
            OrderKind::StopLimit => "STPLMT",
            OrderKind::Limit => "LMT",
        }
    }
}

/// Order lifecycle states.
///
/// `Unsubmit → Submitted → Filled | Cancelled`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created by a strategy, not yet accepted.
    Unsubmit,
    /// Accepted and working.
    Submitted,
    /// Completely filled.
    Filled,
    /// Cancelled (OCA sibling filled, position closed).
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Unsubmit => "UNSUBMIT",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// A single working instruction owned by a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub position_id: PositionId,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub oca_group: Option<OcaGroup>,
    /// Fill establishes (or adds to) exposure rather than reducing it.
    pub opens_position: bool,
    /// A non-transmitted order is held until a later order of the same
    /// position is transmitted.
    pub transmit: bool,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub avg_fill_price: Option<f64>,
}

impl Order {
    pub fn is_working(&self) -> bool {
        self.status == OrderStatus::Submitted
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn remaining_quantity(&self) -> f64 {
        self.quantity - self.filled_quantity
    }

    /// The price that arms the order: aux for stop kinds, limit for limits.
    pub fn trigger_price(&self) -> Option<f64> {
        match self.kind {
            OrderKind::Market => None,
            OrderKind::Stop | OrderKind::StopLimit => self.aux_price,
            OrderKind::Limit => self.limit_price,
        }
    }
}

/// What a strategy asks the ledger to create. The ledger assigns id,
/// position and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub aux_price: Option<f64>,
    pub oca_group: Option<OcaGroup>,
    pub opens_position: bool,
    pub transmit: bool,
}

impl OrderRequest {
    fn base(side: Side, kind: OrderKind, quantity: f64) -> Self {
        Self {
            side,
            kind,
            quantity,
            limit_price: None,
            aux_price: None,
            oca_group: None,
            opens_position: false,
            transmit: true,
        }
    }

    pub fn market(side: Side, quantity: f64) -> Self {
        Self::base(side, OrderKind::Market, quantity)
    }

    pub fn stop(side: Side, quantity: f64, stop: f64) -> Self {
        Self {
            aux_price: Some(stop),
            ..Self::base(side, OrderKind::Stop, quantity)
        }
    }

    pub fn limit(side: Side, quantity: f64, limit: f64) -> Self {
        Self {
            limit_price: Some(limit),
            ..Self::base(side, OrderKind::Limit, quantity)
        }
    }

    pub fn stop_limit(side: Side, quantity: f64, stop: f64, limit: f64) -> Self {
        Self {
            aux_price: Some(stop),
            limit_price: Some(limit),
            ..Self::base(side, OrderKind::StopLimit, quantity)
        }
    }

    /// Mark as an opening order.
    pub fn opening(mut self) -> Self {
        self.opens_position = true;
        self
    }

    pub fn oca(mut self, group: OcaGroup) -> Self {
        self.oca_group = Some(group);
        self
    }

    pub fn transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub reason: String,
}
