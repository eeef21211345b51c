//! Order ledger: positions, their orders, and every order state transition.
//!
//! The ledger is the registry the coordinator and the strategy workers share:
//! - Workers create positions and append orders (`Unsubmit`)
//! - The coordinator accepts them (`Submitted`) honoring the transmit flag
//! - The coordinator applies fills and cancels; both fail loudly on a
//!   terminal order so bookkeeping bugs surface immediately
//! - Every transition lands in the audit trail
//!
//! The ledger does NOT decide whether an order fills; that is the matcher's
//! job. It only records what the coordinator tells it.

use crate::domain::{
    ExecId, Fill, OcaGroup, Order, OrderAuditEntry, OrderId, OrderRequest, OrderState,
    OrderStatus, Position, PositionId, PositionStatus, Sequence, StrategyId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from ledger operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {order_id} is already terminal ({status})")]
    OrderAlreadyTerminal {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("position {0} not found")]
    PositionNotFound(PositionId),

    #[error("position {0} is closed")]
    PositionClosed(PositionId),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

/// Per-share commission with a per-execution floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionSchedule {
    pub per_share: f64,
    pub minimum: f64,
    pub currency: String,
}

impl CommissionSchedule {
    /// `max(minimum, quantity * per_share)`
    pub fn charge(&self, quantity: f64) -> f64 {
        (quantity * self.per_share).max(self.minimum)
    }
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self {
            per_share: 0.005,
            minimum: 1.0,
            currency: "USD".into(),
        }
    }
}

/// Positions and orders for one replay run.
#[derive(Debug, Default)]
pub struct OrderLedger {
    orders: BTreeMap<OrderId, Order>,
    positions: BTreeMap<PositionId, Position>,
    position_seq: BTreeMap<StrategyId, Sequence>,
    exec_seq: Sequence,
    commission: CommissionSchedule,
    audit_trail: Vec<OrderAuditEntry>,
}

impl OrderLedger {
    pub fn new(commission: CommissionSchedule) -> Self {
        Self {
            commission,
            ..Self::default()
        }
    }

    // ── Creation (strategy side) ───────────────────────────────────────

    /// Open a new, empty position for a strategy. Ids count per strategy,
    /// so they do not depend on how concurrent workers interleave.
    pub fn create_position(&mut self, strategy_id: StrategyId) -> PositionId {
        let seq = self.position_seq.entry(strategy_id).or_default().next();
        let id = PositionId::new(strategy_id, seq);
        self.positions.insert(id, Position::new(id, strategy_id));
        id
    }

    /// Append an order to a position. It starts in `Unsubmit`.
    pub fn submit(
        &mut self,
        position_id: PositionId,
        request: OrderRequest,
    ) -> Result<OrderId, LedgerError> {
        if !(request.quantity.is_finite() && request.quantity > 0.0) {
            return Err(LedgerError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }
        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(LedgerError::PositionNotFound(position_id))?;
        if position.is_closed() {
            return Err(LedgerError::PositionClosed(position_id));
        }

        let id = OrderId::new(position_id, position.order_ids.len() as u64 + 1);
        position.order_ids.push(id);
        self.orders.insert(
            id,
            Order {
                id,
                position_id,
                side: request.side,
                kind: request.kind,
                quantity: request.quantity,
                limit_price: request.limit_price,
                aux_price: request.aux_price,
                oca_group: request.oca_group,
                opens_position: request.opens_position,
                transmit: request.transmit,
                status: OrderStatus::Unsubmit,
                filled_quantity: 0.0,
                avg_fill_price: None,
            },
        );
        Ok(id)
    }

    // ── Transitions (coordinator side) ─────────────────────────────────

    /// Move a position's `Unsubmit` orders to `Submitted`.
    ///
    /// Orders are released in creation order. An order with `transmit = false`
    /// is held until a later order of the same position is transmitted, then
    /// the whole held run is released together. Returns the accepted ids.
    pub fn accept_pending(&mut self, position_id: PositionId) -> Result<Vec<OrderId>, LedgerError> {
        let position = self
            .positions
            .get(&position_id)
            .ok_or(LedgerError::PositionNotFound(position_id))?;

        let mut accepted = Vec::new();
        let mut held = Vec::new();
        for id in &position.order_ids {
            let order = self.orders.get(id).ok_or(LedgerError::OrderNotFound(*id))?;
            if order.status != OrderStatus::Unsubmit {
                continue;
            }
            held.push(*id);
            if order.transmit {
                accepted.append(&mut held);
            }
        }

        for id in &accepted {
            self.transition(*id, OrderStatus::Submitted, "accepted")?;
        }
        Ok(accepted)
    }

    /// Record an execution on a live order and update its position.
    ///
    /// Stamps the next execution id and charges commission. The order becomes
    /// `Filled` once its full quantity has executed.
    pub fn apply_fill(
        &mut self,
        order_id: OrderId,
        price: f64,
        quantity: f64,
        time: DateTime<Utc>,
    ) -> Result<(Fill, OrderState), LedgerError> {
        let order = self.live_order(order_id)?;
        if !(price.is_finite() && price > 0.0) {
            return Err(LedgerError::InvalidOrder(format!(
                "fill price for order {order_id} must be positive, got {price}"
            )));
        }
        let quantity = quantity.min(order.remaining_quantity());
        let (side, opens, position_id) = (order.side, order.opens_position, order.position_id);

        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(LedgerError::PositionNotFound(position_id))?;
        if !opens && position.status != PositionStatus::Open {
            return Err(LedgerError::InvalidOrder(format!(
                "closing order {order_id} filled while {position_id} has no exposure"
            )));
        }

        let commission = self.commission.charge(quantity);
        position.commission += commission;
        if opens {
            position.apply_opening_fill(side, price, quantity, time);
        } else {
            position.apply_closing_fill(price, quantity, time);
        }

        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        let prior_notional = order.avg_fill_price.unwrap_or(0.0) * order.filled_quantity;
        order.filled_quantity += quantity;
        order.avg_fill_price = Some((prior_notional + price * quantity) / order.filled_quantity);
        let complete = order.remaining_quantity() <= 1e-9;

        if complete {
            self.transition(order_id, OrderStatus::Filled, "filled")?;
        }

        let fill = Fill {
            exec_id: ExecId(self.exec_seq.next()),
            order_id,
            time,
            side,
            price,
            quantity,
            commission,
        };
        let mut state = OrderState::filled(commission, &self.commission.currency);
        if !complete {
            state.status = OrderStatus::Submitted;
        }
        Ok((fill, state))
    }

    /// Cancel a live order.
    pub fn cancel(&mut self, order_id: OrderId, reason: &str) -> Result<OrderState, LedgerError> {
        self.live_order(order_id)?;
        self.transition(order_id, OrderStatus::Cancelled, reason)?;
        Ok(OrderState::cancelled(reason))
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn get(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn find_position(&self, position_id: PositionId) -> Result<&Position, LedgerError> {
        self.positions
            .get(&position_id)
            .ok_or(LedgerError::PositionNotFound(position_id))
    }

    /// The strategy's position with live exposure, if any.
    pub fn find_open_position(&self, strategy_id: StrategyId) -> Option<&Position> {
        self.positions
            .values()
            .rev()
            .find(|p| p.strategy_id == strategy_id && p.is_open())
    }

    /// The strategy's most recent position that is not closed yet (pending or
    /// open). This is the position whose orders the coordinator evaluates.
    pub fn current_position(&self, strategy_id: StrategyId) -> Option<&Position> {
        self.positions
            .values()
            .rev()
            .find(|p| p.strategy_id == strategy_id && !p.is_closed())
    }

    pub fn has_open_position(&self, position_id: PositionId) -> bool {
        self.positions
            .get(&position_id)
            .is_some_and(Position::is_open)
    }

    /// Live (non-terminal) orders of a position, in creation order.
    pub fn open_orders(&self, position_id: PositionId) -> Vec<&Order> {
        self.orders_of(position_id).filter(|o| o.is_live()).collect()
    }

    /// Submitted orders of a position, in creation order.
    pub fn working_orders(&self, position_id: PositionId) -> Vec<&Order> {
        self.orders_of(position_id).filter(|o| o.is_working()).collect()
    }

    /// Live orders sharing an OCA group within one position, in creation order.
    pub fn oca_members(&self, position_id: PositionId, group: &OcaGroup) -> Vec<&Order> {
        self.orders_of(position_id)
            .filter(|o| o.is_live() && o.oca_group.as_ref() == Some(group))
            .collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    /// Last execution id handed out, 0 before the first fill.
    pub fn last_exec_id(&self) -> ExecId {
        ExecId(self.exec_seq.last())
    }

    // ── Internal helpers ───────────────────────────────────────────────

    fn orders_of(&self, position_id: PositionId) -> impl Iterator<Item = &Order> {
        self.positions
            .get(&position_id)
            .map(|p| p.order_ids.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.orders.get(id))
    }

    fn live_order(&self, order_id: OrderId) -> Result<&Order, LedgerError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        if order.status.is_terminal() {
            return Err(LedgerError::OrderAlreadyTerminal {
                order_id,
                status: order.status,
            });
        }
        Ok(order)
    }

    fn transition(
        &mut self,
        order_id: OrderId,
        to_status: OrderStatus,
        reason: &str,
    ) -> Result<(), LedgerError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;
        let from_status = order.status;
        order.status = to_status;
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            from_status,
            to_status,
            reason: reason.to_string(),
        });
        Ok(())
    }
}
