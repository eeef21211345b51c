//! Execution sinks: where the coordinator reports order and fill events.
//!
//! The callbacks follow a broker API's shape (open order, execution details,
//! end of historical data) so a backtest can drive the same consumer a live
//! session would.

use crate::domain::{Contract, Fill, Order, OrderId, OrderState, OrderStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub trait ExecutionSink {
    /// An order changed status (accepted, filled, or cancelled).
    fn on_open_order(
        &mut self,
        order_key: OrderId,
        contract: &Contract,
        order: &Order,
        state: &OrderState,
    );

    fn on_exec_details(&mut self, order_key: OrderId, contract: &Contract, fill: &Fill);

    /// Replay ended normally: bars exhausted or every strategy finished.
    fn on_historical_data_end(&mut self, contract: &Contract);

    fn on_cancel_realtime_bars(&mut self, _contract: &Contract) {}

    fn on_cancel_broker_data(&mut self, _contract: &Contract) {}

    /// Non-fatal diagnostics, such as a stalled strategy.
    fn on_warning(&mut self, _contract: &Contract, _text: &str) {}
}

impl<S: ExecutionSink + ?Sized> ExecutionSink for &mut S {
    fn on_open_order(&mut self, key: OrderId, c: &Contract, o: &Order, s: &OrderState) {
        (**self).on_open_order(key, c, o, s)
    }
    fn on_exec_details(&mut self, key: OrderId, c: &Contract, fill: &Fill) {
        (**self).on_exec_details(key, c, fill)
    }
    fn on_historical_data_end(&mut self, c: &Contract) {
        (**self).on_historical_data_end(c)
    }
    fn on_cancel_realtime_bars(&mut self, c: &Contract) {
        (**self).on_cancel_realtime_bars(c)
    }
    fn on_cancel_broker_data(&mut self, c: &Contract) {
        (**self).on_cancel_broker_data(c)
    }
    fn on_warning(&mut self, c: &Contract, text: &str) {
        (**self).on_warning(c, text)
    }
}

/// Fan out to two sinks, first `A` then `B`.
impl<A: ExecutionSink, B: ExecutionSink> ExecutionSink for (A, B) {
    fn on_open_order(&mut self, key: OrderId, c: &Contract, o: &Order, s: &OrderState) {
        self.0.on_open_order(key, c, o, s);
        self.1.on_open_order(key, c, o, s);
    }
    fn on_exec_details(&mut self, key: OrderId, c: &Contract, fill: &Fill) {
        self.0.on_exec_details(key, c, fill);
        self.1.on_exec_details(key, c, fill);
    }
    fn on_historical_data_end(&mut self, c: &Contract) {
        self.0.on_historical_data_end(c);
        self.1.on_historical_data_end(c);
    }
    fn on_cancel_realtime_bars(&mut self, c: &Contract) {
        self.0.on_cancel_realtime_bars(c);
        self.1.on_cancel_realtime_bars(c);
    }
    fn on_cancel_broker_data(&mut self, c: &Contract) {
        self.0.on_cancel_broker_data(c);
        self.1.on_cancel_broker_data(c);
    }
    fn on_warning(&mut self, c: &Contract, text: &str) {
        self.0.on_warning(c, text);
        self.1.on_warning(c, text);
    }
}

// ── Recording ─────────────────────────────────────────────────────────

/// One sink callback, as recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    OpenOrder {
        order_key: OrderId,
        order: Order,
        state: OrderState,
    },
    ExecDetails {
        order_key: OrderId,
        fill: Fill,
    },
    HistoricalDataEnd {
        symbol: String,
    },
    CancelRealtimeBars {
        symbol: String,
    },
    CancelBrokerData {
        symbol: String,
    },
    Warning {
        symbol: String,
        text: String,
    },
}

/// Keeps every callback in order. Two runs are reproducible exactly when
/// their recordings (and so their digests) are equal.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Vec<SinkEvent>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SinkEvent> {
        self.events
    }

    pub fn fills(&self) -> impl Iterator<Item = &Fill> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::ExecDetails { fill, .. } => Some(fill),
            _ => None,
        })
    }

    /// Orders reported as cancelled, in report order.
    pub fn cancelled(&self) -> impl Iterator<Item = &Order> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::OpenOrder { order, state, .. } if state.status == OrderStatus::Cancelled => {
                Some(order)
            }
            _ => None,
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            SinkEvent::Warning { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    /// BLAKE3 hex digest over the JSON encoding of the event stream.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for event in &self.events {
            // Plain data with string keys; encoding cannot fail.
            if let Ok(bytes) = serde_json::to_vec(event) {
                hasher.update(&bytes);
            }
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl ExecutionSink for RecordingSink {
    fn on_open_order(&mut self, order_key: OrderId, _: &Contract, order: &Order, state: &OrderState) {
        self.events.push(SinkEvent::OpenOrder {
            order_key,
            order: order.clone(),
            state: state.clone(),
        });
    }

    fn on_exec_details(&mut self, order_key: OrderId, _: &Contract, fill: &Fill) {
        self.events.push(SinkEvent::ExecDetails {
            order_key,
            fill: fill.clone(),
        });
    }

    fn on_historical_data_end(&mut self, contract: &Contract) {
        self.events.push(SinkEvent::HistoricalDataEnd {
            symbol: contract.symbol.clone(),
        });
    }

    fn on_cancel_realtime_bars(&mut self, contract: &Contract) {
        self.events.push(SinkEvent::CancelRealtimeBars {
            symbol: contract.symbol.clone(),
        });
    }

    fn on_cancel_broker_data(&mut self, contract: &Contract) {
        self.events.push(SinkEvent::CancelBrokerData {
            symbol: contract.symbol.clone(),
        });
    }

    fn on_warning(&mut self, contract: &Contract, text: &str) {
        self.events.push(SinkEvent::Warning {
            symbol: contract.symbol.clone(),
            text: text.to_string(),
        });
    }
}

// ── Tracing ───────────────────────────────────────────────────────────

/// Logs each callback through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ExecutionSink for TracingSink {
    fn on_open_order(&mut self, order_key: OrderId, contract: &Contract, order: &Order, state: &OrderState) {
        debug!(
            %contract,
            order = %order_key,
            kind = order.kind.code(),
            side = %order.side,
            status = %state.status,
            "open order"
        );
    }

    fn on_exec_details(&mut self, order_key: OrderId, contract: &Contract, fill: &Fill) {
        info!(
            %contract,
            order = %order_key,
            exec = %fill.exec_id,
            side = %fill.side,
            price = fill.price,
            qty = fill.quantity,
            "execution"
        );
    }

    fn on_historical_data_end(&mut self, contract: &Contract) {
        info!(%contract, "historical data end");
    }

    fn on_cancel_realtime_bars(&mut self, contract: &Contract) {
        debug!(%contract, "realtime bars cancelled");
    }

    fn on_cancel_broker_data(&mut self, contract: &Contract) {
        debug!(%contract, "broker data cancelled");
    }

    fn on_warning(&mut self, contract: &Contract, text: &str) {
        warn!(%contract, "{text}");
    }
}
