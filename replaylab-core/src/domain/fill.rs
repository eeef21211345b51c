use crate::domain::ids::{ExecId, OrderId};
use crate::domain::order::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution record. Immutable once stamped by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub exec_id: ExecId,
    pub order_id: OrderId,
    /// Start time of the bar that produced the execution.
    pub time: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
}
