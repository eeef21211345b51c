//! Domain types for ReplayLab

pub mod bar;
pub mod contract;
pub mod fill;
pub mod ids;
pub mod order;
pub mod order_state;
pub mod position;

pub use bar::Bar;
pub use contract::Contract;
pub use fill::Fill;
pub use ids::{ExecId, OcaGroup, OrderId, PositionId, Sequence, StrategyId};
pub use order::{Order, OrderAuditEntry, OrderKind, OrderRequest, OrderStatus, Side};
pub use order_state::OrderState;
pub use position::{Position, PositionSide, PositionStatus};
