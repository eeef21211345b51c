use serde::{Deserialize, Serialize};
use std::fmt;

/// Position key: the owning strategy plus that strategy's own position
/// count.
///
/// Ids never depend on which thread reached the ledger first, only on what
/// each strategy did, so a replay numbers its positions the same way every
/// time. Ordering is by strategy, then by creation within the strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId {
    pub strategy: StrategyId,
    pub seq: u64,
}

impl PositionId {
    pub const fn new(strategy: StrategyId, seq: u64) -> Self {
        Self { strategy, seq }
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/P{}", self.strategy, self.seq)
    }
}

/// Order key: the position it belongs to plus its place among that
/// position's orders. Comparing two orders of one position compares their
/// creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId {
    pub position: PositionId,
    pub seq: u64,
}

impl OrderId {
    pub const fn new(position: PositionId, seq: u64) -> Self {
        Self { position, seq }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.position, self.seq)
    }
}

/// Execution ID. Strictly increasing within one replay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecId(pub u64);

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}.01", self.0)
    }
}

/// Strategy instance that owns positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StrategyId(pub u64);

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// One-cancels-all group label shared by mutually exclusive orders.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OcaGroup(pub String);

impl OcaGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }
}

impl fmt::Display for OcaGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic id allocator.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    last: u64,
}

impl Sequence {
    /// Returns the next id, starting at 1.
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}
