//! Bar: the fundamental market data unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV sample for one period of one contract.
///
/// Produced by a bar source and never mutated afterwards. `time` is the start
/// of the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub vwap: f64,
    pub trade_count: u64,
}

impl Bar {
    /// Bar with price fields only. Volume and trade count are zero, vwap is
    /// the typical price.
    pub fn ohlc(time: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume: 0,
            vwap: (high + low + close) / 3.0,
            trade_count: 0,
        }
    }

    /// Returns true if any price field is not finite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// Basic OHLC sanity check: high >= low, open/close inside the range.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// Green bar: close strictly above open. Flat bars count as red.
    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    /// Whether `price` lies inside `[low, high]`, inclusive.
    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}
