//! Bar sources: where historical bars come from.

use crate::domain::{Bar, Contract};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors from bar sources.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid bar at {time}: {reason}")]
    InvalidBar { time: DateTime<Utc>, reason: String },

    #[error("no bars for {0}")]
    UnknownContract(String),

    #[error("{0}")]
    Other(String),
}

/// Bar width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarSize {
    Min1,
    Min5,
    Min15,
    Hour1,
    #[default]
    Day1,
}

impl BarSize {
    pub fn duration(self) -> Duration {
        match self {
            BarSize::Min1 => Duration::minutes(1),
            BarSize::Min5 => Duration::minutes(5),
            BarSize::Min15 => Duration::minutes(15),
            BarSize::Hour1 => Duration::hours(1),
            BarSize::Day1 => Duration::days(1),
        }
    }
}

impl fmt::Display for BarSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BarSize::Min1 => "1 min",
            BarSize::Min5 => "5 mins",
            BarSize::Min15 => "15 mins",
            BarSize::Hour1 => "1 hour",
            BarSize::Day1 => "1 day",
        };
        f.write_str(s)
    }
}

/// Supplies historical bars for a contract.
pub trait BarSource {
    /// Bars whose start time lies in `[from, to)`, oldest first.
    fn next_bars(
        &mut self,
        contract: &Contract,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        bar_size: BarSize,
    ) -> Result<Vec<Bar>, SourceError>;
}

/// Bars held in memory, keyed by symbol. Bar size is not checked.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBarSource {
    bars: HashMap<String, Vec<Bar>>,
}

impl InMemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bars for a symbol, sorted by start time.
    pub fn insert(&mut self, symbol: impl Into<String>, mut bars: Vec<Bar>) {
        bars.sort_by_key(|b| b.time);
        self.bars.insert(symbol.into(), bars);
    }

    pub fn with_bars(mut self, symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        self.insert(symbol, bars);
        self
    }
}

impl BarSource for InMemoryBarSource {
    fn next_bars(
        &mut self,
        contract: &Contract,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _bar_size: BarSize,
    ) -> Result<Vec<Bar>, SourceError> {
        let bars = self
            .bars
            .get(&contract.symbol)
            .ok_or_else(|| SourceError::UnknownContract(contract.symbol.clone()))?;
        Ok(bars
            .iter()
            .filter(|b| b.time >= from && b.time < to)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn in_memory_filters_half_open_range() {
        let bars = (1..=5).map(|d| Bar::ohlc(day(d), 10.0, 11.0, 9.0, 10.5)).collect();
        let mut source = InMemoryBarSource::new().with_bars("SPY", bars);
        let contract = Contract::new(1, "SPY");

        let got = source.next_bars(&contract, day(2), day(4), BarSize::Day1).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].time, day(2));
        assert_eq!(got[1].time, day(3));
    }

    #[test]
    fn in_memory_sorts_on_insert() {
        let bars = vec![
            Bar::ohlc(day(3), 10.0, 11.0, 9.0, 10.5),
            Bar::ohlc(day(1), 10.0, 11.0, 9.0, 10.5),
        ];
        let mut source = InMemoryBarSource::new().with_bars("SPY", bars);
        let got = source
            .next_bars(&Contract::new(1, "SPY"), day(1), day(9), BarSize::Day1)
            .unwrap();
        assert_eq!(got[0].time, day(1));
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        let mut source = InMemoryBarSource::new();
        let err = source
            .next_bars(&Contract::new(1, "QQQ"), day(1), day(2), BarSize::Day1)
            .unwrap_err();
        assert!(matches!(err, SourceError::UnknownContract(ref s) if s == "QQQ"));
    }

    #[test]
    fn bar_size_parses_from_snake_case() {
        let size: BarSize = serde_json::from_str("\"min5\"").unwrap();
        assert_eq!(size, BarSize::Min5);
        assert_eq!(size.duration(), Duration::minutes(5));
    }
}
