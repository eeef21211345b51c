//! Append-only bar history shared between the coordinator and the workers.

use crate::domain::Bar;
use parking_lot::RwLock;

/// Single writer (the coordinator), many readers. Bars are only ever
/// appended, so an index a worker has seen stays valid for the whole run.
#[derive(Debug, Default)]
pub struct SharedDataset {
    bars: RwLock<Vec<Bar>>,
}

impl SharedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, bar: Bar) -> usize {
        let mut bars = self.bars.write();
        bars.push(bar);
        bars.len() - 1
    }

    pub fn len(&self) -> usize {
        self.bars.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Bar> {
        self.bars.read().get(index).cloned()
    }

    pub fn last(&self) -> Option<Bar> {
        self.bars.read().last().cloned()
    }

    /// Up to `n` most recent bars, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Bar> {
        let bars = self.bars.read();
        let start = bars.len().saturating_sub(n);
        bars[start..].to_vec()
    }

    /// Run `f` over the published history without cloning it.
    pub fn with_bars<R>(&self, f: impl FnOnce(&[Bar]) -> R) -> R {
        f(&self.bars.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(close: f64) -> Bar {
        Bar::ohlc(
            Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
            close,
            close + 1.0,
            close - 1.0,
            close,
        )
    }

    #[test]
    fn push_and_read_back() {
        let data = SharedDataset::new();
        assert!(data.is_empty());
        assert_eq!(data.push(bar(10.0)), 0);
        assert_eq!(data.push(bar(11.0)), 1);
        assert_eq!(data.len(), 2);
        assert_eq!(data.get(1).unwrap().close, 11.0);
        assert_eq!(data.last().unwrap().close, 11.0);
        assert!(data.get(2).is_none());
    }

    #[test]
    fn recent_is_clamped() {
        let data = SharedDataset::new();
        for c in [1.0, 2.0, 3.0] {
            data.push(bar(c));
        }
        let closes: Vec<f64> = data.recent(2).iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0]);
        assert_eq!(data.recent(10).len(), 3);
        assert_eq!(data.with_bars(|b| b.len()), 3);
    }
}
