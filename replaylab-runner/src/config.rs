//! Serializable backtest configuration.

use crate::strategies::StrategyParams;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use replaylab_core::replay::ReplayConfig;
use replaylab_core::BarSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Unique identifier for a backtest run (content-addressable hash).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Replay(#[from] replaylab_core::replay::ConfigError),
}

/// Serializable configuration for a single backtest run.
///
/// ```toml
/// [backtest]
/// symbol = "SPY"
/// bars = "spy_daily.csv"
/// start = "2024-01-01"
/// end = "2024-06-30"
///
/// [replay]
/// rule_barrier = "all"
///
/// [strategy]
/// lookback = 20
/// direction = "long"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    pub backtest: BacktestSection,

    #[serde(default)]
    pub replay: ReplayConfig,

    #[serde(default)]
    pub strategy: StrategyParams,
}

/// `[backtest]` table: what to replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestSection {
    pub symbol: String,

    #[serde(default = "default_contract_id")]
    pub contract_id: u64,

    /// CSV file with the bars. Relative paths resolve against the config
    /// file's directory.
    pub bars: PathBuf,

    /// First day to replay (inclusive).
    #[serde(default)]
    pub start: Option<NaiveDate>,

    /// Last day to replay (inclusive).
    #[serde(default)]
    pub end: Option<NaiveDate>,

    /// Spacing the CSV rows must follow.
    #[serde(default)]
    pub bar_size: BarSize,
}

fn default_contract_id() -> u64 {
    1
}

impl BacktestSection {
    /// Half-open replay window `[start, end + 1 day)`; open ends are unbounded.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self
            .start
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let to = self
            .end
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|t| t.and_utc() + Duration::days(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (from, to)
    }
}

impl RunConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file. A relative `bars` path is resolved against the
    /// file's directory.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        if config.backtest.bars.is_relative() {
            if let Some(dir) = path.parent() {
                config.backtest.bars = dir.join(&config.backtest.bars);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backtest.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("backtest.symbol is empty".into()));
        }
        if let (Some(start), Some(end)) = (self.backtest.start, self.backtest.end) {
            if start > end {
                return Err(ConfigError::Invalid(format!(
                    "backtest.start {start} is after backtest.end {end}"
                )));
            }
        }
        self.replay.validate()?;
        self.strategy.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Computes a deterministic hash ID for this configuration.
    ///
    /// Two runs with identical configs have the same RunId.
    pub fn run_id(&self) -> RunId {
        let json = serde_json::to_vec(self).unwrap_or_else(|_| format!("{self:?}").into_bytes());
        blake3::hash(&json).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::Direction;
    use proptest::prelude::*;
    use replaylab_core::replay::RuleBarrier;

    const MINIMAL: &str = r#"
        [backtest]
        symbol = "SPY"
        bars = "spy.csv"
    "#;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = RunConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.backtest.contract_id, 1);
        assert_eq!(config.backtest.bar_size, BarSize::Day1);
        assert_eq!(config.replay, ReplayConfig::default());
        assert_eq!(config.strategy, StrategyParams::default());
    }

    #[test]
    fn full_config_parses() {
        let config = RunConfig::from_toml(
            r#"
            [backtest]
            symbol = "QQQ"
            contract_id = 42
            bars = "/data/qqq.csv"
            start = "2024-01-01"
            end = "2024-03-31"
            bar_size = "hour1"

            [replay]
            rule_barrier = "any"
            require_position_cover = false
            wait_deadline_ms = 1000

            [strategy]
            lookback = 10
            direction = "short"
            max_trades = 3
            separate_manager = false
            "#,
        )
        .unwrap();
        assert_eq!(config.backtest.contract_id, 42);
        assert_eq!(config.backtest.bar_size, BarSize::Hour1);
        assert_eq!(config.replay.rule_barrier, RuleBarrier::Any);
        assert_eq!(config.strategy.direction, Direction::Short);
        assert_eq!(config.strategy.max_trades, Some(3));
    }

    #[test]
    fn window_is_half_open_over_whole_days() {
        let config = RunConfig::from_toml(
            r#"
            [backtest]
            symbol = "SPY"
            bars = "spy.csv"
            start = "2024-01-02"
            end = "2024-01-05"
            "#,
        )
        .unwrap();
        let (from, to) = config.backtest.window();
        assert_eq!(from.to_rfc3339(), "2024-01-02T00:00:00+00:00");
        assert_eq!(to.to_rfc3339(), "2024-01-06T00:00:00+00:00");
    }

    #[test]
    fn rejects_inverted_range() {
        let err = RunConfig::from_toml(
            r#"
            [backtest]
            symbol = "SPY"
            bars = "spy.csv"
            start = "2024-02-01"
            end = "2024-01-01"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn run_id_is_stable_and_sensitive() {
        let a = RunConfig::from_toml(MINIMAL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.run_id(), b.run_id());
        b.strategy.lookback = 5;
        assert_ne!(a.run_id(), b.run_id());
        assert_eq!(a.run_id().len(), 64);
    }

    #[test]
    fn from_file_resolves_relative_bars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = RunConfig::from_file(&path).unwrap();
        assert_eq!(config.backtest.bars, dir.path().join("spy.csv"));
    }

    proptest! {
        /// Any valid date range yields a non-empty window that starts at the
        /// first day's midnight and covers the last day entirely.
        #[test]
        fn window_covers_whole_range(start_day in 0i64..3650, span in 0i64..400) {
            let base = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
            let start = base + Duration::days(start_day);
            let end = start + Duration::days(span);
            let mut config = RunConfig::from_toml(MINIMAL).unwrap();
            config.backtest.start = Some(start);
            config.backtest.end = Some(end);
            prop_assert!(config.validate().is_ok());

            let (from, to) = config.backtest.window();
            prop_assert_eq!(from.date_naive(), start);
            prop_assert!(from < to);
            let last_moment = end.and_hms_opt(23, 59, 59).unwrap().and_utc();
            prop_assert!(last_moment < to);
            prop_assert_eq!((to - from).num_days(), span + 1);
        }
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = RunConfig::from_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
