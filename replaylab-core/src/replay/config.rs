//! Replay coordinator configuration.

use crate::ledger::CommissionSchedule;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// When the coordinator considers the strategies done with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBarrier {
    /// One running worker has signalled rule completion.
    Any,
    /// Every running worker has signalled rule completion. Deterministic
    /// under any scheduling.
    #[default]
    All,
}

/// Coordinator settings, loadable from a `[replay]` TOML table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub rule_barrier: RuleBarrier,

    /// After an opening fill, wait until the position is covered before
    /// re-evaluating the bar's orders.
    pub require_position_cover: bool,

    /// Upper bound for any single wait. `None` waits until signalled or
    /// cancelled.
    pub wait_deadline_ms: Option<u64>,

    pub commission: CommissionSchedule,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            rule_barrier: RuleBarrier::All,
            require_position_cover: true,
            wait_deadline_ms: None,
            commission: CommissionSchedule::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse replay config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid replay config: {0}")]
    Invalid(String),
}

impl ReplayConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ReplayConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.commission;
        if !(c.per_share.is_finite() && c.per_share >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "commission.per_share must be >= 0, got {}",
                c.per_share
            )));
        }
        if !(c.minimum.is_finite() && c.minimum >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "commission.minimum must be >= 0, got {}",
                c.minimum
            )));
        }
        if self.wait_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "wait_deadline_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn wait_deadline(&self) -> Option<Duration> {
        self.wait_deadline_ms.map(Duration::from_millis)
    }
}
