//! OrderState: the value reported to the sink on every status transition.

use super::order::OrderStatus;
use serde::{Deserialize, Serialize};

/// Broker-style order state report. Not persisted by the engine.
///
/// Margin fields are opaque strings passed through untouched; the replay never
/// computes margin and leaves them empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub status: OrderStatus,
    pub init_margin_before: Option<String>,
    pub init_margin_change: Option<String>,
    pub init_margin_after: Option<String>,
    pub maint_margin_before: Option<String>,
    pub maint_margin_change: Option<String>,
    pub maint_margin_after: Option<String>,
    pub equity_with_loan_before: Option<String>,
    pub equity_with_loan_change: Option<String>,
    pub equity_with_loan_after: Option<String>,
    pub commission: Option<f64>,
    pub min_commission: Option<f64>,
    pub max_commission: Option<f64>,
    pub commission_currency: Option<String>,
    pub warning_text: Option<String>,
}

impl OrderState {
    pub fn new(status: OrderStatus) -> Self {
        Self {
            status,
            init_margin_before: None,
            init_margin_change: None,
            init_margin_after: None,
            maint_margin_before: None,
            maint_margin_change: None,
            maint_margin_after: None,
            equity_with_loan_before: None,
            equity_with_loan_change: None,
            equity_with_loan_after: None,
            commission: None,
            min_commission: None,
            max_commission: None,
            commission_currency: None,
            warning_text: None,
        }
    }

    pub fn submitted() -> Self {
        Self::new(OrderStatus::Submitted)
    }

    /// A fill state; min and max commission equal the charged commission.
    pub fn filled(commission: f64, currency: &str) -> Self {
        Self {
            commission: Some(commission),
            min_commission: Some(commission),
            max_commission: Some(commission),
            commission_currency: Some(currency.to_string()),
            ..Self::new(OrderStatus::Filled)
        }
    }

    pub fn cancelled(reason: &str) -> Self {
        Self {
            warning_text: Some(reason.to_string()),
            ..Self::new(OrderStatus::Cancelled)
        }
    }
}
