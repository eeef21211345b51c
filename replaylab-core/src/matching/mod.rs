//! Fill matching: would this order have filled against this bar, and where?
//!
//! Pure functions only. The replay coordinator owns every state change; the
//! matcher just answers the question for one order (`match_order`) or for a
//! group of one-cancels-all siblings (`oca::resolve_oca`).
//!
//! Rules:
//! - Market: fills at the open.
//! - Opening Stop / StopLimit / Limit: the trigger (aux price for stop kinds,
//!   limit price for limits) must lie inside `[low, high]`; fills at the trigger.
//! - Closing stops: sell stops fire on `low <= stop`, buy stops on
//!   `high >= stop`. A bar that opens through the stop fills at the open.
//! - Closing limits: sell limits fire on `high >= limit`, buy limits on
//!   `low <= limit`, filling at the limit. A limit already beyond the bar's
//!   range on the favorable side fills at the open.
//! - Closing StopLimit: the stop rule, rejected when the resulting price
//!   violates the limit.

pub mod oca;

pub use oca::{resolve_oca, OcaCandidate, OcaResolution};

use crate::domain::{Bar, Order, OrderId, OrderKind, Side};
use thiserror::Error;

/// Per-order matching failure. Logged by the coordinator; the order is
/// skipped for the bar and the run continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("order {order_id} ({kind}) has no {field} price")]
    MissingPrice {
        order_id: OrderId,
        kind: &'static str,
        field: &'static str,
    },

    #[error("order {order_id} has invalid price {price}")]
    InvalidPrice { order_id: OrderId, price: f64 },

    #[error("bar has non-finite prices")]
    VoidBar,
}

/// Evaluate one order against one bar.
///
/// `Ok(None)` means the bar never reached the order; that is a normal outcome.
pub fn match_order(order: &Order, bar: &Bar) -> Result<Option<f64>, MatchError> {
    if bar.is_void() {
        return Err(MatchError::VoidBar);
    }

    match order.kind {
        OrderKind::Market => Ok(Some(bar.open)),
        _ if order.opens_position => match_opening(order, bar),
        OrderKind::Stop => {
            let stop = required_price(order, order.aux_price, "aux")?;
            Ok(closing_stop(order.side, stop, bar))
        }
        OrderKind::Limit => {
            let limit = required_price(order, order.limit_price, "limit")?;
            Ok(closing_limit(order.side, limit, bar))
        }
        OrderKind::StopLimit => {
            let stop = required_price(order, order.aux_price, "aux")?;
            let limit = required_price(order, order.limit_price, "limit")?;
            Ok(closing_stop_limit(order.side, stop, limit, bar))
        }
    }
}

/// Opening Stop / StopLimit / Limit: fill at the trigger if the bar traded
/// through it.
fn match_opening(order: &Order, bar: &Bar) -> Result<Option<f64>, MatchError> {
    let trigger = match order.kind {
        OrderKind::Stop | OrderKind::StopLimit => {
            required_price(order, order.aux_price, "aux")?
        }
        OrderKind::Limit => required_price(order, order.limit_price, "limit")?,
        OrderKind::Market => return Ok(Some(bar.open)),
    };
    Ok(bar.contains(trigger).then_some(trigger))
}

/// Closing stop. Sell: `low <= stop`, gap-down fills at the open.
/// Buy: `high >= stop`, gap-up fills at the open.
fn closing_stop(side: Side, stop: f64, bar: &Bar) -> Option<f64> {
    match side {
        Side::Sell if bar.low <= stop => Some(if bar.open <= stop { bar.open } else { stop }),
        Side::Buy if bar.high >= stop => Some(if bar.open >= stop { bar.open } else { stop }),
        _ => None,
    }
}

/// Closing limit. Sell: `high >= limit`. Buy: `low <= limit`.
fn closing_limit(side: Side, limit: f64, bar: &Bar) -> Option<f64> {
    match side {
        Side::Sell if bar.high >= limit => Some(if limit < bar.low { bar.open } else { limit }),
        Side::Buy if bar.low <= limit => Some(if limit > bar.high { bar.open } else { limit }),
        _ => None,
    }
}

fn closing_stop_limit(side: Side, stop: f64, limit: f64, bar: &Bar) -> Option<f64> {
    let price = closing_stop(side, stop, bar)?;
    let within_limit = match side {
        Side::Sell => price >= limit,
        Side::Buy => price <= limit,
    };
    within_limit.then_some(price)
}

fn required_price(
    order: &Order,
    price: Option<f64>,
    field: &'static str,
) -> Result<f64, MatchError> {
    let price = price.ok_or(MatchError::MissingPrice {
        order_id: order.id,
        kind: order.kind.code(),
        field,
    })?;
    if !price.is_finite() || price <= 0.0 {
        return Err(MatchError::InvalidPrice {
            order_id: order.id,
            price,
        });
    }
    Ok(price)
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::test_support::{closing_limit, closing_stop};
    use super::*;

    // ── Market ───────────────────────────────────────────────────────

    #[test]
    fn market_fills_at_open() {
        let o = order(1, Side::Buy, OrderKind::Market, true);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(10.00)));
    }

    // ── Opening orders ───────────────────────────────────────────────

    #[test]
    fn opening_stop_limit_fills_at_trigger_inside_range() {
        let mut o = order(1, Side::Buy, OrderKind::StopLimit, true);
        o.aux_price = Some(10.02);
        o.limit_price = Some(10.04);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(10.02)));
    }

    #[test]
    fn opening_stop_outside_range_does_not_fill() {
        let mut o = order(1, Side::Buy, OrderKind::Stop, true);
        o.aux_price = Some(10.20);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(None));
    }

    #[test]
    fn opening_limit_uses_limit_price_as_trigger() {
        let mut o = order(1, Side::Buy, OrderKind::Limit, true);
        o.limit_price = Some(9.95);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(9.95)));
    }

    // ── Closing sell ─────────────────────────────────────────────────

    #[test]
    fn closing_sell_stop_fills_at_stop() {
        let o = closing_stop(1, Side::Sell, 9.98);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(9.98)));
    }

    #[test]
    fn closing_sell_stop_not_reached() {
        let o = closing_stop(1, Side::Sell, 9.90);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(None));
    }

    #[test]
    fn closing_sell_stop_gap_down_clamps_to_open() {
        let o = closing_stop(1, Side::Sell, 10.00);
        let b = bar(9.80, 9.90, 9.70, 9.85);
        assert_eq!(match_order(&o, &b), Ok(Some(9.80)));
    }

    #[test]
    fn closing_sell_limit_fills_at_limit() {
        let o = closing_limit(1, Side::Sell, 10.08);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(10.08)));
    }

    #[test]
    fn closing_sell_limit_below_range_fills_at_open() {
        let o = closing_limit(1, Side::Sell, 9.50);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(10.00)));
    }

    // ── Closing buy ──────────────────────────────────────────────────

    #[test]
    fn closing_buy_stop_fills_at_stop() {
        let o = closing_stop(1, Side::Buy, 10.08);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(10.08)));
    }

    #[test]
    fn closing_buy_stop_gap_up_clamps_to_open() {
        let o = closing_stop(1, Side::Buy, 10.00);
        let b = bar(10.25, 10.40, 10.20, 10.30);
        assert_eq!(match_order(&o, &b), Ok(Some(10.25)));
    }

    #[test]
    fn closing_buy_limit_fills_at_limit() {
        let o = closing_limit(1, Side::Buy, 9.97);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(9.97)));
    }

    #[test]
    fn closing_buy_limit_not_reached() {
        let o = closing_limit(1, Side::Buy, 9.90);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(None));
    }

    // ── Closing stop-limit ───────────────────────────────────────────

    #[test]
    fn closing_sell_stop_limit_rejects_gap_below_limit() {
        let mut o = order(1, Side::Sell, OrderKind::StopLimit, false);
        o.aux_price = Some(10.00);
        o.limit_price = Some(9.90);
        let b = bar(9.80, 9.95, 9.70, 9.85);
        assert_eq!(match_order(&o, &b), Ok(None));
    }

    #[test]
    fn closing_sell_stop_limit_fills_at_stop() {
        let mut o = order(1, Side::Sell, OrderKind::StopLimit, false);
        o.aux_price = Some(9.98);
        o.limit_price = Some(9.95);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Ok(Some(9.98)));
    }

    // ── Errors ───────────────────────────────────────────────────────

    #[test]
    fn stop_without_aux_price_is_an_error() {
        let o = order(7, Side::Sell, OrderKind::Stop, false);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert_eq!(
            match_order(&o, &b),
            Err(MatchError::MissingPrice {
                order_id: order_id(7),
                kind: "STP",
                field: "aux",
            })
        );
    }

    #[test]
    fn non_positive_price_is_an_error() {
        let o = closing_limit(3, Side::Sell, -1.0);
        let b = bar(10.00, 10.10, 9.95, 10.05);
        assert!(matches!(
            match_order(&o, &b),
            Err(MatchError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn void_bar_is_an_error() {
        let o = order(1, Side::Buy, OrderKind::Market, true);
        let b = bar(f64::NAN, 10.10, 9.95, 10.05);
        assert_eq!(match_order(&o, &b), Err(MatchError::VoidBar));
    }
}
