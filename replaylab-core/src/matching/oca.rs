//! One-cancels-all resolution for siblings that could fill on the same bar.
//!
//! A bar only records four prices, so when two siblings are both inside its
//! range the engine assumes an intrabar path from the bar's color:
//!
//! - Green bar (`close > open`): open → low → high → close. The sibling with
//!   the higher candidate price wins.
//! - Red bar (`close <= open`): open → high → low → close. The sibling with
//!   the lower candidate price wins.
//!
//! This is a model, not a record of what traded first. Backtest reports depend
//! on its exact output, so the comparison is kept as is. Equal prices go to
//! the earlier order.

use crate::domain::{Bar, OrderId};

/// One live member of an OCA group with its candidate fill price, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcaCandidate {
    pub order_id: OrderId,
    pub fill_price: Option<f64>,
}

/// Outcome of resolving a group on one bar: exactly one winner, every other
/// member cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct OcaResolution {
    pub winner: OrderId,
    pub fill_price: f64,
    pub cancelled: Vec<OrderId>,
}

/// Pick the sibling that fills. Returns `None` when no member has a
/// candidate price, in which case the whole group keeps working.
pub fn resolve_oca(members: &[OcaCandidate], bar: &Bar) -> Option<OcaResolution> {
    let green = bar.is_green();

    let mut best: Option<(OrderId, f64)> = None;
    for member in members {
        let Some(price) = member.fill_price else {
            continue;
        };
        best = match best {
            None => Some((member.order_id, price)),
            Some((id, current)) => {
                if reached_first(price, member.order_id, current, id, green) {
                    Some((member.order_id, price))
                } else {
                    Some((id, current))
                }
            }
        };
    }

    let (winner, fill_price) = best?;
    let cancelled = members
        .iter()
        .map(|m| m.order_id)
        .filter(|&id| id != winner)
        .collect();

    Some(OcaResolution {
        winner,
        fill_price,
        cancelled,
    })
}

/// Does `(price, id)` come before `(other_price, other_id)` on the assumed path?
fn reached_first(price: f64, id: OrderId, other_price: f64, other_id: OrderId, green: bool) -> bool {
    if price == other_price {
        return id < other_id;
    }
    if green {
        price > other_price
    } else {
        price < other_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::match_order;
    use crate::matching::test_support::{bar, closing_limit, closing_stop, order_id};
    use crate::domain::Side;

    fn candidate(id: u64, price: Option<f64>) -> OcaCandidate {
        OcaCandidate {
            order_id: order_id(id),
            fill_price: price,
        }
    }

    #[test]
    fn single_valid_candidate_wins_without_tie_break() {
        // Stop at 9.90 is below the low (9.95); only the limit at 10.08 fires.
        let b = bar(10.00, 10.10, 9.95, 10.05);
        let stop = closing_stop(1, Side::Sell, 9.90);
        let limit = closing_limit(2, Side::Sell, 10.08);

        let members = [
            candidate(1, match_order(&stop, &b).unwrap()),
            candidate(2, match_order(&limit, &b).unwrap()),
        ];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(2));
        assert_eq!(res.fill_price, 10.08);
        assert_eq!(res.cancelled, vec![order_id(1)]);
    }

    #[test]
    fn red_bar_lower_price_wins() {
        let b = bar(10.00, 10.30, 9.80, 9.90);
        let stop = closing_stop(1, Side::Sell, 9.85);
        let limit = closing_limit(2, Side::Sell, 10.20);

        let members = [
            candidate(1, match_order(&stop, &b).unwrap()),
            candidate(2, match_order(&limit, &b).unwrap()),
        ];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(1));
        assert_eq!(res.fill_price, 9.85);
        assert_eq!(res.cancelled, vec![order_id(2)]);
    }

    #[test]
    fn green_bar_higher_price_wins() {
        let b = bar(10.00, 10.30, 9.80, 10.25);
        let members = [candidate(1, Some(9.85)), candidate(2, Some(10.20))];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(2));
        assert_eq!(res.cancelled, vec![order_id(1)]);
    }

    #[test]
    fn flat_bar_resolves_like_red() {
        let b = bar(10.00, 10.30, 9.80, 10.00);
        let members = [candidate(1, Some(10.20)), candidate(2, Some(9.85))];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(2));
    }

    #[test]
    fn equal_prices_go_to_earlier_order() {
        let b = bar(10.00, 10.30, 9.80, 10.25);
        let members = [candidate(5, Some(10.0)), candidate(3, Some(10.0))];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(3));
    }

    #[test]
    fn three_members_one_winner() {
        let b = bar(10.00, 10.30, 9.80, 9.90);
        let members = [
            candidate(1, Some(10.20)),
            candidate(2, None),
            candidate(3, Some(9.85)),
        ];
        let res = resolve_oca(&members, &b).unwrap();
        assert_eq!(res.winner, order_id(3));
        assert_eq!(res.cancelled, vec![order_id(1), order_id(2)]);
    }

    #[test]
    fn no_candidates_leaves_group_working() {
        let b = bar(10.00, 10.10, 9.95, 10.05);
        let members = [candidate(1, None), candidate(2, None)];
        assert_eq!(resolve_oca(&members, &b), None);
    }
}
