//! Weighted-average cost engine
//!
//! Pure functions computing the next on-hand quantity and average unit cost
//! of an item from its prior state and a signed quantity change. Every
//! average produced here is clamped at zero and rounded to [`COST_SCALE`]
//! decimal places with half-up rounding, so the ledger and the item
//! projection always agree on the stored value.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::MovementReason;

/// Decimal places kept for average and unit costs
pub const COST_SCALE: u32 = 4;

/// Errors raised by the cost engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CostError {
    #[error("Not enough stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },
}

/// Quantity and average cost of an item at one point in its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockState {
    pub quantity: i64,
    pub avg_cost: Decimal,
}

impl StockState {
    pub fn new(quantity: i64, avg_cost: Decimal) -> Self {
        Self { quantity, avg_cost }
    }

    pub fn empty() -> Self {
        Self::new(0, Decimal::ZERO)
    }

    /// Total book value of the stock on hand
    pub fn value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.avg_cost
    }
}

/// Result of running one movement through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostOutcome {
    pub quantity: i64,
    pub avg_cost: Decimal,
    /// Cost at which units left stock; set for consumption only
    pub unit_cost_used: Option<Decimal>,
}

impl CostOutcome {
    pub fn state(&self) -> StockState {
        StockState::new(self.quantity, self.avg_cost)
    }
}

/// Effect of editing one receipt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEdit {
    pub qty_delta: i64,
    pub cost_delta: Decimal,
    pub reason: MovementReason,
    pub outcome: CostOutcome,
}

/// Round a cost to the ledger precision (half-up)
pub fn round_cost(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn settle(value: Decimal) -> Decimal {
    round_cost(value.max(Decimal::ZERO))
}

fn next_quantity(prior: StockState, qty_delta: i64) -> Result<i64, CostError> {
    let next = prior.quantity.saturating_add(qty_delta);
    if next < 0 {
        return Err(CostError::InsufficientStock {
            available: prior.quantity,
            requested: -qty_delta,
        });
    }
    Ok(next)
}

/// Moving-average blend of `incoming_qty` units at `unit_cost` into `prior`
fn blend(prior: StockState, incoming_qty: i64, unit_cost: Decimal, new_qty: i64) -> Decimal {
    if new_qty <= 0 {
        return Decimal::ZERO;
    }
    settle((prior.value() + Decimal::from(incoming_qty) * unit_cost) / Decimal::from(new_qty))
}

/// Apply one movement to `prior`.
///
/// - `Receive`/`Opening` with a positive delta blend `unit_cost` (prior
///   average when absent) into the pool.
/// - `Consume` leaves the average untouched and reports it as the cost used.
/// - `Adjust` replaces the average with `unit_cost` when one is given.
pub fn apply_movement(
    prior: StockState,
    qty_delta: i64,
    unit_cost: Option<Decimal>,
    reason: MovementReason,
) -> Result<CostOutcome, CostError> {
    let quantity = next_quantity(prior, qty_delta)?;

    let outcome = match reason {
        MovementReason::Receive | MovementReason::Opening if qty_delta > 0 => CostOutcome {
            quantity,
            avg_cost: blend(prior, qty_delta, unit_cost.unwrap_or(prior.avg_cost), quantity),
            unit_cost_used: None,
        },
        MovementReason::Adjust => CostOutcome {
            quantity,
            avg_cost: unit_cost.map(settle).unwrap_or(prior.avg_cost),
            unit_cost_used: None,
        },
        MovementReason::Receive | MovementReason::Opening | MovementReason::Consume => {
            CostOutcome {
                quantity,
                avg_cost: prior.avg_cost,
                unit_cost_used: (qty_delta < 0).then_some(prior.avg_cost),
            }
        }
    };

    Ok(outcome)
}

/// Average cost after the unit cost of an existing receipt line changes
/// without any quantity change.
///
/// Only `min(prior.quantity, old_line_qty)` units are re-valued: the units
/// this line contributed that can still be on hand. This is an approximation,
/// not a replay of the item's full history.
pub fn reblend_line_cost(
    prior: StockState,
    cost_delta: Decimal,
    old_line_qty: i64,
    new_line_cost: Decimal,
) -> Decimal {
    if prior.quantity <= 0 {
        return settle(new_line_cost);
    }
    let affected = Decimal::from(prior.quantity.min(old_line_qty).max(0));
    settle((prior.value() + cost_delta * affected) / Decimal::from(prior.quantity))
}

/// Reconcile an edit of one receipt line from `(old_qty, old_cost)` to
/// `(new_qty, new_cost)`. Returns `None` for a no-op edit.
pub fn edit_receipt_line(
    prior: StockState,
    old_qty: i64,
    old_cost: Decimal,
    new_qty: i64,
    new_cost: Decimal,
) -> Result<Option<LineEdit>, CostError> {
    let qty_delta = new_qty - old_qty;
    let cost_delta = new_cost - old_cost;
    if qty_delta == 0 && cost_delta.is_zero() {
        return Ok(None);
    }

    let reason = MovementReason::from_delta(qty_delta);
    let outcome = if qty_delta == 0 {
        CostOutcome {
            quantity: prior.quantity,
            avg_cost: reblend_line_cost(prior, cost_delta, old_qty, new_cost),
            unit_cost_used: None,
        }
    } else {
        apply_movement(prior, qty_delta, Some(new_cost), reason)?
    };

    Ok(Some(LineEdit {
        qty_delta,
        cost_delta,
        reason,
        outcome,
    }))
}

/// Take back everything a receipt line contributed.
///
/// The line's value is removed from the pool, so when the line was the only
/// contribution the item returns to its pre-receipt quantity and cost.
pub fn reverse_receipt_line(
    prior: StockState,
    line_qty: i64,
    line_cost: Decimal,
) -> Result<CostOutcome, CostError> {
    let quantity = next_quantity(prior, -line_qty)?;
    let avg_cost = if quantity == 0 {
        Decimal::ZERO
    } else {
        settle((prior.value() - Decimal::from(line_qty) * line_cost) / Decimal::from(quantity))
    };

    Ok(CostOutcome {
        quantity,
        avg_cost,
        unit_cost_used: Some(prior.avg_cost),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn state(quantity: i64, avg_cost: Decimal) -> StockState {
        StockState::new(quantity, avg_cost)
    }

    #[test]
    fn test_receive_into_empty_item() {
        let out = apply_movement(StockState::empty(), 10, Some(dec!(2.00)), MovementReason::Receive)
            .unwrap();
        assert_eq!(out.quantity, 10);
        assert_eq!(out.avg_cost, dec!(2.00));
        assert_eq!(out.unit_cost_used, None);
    }

    #[test]
    fn test_receive_consume_sequence() {
        let first = apply_movement(StockState::empty(), 10, Some(dec!(2)), MovementReason::Receive)
            .unwrap();
        let second =
            apply_movement(first.state(), 10, Some(dec!(4)), MovementReason::Receive).unwrap();
        assert_eq!(second.quantity, 20);
        assert_eq!(second.avg_cost, dec!(3.00));

        let third = apply_movement(second.state(), -5, None, MovementReason::Consume).unwrap();
        assert_eq!(third.quantity, 15);
        assert_eq!(third.avg_cost, dec!(3.00));
        assert_eq!(third.unit_cost_used, Some(dec!(3.00)));
    }

    #[test]
    fn test_blend_rounds_half_up_to_four_places() {
        // (10*5 + 5*7) / 15 = 5.66666...
        let out = apply_movement(state(10, dec!(5)), 5, Some(dec!(7)), MovementReason::Receive)
            .unwrap();
        assert_eq!(out.avg_cost, dec!(5.6667));
    }

    #[test]
    fn test_round_cost_midpoint() {
        assert_eq!(round_cost(dec!(1.00005)), dec!(1.0001));
        assert_eq!(round_cost(dec!(1.00004)), dec!(1.0000));
        assert_eq!(round_cost(dec!(2.5)), dec!(2.5));
    }

    #[test]
    fn test_receive_without_cost_uses_prior_average() {
        let out = apply_movement(state(4, dec!(3.5)), 4, None, MovementReason::Receive).unwrap();
        assert_eq!(out.avg_cost, dec!(3.5));
    }

    #[test]
    fn test_opening_blends_like_receive() {
        let out = apply_movement(StockState::empty(), 3, Some(dec!(9.99)), MovementReason::Opening)
            .unwrap();
        assert_eq!(out.avg_cost, dec!(9.99));
    }

    #[test]
    fn test_consume_below_zero_fails() {
        let err = apply_movement(state(3, dec!(1)), -4, None, MovementReason::Consume).unwrap_err();
        assert_eq!(
            err,
            CostError::InsufficientStock {
                available: 3,
                requested: 4
            }
        );
    }

    #[test]
    fn test_consume_to_zero_keeps_average() {
        let out = apply_movement(state(3, dec!(1.25)), -3, None, MovementReason::Consume).unwrap();
        assert_eq!(out.quantity, 0);
        assert_eq!(out.avg_cost, dec!(1.25));
    }

    #[test]
    fn test_adjust_with_cost_replaces_average() {
        let out = apply_movement(state(10, dec!(5)), 2, Some(dec!(8.123456)), MovementReason::Adjust)
            .unwrap();
        assert_eq!(out.quantity, 12);
        assert_eq!(out.avg_cost, dec!(8.1235));
    }

    #[test]
    fn test_adjust_without_cost_moves_quantity_only() {
        let out = apply_movement(state(10, dec!(5)), -4, None, MovementReason::Adjust).unwrap();
        assert_eq!(out.quantity, 6);
        assert_eq!(out.avg_cost, dec!(5));
        assert_eq!(out.unit_cost_used, None);
    }

    #[test]
    fn test_reblend_cost_only_edit() {
        // 20 on hand at 3.00, the line contributed 10 at 4.00 and is corrected to 5.00
        let avg = reblend_line_cost(state(20, dec!(3)), dec!(1), 10, dec!(5));
        assert_eq!(avg, dec!(3.5));
    }

    #[test]
    fn test_reblend_limits_to_on_hand() {
        // only 4 units left, so at most 4 units are re-valued
        let avg = reblend_line_cost(state(4, dec!(2)), dec!(1), 10, dec!(3));
        assert_eq!(avg, dec!(3));
    }

    #[test]
    fn test_reblend_with_no_stock_takes_new_cost() {
        let avg = reblend_line_cost(StockState::empty(), dec!(2), 5, dec!(6));
        assert_eq!(avg, dec!(6));
    }

    #[test]
    fn test_reblend_never_negative() {
        let avg = reblend_line_cost(state(10, dec!(0.1)), dec!(-5), 10, dec!(0));
        assert_eq!(avg, Decimal::ZERO);
    }

    #[test]
    fn test_edit_noop() {
        assert_eq!(
            edit_receipt_line(state(8, dec!(3)), 8, dec!(3), 8, dec!(3)).unwrap(),
            None
        );
    }

    #[test]
    fn test_edit_increase_blends_extra_units() {
        let edit = edit_receipt_line(state(8, dec!(3)), 8, dec!(3), 10, dec!(4))
            .unwrap()
            .unwrap();
        assert_eq!(edit.qty_delta, 2);
        assert_eq!(edit.reason, MovementReason::Receive);
        assert_eq!(edit.outcome.quantity, 10);
        // (8*3 + 2*4) / 10
        assert_eq!(edit.outcome.avg_cost, dec!(3.2));
    }

    #[test]
    fn test_edit_decrease_consumes() {
        let edit = edit_receipt_line(state(8, dec!(3)), 8, dec!(3), 5, dec!(3))
            .unwrap()
            .unwrap();
        assert_eq!(edit.reason, MovementReason::Consume);
        assert_eq!(edit.outcome.quantity, 5);
        assert_eq!(edit.outcome.avg_cost, dec!(3));
        assert_eq!(edit.outcome.unit_cost_used, Some(dec!(3)));
    }

    #[test]
    fn test_edit_decrease_below_zero_fails() {
        let err = edit_receipt_line(state(2, dec!(3)), 8, dec!(3), 1, dec!(3)).unwrap_err();
        assert!(matches!(err, CostError::InsufficientStock { available: 2, requested: 7 }));
    }

    #[test]
    fn test_edit_cost_only_is_adjust() {
        let edit = edit_receipt_line(state(8, dec!(3)), 8, dec!(3), 8, dec!(4))
            .unwrap()
            .unwrap();
        assert_eq!(edit.reason, MovementReason::Adjust);
        assert_eq!(edit.qty_delta, 0);
        assert_eq!(edit.cost_delta, dec!(1));
        assert_eq!(edit.outcome.avg_cost, dec!(4));
    }

    #[test]
    fn test_reverse_only_contribution_restores_empty() {
        let received =
            apply_movement(StockState::empty(), 8, Some(dec!(3)), MovementReason::Receive).unwrap();
        let reversed = reverse_receipt_line(received.state(), 8, dec!(3)).unwrap();
        assert_eq!(reversed.quantity, 0);
        assert_eq!(reversed.avg_cost, Decimal::ZERO);
        assert_eq!(reversed.unit_cost_used, Some(dec!(3)));
    }

    #[test]
    fn test_reverse_restores_prior_average() {
        let before = state(10, dec!(5));
        let received = apply_movement(before, 8, Some(dec!(3)), MovementReason::Receive).unwrap();
        let reversed = reverse_receipt_line(received.state(), 8, dec!(3)).unwrap();
        assert_eq!(reversed.quantity, 10);
        assert_eq!(reversed.avg_cost, dec!(5));
    }

    #[test]
    fn test_reverse_insufficient() {
        let err = reverse_receipt_line(state(3, dec!(3)), 8, dec!(3)).unwrap_err();
        assert_eq!(
            err,
            CostError::InsufficientStock {
                available: 3,
                requested: 8
            }
        );
    }

    fn cost_strategy() -> impl Strategy<Value = Decimal> {
        (0i64..=1_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn delta_strategy() -> impl Strategy<Value = i64> {
        -50i64..=50i64
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// On-hand quantity never goes negative, whatever the sequence
        #[test]
        fn prop_quantity_never_negative(
            ops in prop::collection::vec((delta_strategy(), cost_strategy()), 1..40)
        ) {
            let mut current = StockState::empty();
            for (delta, cost) in ops {
                let reason = MovementReason::from_delta(delta);
                match apply_movement(current, delta, Some(cost), reason) {
                    Ok(out) => {
                        prop_assert!(out.quantity >= 0);
                        prop_assert!(out.avg_cost >= Decimal::ZERO);
                        prop_assert_eq!(out.quantity, current.quantity + delta);
                        current = out.state();
                    }
                    Err(CostError::InsufficientStock { available, requested }) => {
                        prop_assert_eq!(available, current.quantity);
                        prop_assert!(available < requested);
                    }
                }
            }
        }

        /// A blended average lies between the prior average and the incoming cost
        #[test]
        fn prop_blend_is_bounded(
            prior_qty in 1i64..10_000,
            prior_cost in cost_strategy(),
            qty in 1i64..10_000,
            cost in cost_strategy(),
        ) {
            let out = apply_movement(
                StockState::new(prior_qty, prior_cost), qty, Some(cost), MovementReason::Receive,
            ).unwrap();
            let tolerance = dec!(0.00005);
            prop_assert!(out.avg_cost >= prior_cost.min(cost) - tolerance);
            prop_assert!(out.avg_cost <= prior_cost.max(cost) + tolerance);
            prop_assert_eq!(out.avg_cost.scale() <= COST_SCALE, true);
        }

        /// Consumption never moves the average
        #[test]
        fn prop_consume_keeps_average(
            prior_qty in 1i64..10_000,
            prior_cost in cost_strategy(),
            take in 1i64..10_000,
        ) {
            let take = take.min(prior_qty);
            let out = apply_movement(
                StockState::new(prior_qty, prior_cost), -take, None, MovementReason::Consume,
            ).unwrap();
            prop_assert_eq!(out.avg_cost, prior_cost);
            prop_assert_eq!(out.unit_cost_used, Some(prior_cost));
        }

        /// Receiving a line and then removing it lands back on the prior state
        #[test]
        fn prop_reverse_undoes_receive(
            prior_qty in 0i64..5_000,
            prior_cost in cost_strategy(),
            qty in 1i64..5_000,
            cost in cost_strategy(),
        ) {
            let before = StockState::new(prior_qty, round_cost(prior_cost));
            let received = apply_movement(before, qty, Some(cost), MovementReason::Receive).unwrap();
            let reversed = reverse_receipt_line(received.state(), qty, cost).unwrap();
            prop_assert_eq!(reversed.quantity, prior_qty);
            if prior_qty == 0 {
                prop_assert_eq!(reversed.avg_cost, Decimal::ZERO);
            } else {
                // rounding of the blended average is amplified by (prior + qty) / prior
                let drift = (reversed.avg_cost - before.avg_cost).abs();
                let bound = dec!(0.00005) * Decimal::from(prior_qty + qty) / Decimal::from(prior_qty)
                    + dec!(0.0001);
                prop_assert!(drift <= bound, "drift {} > {}", drift, bound);
            }
        }
    }
}
