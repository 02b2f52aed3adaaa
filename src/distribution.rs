//! Distribution primitives: dice pools, per-die generators for rerolling and
//! exploding dice, keep-highest/lowest and value clamps.

use crate::types::distribution::{Distribution, Exceeded, Outcome};
use crate::types::expr::{ExplodeKind, FunctionName, KeepKind};
use crate::types::token::FaceRange;
use std::collections::HashMap;

/// Upper bound on the partial kept-value states tracked by `keep`.
pub const MAX_KEEP_STATES: usize = 250_000;

// ==========================================
// Plain dice
// ==========================================

/// Sum of `count` dice with `sides` faces.
pub fn dice_pool(count: u32, sides: u32) -> Result<Distribution, Exceeded> {
    Distribution::uniform(sides).sum_of_iid(count)
}

/// One die limited to the faces `accept` admits, each with weight 1.
pub fn single_die_where(sides: u32, accept: impl Fn(u32) -> bool) -> Distribution {
    (1..=sides)
        .filter(|face| accept(*face))
        .map(|face| (Outcome::from_int(face as i64), 1.0))
        .collect()
}

// ==========================================
// Chained per-die generators
// ==========================================

// One die that may roll again up to `limit` times. Built bottom-up: the deepest
// level is a roll with no follow-up left, every level above branches each face
// either into the level below (shifted by the face value when `keep_face`) or
// into a point weighted by the total of the level below, so all branches of one
// level describe the same number of elementary outcomes.
fn chained_die(
    sides: u32,
    limit: u32,
    face_value: impl Fn(u32) -> Outcome,
    rolls_again: impl Fn(u32) -> bool,
    keep_face: bool,
    first_face: impl Fn(u32) -> bool,
) -> Result<Distribution, Exceeded> {
    if sides == 1 {
        // a single face repeats on every roll
        if !first_face(1) {
            return Ok(Distribution::new());
        }
        let value = face_value(1);
        let rolls = if keep_face && rolls_again(1) { limit as i64 + 1 } else { 1 };
        let total = value.0.checked_mul(rolls).ok_or(Exceeded::Value)?;
        return Ok(Distribution::point(Outcome(total), 1.0));
    }
    // with no follow-up rolls the deepest level is also the top one
    let mut level: Distribution = (1..=sides)
        .filter(|face| limit > 0 || first_face(*face))
        .map(|face| (face_value(face), 1.0))
        .collect();
    for depth in (0..limit).rev() {
        let below_total = level.total();
        let mut next = Distribution::new();
        for face in 1..=sides {
            if depth == 0 && !first_face(face) {
                continue;
            }
            if rolls_again(face) {
                if keep_face {
                    next.extend_scaled(&level.shift(face_value(face))?, 1.0);
                } else {
                    next.extend_scaled(&level, 1.0);
                }
            } else {
                next.add(face_value(face), below_total);
            }
        }
        // every level multiplies the elementary outcomes by `sides`
        level = next.check_weights()?;
    }
    Ok(level)
}

/// One die rerolled while its face is in `range`, at most `limit` times; the last roll stands.
/// `accept_final` restricts the face that stands.
pub fn reroll_die(
    sides: u32,
    range: FaceRange,
    limit: u32,
    accept_final: impl Fn(u32) -> bool,
) -> Result<Distribution, Exceeded> {
    let full = chained_die(
        sides,
        limit,
        |face| Outcome::from_int(face as i64),
        |face| range.contains(face),
        false,
        |_| true,
    )?;
    Ok(full.filter(|value| value.0 >= 0 && accept_final((value.0 / Outcome::SCALE) as u32)))
}

/// One exploding die: faces in `explode` roll again, at most `limit` times. `Sum` adds the
/// faces, `Count` counts the faces inside `success`. `accept_first` restricts the natural roll.
pub fn exploding_die(
    sides: u32,
    success: Option<FaceRange>,
    explode: Option<FaceRange>,
    limit: u32,
    kind: ExplodeKind,
    accept_first: impl Fn(u32) -> bool,
) -> Result<Distribution, Exceeded> {
    let face_value = |face: u32| match kind {
        ExplodeKind::Sum => Outcome::from_int(face as i64),
        ExplodeKind::Count => {
            if success.is_some_and(|range| range.contains(face)) {
                Outcome::ONE
            } else {
                Outcome::ZERO
            }
        }
    };
    let rolls_again = |face: u32| explode.is_some_and(|range| range.contains(face));
    chained_die(sides, limit, face_value, rolls_again, true, accept_first)
}

// ==========================================
// Keep highest / lowest
// ==========================================

/// Sum of the `count` highest (or lowest) values drawn from each independent item.
pub fn keep(items: &[Distribution], count: u32, kind: KeepKind) -> Result<Distribution, Exceeded> {
    let count = count as usize;
    if count >= items.len() {
        return items
            .iter()
            .try_fold(Distribution::point(Outcome::ZERO, 1.0), |acc, item| {
                acc.convolve_sum(item)
            });
    }
    // kept values, sorted ascending -> weight
    let mut states: HashMap<Vec<Outcome>, f64> = HashMap::new();
    states.insert(Vec::new(), 1.0);
    for item in items {
        let mut next: HashMap<Vec<Outcome>, f64> = HashMap::with_capacity(states.len());
        for (kept, weight) in &states {
            for (value, w) in item.iter() {
                let mut state = kept.clone();
                let at = state.partition_point(|v| *v < value);
                state.insert(at, value);
                if state.len() > count {
                    match kind {
                        KeepKind::High => {
                            state.remove(0);
                        }
                        KeepKind::Low => {
                            state.pop();
                        }
                    }
                }
                *next.entry(state).or_insert(0.0) += weight * w;
            }
            if next.len() > MAX_KEEP_STATES {
                return Err(Exceeded::KeepStates {
                    limit: MAX_KEEP_STATES,
                });
            }
        }
        states = next;
    }
    let mut out = Distribution::new();
    for (kept, weight) in states {
        let sum = kept
            .iter()
            .try_fold(Outcome::ZERO, |acc, v| acc.checked_add(*v))
            .ok_or(Exceeded::Value)?;
        out.add(sum, weight);
    }
    out.check_weights()
}

// ==========================================
// Clamps for min / max
// ==========================================

/// `min` caps every value at `threshold`, `max` raises every value to it.
pub fn clamp(dist: &Distribution, name: FunctionName, threshold: Outcome) -> Distribution {
    dist.map_values(|v| clamp_value(v, name, threshold))
}

fn clamp_value(value: Outcome, name: FunctionName, threshold: Outcome) -> Outcome {
    match name {
        FunctionName::Min | FunctionName::MinEach => value.min(threshold),
        FunctionName::Max | FunctionName::MaxEach => value.max(threshold),
    }
}

/// Sum of `count` dice clamped one by one, among the rolls whose unclamped sum is `total`.
/// Weights count the matching rolls.
pub fn clamp_each_given_total(
    die: &Distribution,
    count: u32,
    name: FunctionName,
    threshold: Outcome,
    total: Outcome,
) -> Result<Distribution, Exceeded> {
    let (Some(low), Some(high)) = (die.min_outcome(), die.max_outcome()) else {
        return Ok(Distribution::new());
    };
    // (unclamped sum, clamped sum) -> weight
    let mut states: HashMap<(i64, i64), f64> = HashMap::new();
    states.insert((0, 0), 1.0);
    for rolled in 1..=count as i64 {
        let remaining = count as i64 - rolled;
        // sums that can still reach `total` with the dice left
        let reachable = |sum: i64| {
            let lo = remaining.checked_mul(low.0).and_then(|r| sum.checked_add(r));
            let hi = remaining.checked_mul(high.0).and_then(|r| sum.checked_add(r));
            lo.is_none_or(|lo| lo <= total.0) && hi.is_none_or(|hi| hi >= total.0)
        };
        let mut next: HashMap<(i64, i64), f64> = HashMap::with_capacity(states.len());
        for ((raw, clamped), weight) in &states {
            for (face, w) in die.iter() {
                let raw = raw.checked_add(face.0).ok_or(Exceeded::Value)?;
                if !reachable(raw) {
                    continue;
                }
                let clamped = clamped
                    .checked_add(clamp_value(face, name, threshold).0)
                    .ok_or(Exceeded::Value)?;
                *next.entry((raw, clamped)).or_insert(0.0) += weight * w;
            }
        }
        states = next;
    }
    let out: Distribution = states
        .into_iter()
        .filter(|((raw, _), _)| *raw == total.0)
        .map(|((_, clamped), weight)| (Outcome(clamped), weight))
        .collect();
    out.check_weights()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(dist: &Distribution, value: i64) -> f64 {
        dist.get(Outcome::from_int(value))
    }

    #[test]
    fn pool_has_expected_shape() {
        let pool = dice_pool(2, 6).unwrap();
        assert_eq!(pool.total(), 36.0);
        assert_eq!(at(&pool, 7), 6.0);
        assert_eq!(pool.min_outcome(), Some(Outcome::from_int(2)));
        assert_eq!(pool.max_outcome(), Some(Outcome::from_int(12)));
    }

    #[test]
    fn reroll_ones_once() {
        // d6r1: a natural 1 is rerolled once
        let die = reroll_die(6, FaceRange::new(1, 1), 1, |_| true).unwrap();
        assert_eq!(die.total(), 36.0);
        assert_eq!(at(&die, 1), 1.0);
        assert_eq!(at(&die, 4), 7.0);
    }

    #[test]
    fn reroll_can_restrict_final_face() {
        let die = reroll_die(6, FaceRange::new(1, 1), 1, |face| face < 6).unwrap();
        assert_eq!(die.total(), 29.0);
        assert_eq!(at(&die, 6), 0.0);
    }

    #[test]
    fn sum_explosion_on_max_face() {
        // d4e4 with a single explosion
        let die = exploding_die(4, None, Some(FaceRange::new(4, 4)), 1, ExplodeKind::Sum, |_| true).unwrap();
        assert_eq!(die.total(), 16.0);
        assert_eq!(at(&die, 1), 4.0);
        assert_eq!(at(&die, 4), 0.0);
        assert_eq!(at(&die, 5), 1.0);
        assert_eq!(at(&die, 8), 1.0);
    }

    #[test]
    fn success_count_without_explosion() {
        let die = exploding_die(6, Some(FaceRange::new(5, 6)), None, 5, ExplodeKind::Count, |_| true).unwrap();
        assert!((die.total() - 6f64.powi(6)).abs() < 1e-6);
        assert!((die.average() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn exploding_respects_first_face_filter() {
        let die = exploding_die(4, None, Some(FaceRange::new(4, 4)), 1, ExplodeKind::Sum, |f| f < 4).unwrap();
        assert_eq!(die.total(), 12.0);
        assert_eq!(die.max_outcome(), Some(Outcome::from_int(3)));
    }

    #[test]
    fn keep_highest_of_two_d20() {
        let d20 = Distribution::uniform(20);
        let kept = keep(&[d20.clone(), d20], 1, KeepKind::High).unwrap();
        assert_eq!(kept.total(), 400.0);
        assert!((kept.average() - 13.825).abs() < 1e-9);
        assert_eq!(at(&kept, 20), 39.0);
    }

    #[test]
    fn keep_lowest_two_of_three() {
        let d6 = Distribution::uniform(6);
        let kept = keep(&[d6.clone(), d6.clone(), d6], 2, KeepKind::Low).unwrap();
        assert_eq!(kept.total(), 216.0);
        assert_eq!(at(&kept, 2), 16.0);
    }

    #[test]
    fn clamps_by_function_name() {
        let d6 = Distribution::uniform(6);
        let capped = clamp(&d6, FunctionName::Min, Outcome::from_int(3));
        assert_eq!(at(&capped, 3), 4.0);
        let floored = clamp(&d6, FunctionName::Max, Outcome::from_int(3));
        assert_eq!(at(&floored, 3), 3.0);
    }

    #[test]
    fn long_explosion_chains_report_weight_overflow() {
        let d6e6 = |limit| exploding_die(6, None, Some(FaceRange::new(6, 6)), limit, ExplodeKind::Sum, |_| true);
        assert!(d6e6(300).is_ok());
        assert_eq!(d6e6(400), Err(Exceeded::Weight));
        let rerolled = reroll_die(6, FaceRange::new(1, 5), 500, |_| true);
        assert_eq!(rerolled, Err(Exceeded::Weight));
    }

    #[test]
    fn one_sided_die_needs_no_chain() {
        let die = exploding_die(1, None, Some(FaceRange::new(1, 1)), 1_000_000, ExplodeKind::Sum, |_| true).unwrap();
        assert_eq!(die.as_point(), Some(Outcome::from_int(1_000_001)));
        let die = reroll_die(1, FaceRange::new(1, 1), u32::MAX, |_| true).unwrap();
        assert_eq!(die.as_point(), Some(Outcome::from_int(1)));
    }

    #[test]
    fn keep_sum_past_the_grid_is_rejected() {
        let huge = Distribution::point(Outcome(i64::MAX / 2 + 1), 1.0);
        let both = keep(&[huge.clone(), huge.clone()], 2, KeepKind::High);
        assert_eq!(both, Err(Exceeded::Value));
        let two_of_three = keep(&[huge.clone(), huge.clone(), huge], 2, KeepKind::High);
        assert_eq!(two_of_three, Err(Exceeded::Value));
    }

    #[test]
    fn keep_enumeration_is_bounded() {
        let d20 = Distribution::uniform(20);
        let items = vec![d20; 100];
        let kept = keep(&items, 50, KeepKind::High);
        assert_eq!(kept, Err(Exceeded::KeepStates { limit: MAX_KEEP_STATES }));
    }

    #[test]
    fn clamp_each_follows_the_rolled_total() {
        let d6 = Distribution::uniform(6);
        // 3d6 totalling 4 is (1,1,2) in three orders; each die is raised to 3
        let raised = clamp_each_given_total(&d6, 3, FunctionName::MaxEach, Outcome::from_int(3), Outcome::from_int(4)).unwrap();
        assert_eq!(raised.as_point(), Some(Outcome::from_int(9)));
        assert_eq!(raised.total(), 3.0);
        // over every total the weights add up to the whole pool
        let all: f64 = (3..=18)
            .map(|total| {
                clamp_each_given_total(&d6, 3, FunctionName::MinEach, Outcome::from_int(2), Outcome::from_int(total))
                    .unwrap()
                    .total()
            })
            .sum();
        assert_eq!(all, 216.0);
    }
}
