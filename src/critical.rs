//! Three-way split of a comparison into normal success, critical success and
//! failure.
//!
//! A success is critical when one of the critical-determination dice it
//! depends on shows a face at or above the critical threshold. Instead of
//! inverting the arithmetic between the die and the compared value, the
//! comparison is evaluated twice: once as is, and once with every critical die
//! limited to faces below the threshold. Both evaluations count the same
//! elementary outcomes, so their difference is exactly the weight of successes
//! that involve a critical face. Keeping from a pool of critical dice uses the
//! at-least-one-critical share of the pool instead.

use crate::error::EvalError;
use crate::evaluator::{CriticalSettings, EvalContext, Evaluator};
use crate::types::evaluation::{CriticalSplit, ProbabilityResult};
use crate::types::expr::*;

pub fn analyze(
    evaluator: &Evaluator,
    cmp: &Comparison,
    ctx: EvalContext,
    full: &ProbabilityResult,
) -> Result<Option<CriticalSplit>, EvalError> {
    let Some(settings) = evaluator.critical else {
        return Ok(None);
    };
    let marked;
    let target = if cmp.left.contains_critical_dice() || cmp.right.contains_critical_dice() {
        cmp
    } else {
        // without a `D` die the leftmost die of the comparison decides
        let mut copy = cmp.clone();
        if !mark_leftmost(&mut copy.left) && !mark_leftmost(&mut copy.right) {
            return Ok(None);
        }
        marked = copy;
        &marked
    };

    if let Some(split) = keep_pool_shortcut(target, settings, full) {
        return Ok(Some(split));
    }
    let low = evaluator.compare(target, ctx.restricted(true))?;
    let critical = (full.success - low.success).max(0.0);
    Ok(Some(CriticalSplit::from_weights(
        low.success,
        critical,
        full.failure,
    )))
}

/// Marks the first dice literal in source order as critical.
pub fn mark_leftmost(node: &mut Node) -> bool {
    match node {
        Node::Dice(dice) => {
            dice.is_critical = true;
            true
        }
        Node::Reroll(reroll) => {
            reroll.dice.is_critical = true;
            true
        }
        Node::Exploding(exploding) => {
            exploding.dice.is_critical = true;
            true
        }
        Node::Number(_) | Node::DiceRef(_) => false,
        Node::Keep(keep) => keep.exprs.iter_mut().any(mark_leftmost),
        Node::Comparison(cmp) => mark_leftmost(&mut cmp.left) || mark_leftmost(&mut cmp.right),
        Node::Conditional(cond) => {
            mark_leftmost(&mut cond.condition)
                || mark_leftmost(&mut cond.if_true)
                || mark_leftmost(&mut cond.if_false)
        }
        Node::Binary(bin) => mark_leftmost(&mut bin.lhs) || mark_leftmost(&mut bin.rhs),
        Node::CriticalDouble(inner) | Node::CriticalOnly(inner) | Node::Group(inner) => {
            mark_leftmost(inner)
        }
        Node::CriticalSwitch { normal, critical } => {
            mark_leftmost(normal) || mark_leftmost(critical)
        }
        Node::Function(call) => call.args.iter_mut().any(mark_leftmost),
    }
}

// `kh`/`kl` over one pool of N critical dice compared upwards: the check is
// critical when at least one of the N dice is, a share of 1 - (1 - p)^N of all
// rolls, capped at the successes.
fn keep_pool_shortcut(
    cmp: &Comparison,
    settings: CriticalSettings,
    full: &ProbabilityResult,
) -> Option<CriticalSplit> {
    if !matches!(cmp.op, CompareOp::Greater | CompareOp::GreaterEqual) {
        return None;
    }
    let Node::Keep(keep) = cmp.left.strip_groups() else {
        return None;
    };
    let [single] = keep.exprs.as_slice() else {
        return None;
    };
    let dice = single.strip_groups().dice_literal()?;
    if !dice.is_critical || dice.count < 2 {
        return None;
    }
    let threshold = settings.threshold(dice.sides);
    let per_die = (dice.sides + 1).saturating_sub(threshold) as f64 / dice.sides as f64;
    let at_least_one = 1.0 - (1.0 - per_die).powi(dice.count as i32);
    let critical = (full.total * at_least_one).min(full.success);
    Some(CriticalSplit::from_weights(
        full.success - critical,
        critical,
        full.failure,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_formula;
    use crate::types::evaluation::Evaluation;

    fn split(formula: &str, rate: f64) -> CriticalSplit {
        let parsed = parse_formula(formula).unwrap();
        let evaluation = Evaluator::new(&parsed.registry)
            .with_critical(rate)
            .evaluate_formula(&parsed.root)
            .unwrap();
        match evaluation {
            Evaluation::Probability(p) => p.critical.unwrap(),
            Evaluation::ConditionalCritical(c) => c.probabilities,
            other => panic!("no critical split in {:?}", other),
        }
    }

    #[test]
    fn implicit_leftmost_die_decides() {
        let s = split("d20>15", 5.0);
        assert!((s.critical_hit - 0.05).abs() < 1e-12);
        assert!((s.normal_hit - 0.20).abs() < 1e-12);
        assert!((s.miss - 0.75).abs() < 1e-12);
    }

    #[test]
    fn critical_face_that_still_misses_is_a_miss() {
        // a natural 20 plus a low d6 can still miss 25
        let s = split("D20+d6>=25", 5.0);
        let total = 120.0;
        // D20 = 20 succeeds with d6 >= 5
        assert!((s.critical_hit - 2.0 / total).abs() < 1e-12);
        // D20 = 19 with d6 = 6
        assert!((s.normal_hit - 1.0 / total).abs() < 1e-12);
    }

    #[test]
    fn keep_highest_matches_exact_split() {
        let shortcut = split("kh(2D20)>=15", 5.0);
        let expected_critical = 1.0 - 0.95f64 * 0.95;
        assert!((shortcut.critical_hit - expected_critical).abs() < 1e-12);
        let total = shortcut.normal_hit + shortcut.critical_hit + shortcut.miss;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn keep_lowest_counts_any_critical_die() {
        let s = split("kl(2D20)>=10", 5.0);
        assert!((s.critical_hit - (1.0 - 0.95f64 * 0.95)).abs() < 1e-12);
        // 11 of 20 faces succeed on each die
        assert!((s.normal_hit + s.critical_hit - 0.3025).abs() < 1e-12);
    }

    #[test]
    fn keep_several_of_a_pool_counts_any_critical_die() {
        let s = split("kh2(3D20)>=20?1:0", 5.0);
        assert!((s.critical_hit - (1.0 - 0.95f64.powi(3))).abs() < 1e-12);
    }

    #[test]
    fn keep_pool_share_is_capped_at_successes() {
        // kl(4D20)>=18 succeeds less often than some die shows a 20
        let s = split("kl(4D20)>=18", 5.0);
        let success = 0.15f64.powi(4);
        assert!((s.critical_hit - success).abs() < 1e-12);
        assert!(s.normal_hit.abs() < 1e-12);
    }

    #[test]
    fn higher_rate_moves_weight_to_critical() {
        let low = split("d20+5>=15?2d6:0", 5.0);
        let high = split("d20+5>=15?2d6:0", 15.0);
        assert!(high.critical_hit > low.critical_hit);
        assert!(high.normal_hit < low.normal_hit);
        assert!((high.miss - low.miss).abs() < 1e-12);
    }

    #[test]
    fn mark_leftmost_skips_numbers() {
        let mut node = Node::binary(Node::number(3.0), BinOp::Add, Node::dice(1, 8));
        assert!(mark_leftmost(&mut node));
        assert!(node.contains_critical_dice());
        let mut constant = Node::number(3.0);
        assert!(!mark_leftmost(&mut constant));
    }
}
