//! Dice-reuse mode: when a formula refers back to a dice group (`d_1`), the
//! sub-expressions sharing that group are correlated and cannot be combined
//! as independent distributions. Every group is pinned to each of its values
//! in turn and the formula is re-evaluated per combination, weighted by the
//! joint weight of the pinned values.

use crate::distribution::dice_pool;
use crate::error::EvalError;
use crate::evaluator::{EvalContext, Evaluator, PinnedFaces};
use crate::types::distribution::{Distribution, Exceeded, Outcome};
use crate::types::evaluation::*;
use crate::types::expr::*;
use std::collections::BTreeMap;

/// Upper bound on the number of pinned combinations enumerated for one formula.
pub const MAX_REUSE_COMBINATIONS: u64 = 2_000_000;

pub fn evaluate(evaluator: &Evaluator, root: &Node) -> Result<Evaluation, EvalError> {
    let groups = group_distributions(evaluator, root)?;
    let count: f64 = groups.iter().map(|(_, dist)| dist.len() as f64).product();
    if count > MAX_REUSE_COMBINATIONS as f64 {
        return Err(EvalError::TooManyCombinations {
            count,
            limit: MAX_REUSE_COMBINATIONS,
        });
    }
    let joint: f64 = groups.iter().map(|(_, dist)| dist.total()).product();
    if !joint.is_finite() {
        return Err(Exceeded::Weight.at(root));
    }
    let mut tally = Tally::for_root(evaluator, root);
    let mut pins = PinnedFaces::new();
    enumerate(&groups, 0, 1.0, &mut pins, &mut |pins, weight| {
        tally.visit(evaluator, pins, weight)
    })?;
    Ok(tally.finish(evaluator))
}

// Each group's own distribution, from the node that defines it.
fn group_distributions(evaluator: &Evaluator, root: &Node) -> Result<Vec<(DiceId, Distribution)>, EvalError> {
    evaluator
        .registry
        .iter()
        .map(|(id, group)| {
            let dist = match find_definition(root, id) {
                Some(node) => evaluator.eval_dist(node, EvalContext::default())?,
                None => dice_pool(group.count, group.sides)
                    .map_err(|e| e.at(&format!("{}d{}", group.count, group.sides)))?,
            };
            Ok::<_, EvalError>((id, dist))
        })
        .collect()
}

pub fn find_definition(node: &Node, id: DiceId) -> Option<&Node> {
    if node.defining_id() == Some(id) {
        return Some(node);
    }
    node.children()
        .into_iter()
        .find_map(|child| find_definition(child, id))
}

fn enumerate(
    groups: &[(DiceId, Distribution)],
    index: usize,
    weight: f64,
    pins: &mut PinnedFaces,
    visit: &mut impl FnMut(&PinnedFaces, f64) -> Result<(), EvalError>,
) -> Result<(), EvalError> {
    let Some((id, dist)) = groups.get(index) else {
        return visit(pins, weight);
    };
    for (value, w) in dist.iter() {
        pins.insert(*id, value);
        enumerate(groups, index + 1, weight * w, pins, visit)?;
    }
    Ok(())
}

// ==========================================
// Critical dice of a pinned combination
// ==========================================

/// Ids of the critical dice whose faces feed into `node`'s value. Conditionals,
/// critical wrappers and functions contribute nothing.
pub fn contributing_critical_ids(node: &Node) -> Vec<DiceId> {
    match node {
        Node::Dice(DiceNode {
            is_critical: true,
            id: Some(id),
            ..
        }) => vec![*id],
        Node::DiceRef(reference) if reference.is_critical => vec![reference.id],
        Node::Reroll(RerollNode { dice, .. }) | Node::Exploding(ExplodingNode { dice, .. }) => {
            match (dice.is_critical, dice.id) {
                (true, Some(id)) => vec![id],
                _ => Vec::new(),
            }
        }
        Node::Keep(_) | Node::Comparison(_) | Node::Binary(_) | Node::Group(_) => node
            .children()
            .into_iter()
            .flat_map(contributing_critical_ids)
            .collect(),
        _ => Vec::new(),
    }
}

/// Id of the first dice literal or reference in source order.
pub fn leftmost_dice_id(node: &Node) -> Option<DiceId> {
    match node {
        Node::DiceRef(reference) => Some(reference.id),
        other => match other.dice_literal() {
            Some(dice) => dice.id,
            None => other.children().into_iter().find_map(leftmost_dice_id),
        },
    }
}

// Critical ids deciding a check: the explicit `D` dice, else its leftmost die.
fn deciding_ids(evaluator: &Evaluator, condition: &Node) -> Vec<DiceId> {
    if evaluator.critical.is_none() {
        return Vec::new();
    }
    let explicit = contributing_critical_ids(condition);
    if !explicit.is_empty() {
        return explicit;
    }
    leftmost_dice_id(condition).into_iter().collect()
}

fn is_critical_combination(evaluator: &Evaluator, ids: &[DiceId], pins: &PinnedFaces) -> bool {
    let Some(settings) = evaluator.critical else {
        return false;
    };
    !ids.is_empty()
        && ids.iter().all(|id| {
            match (evaluator.registry.get(*id), pins.get(id)) {
                (Some(group), Some(value)) => {
                    *value >= Outcome::from_int(settings.threshold(group.sides) as i64)
                }
                _ => false,
            }
        })
}

// ==========================================
// Accumulating pinned evaluations
// ==========================================

#[derive(Default)]
struct NestedEntry {
    level: u32,
    reach: f64,   // joint weight of combinations reaching the condition
    success: f64, // of which the condition held
}

// Nested conditions seen below the root, keyed by path and condition text.
#[derive(Default)]
struct NestedTally {
    entries: BTreeMap<(Vec<BranchStep>, String), NestedEntry>,
}

impl NestedTally {
    fn add(&mut self, branch: &Evaluation, step: BranchStep, weight: f64) {
        for entry in branch.nested_conditions() {
            let rebased = entry.under(step, 1.0);
            let reach = weight * entry.parent_probability;
            let slot = self
                .entries
                .entry((rebased.path, rebased.condition))
                .or_default();
            slot.level = rebased.level;
            slot.reach += reach;
            slot.success += reach * entry.success_probability;
        }
    }

    fn finish(self, total: f64) -> Vec<NestedCondition> {
        self.entries
            .into_iter()
            .map(|((path, condition), entry)| {
                let success_probability = if entry.reach == 0.0 { 0.0 } else { entry.success / entry.reach };
                NestedCondition {
                    condition,
                    level: entry.level,
                    path,
                    success_probability,
                    failure_probability: 1.0 - success_probability,
                    parent_probability: if total == 0.0 { 0.0 } else { entry.reach / total },
                    critical: None,
                }
            })
            .collect()
    }
}

struct ConditionalTally<'n> {
    cond: &'n Conditional,
    cmp: &'n Comparison,
    critical_ids: Vec<DiceId>,
    success: f64,
    failure: f64,
    critical_success: f64,
    normal_hit: Distribution, // plain true branch when there is no critical die
    critical_hit: Distribution,
    miss: Distribution,
    nested: NestedTally,
}

struct ComparisonTally<'n> {
    cmp: &'n Comparison,
    critical_ids: Vec<DiceId>,
    success: f64,
    failure: f64,
    critical_success: f64,
}

enum Tally<'n> {
    Conditional(Box<ConditionalTally<'n>>),
    Comparison(ComparisonTally<'n>),
    // critical mixture decided by the pinned `D` dice
    SplitMixture {
        root: &'n Node,
        critical_ids: Vec<DiceId>,
        normal: Distribution,
        critical: Distribution,
    },
    // critical mixture weighted by the critical rate
    RateMixture {
        root: &'n Node,
        normal: Distribution,
        critical: Distribution,
    },
    Plain {
        root: &'n Node,
        dist: Distribution,
    },
}

// Adds a pinned evaluation, scaled so it contributes `weight` in total.
fn add_weighted(acc: &mut Distribution, evaluation: &Evaluation, weight: f64) {
    let dist = evaluation.distribution();
    let total = dist.total();
    if total > 0.0 {
        acc.extend_scaled(&dist, weight / total);
    }
}

impl<'n> Tally<'n> {
    fn for_root(evaluator: &Evaluator, root: &'n Node) -> Self {
        match root.strip_groups() {
            Node::Conditional(cond) => match cond.condition.as_comparison() {
                Some(cmp) => Tally::Conditional(Box::new(ConditionalTally {
                    cond,
                    cmp,
                    critical_ids: deciding_ids(evaluator, &cond.condition),
                    success: 0.0,
                    failure: 0.0,
                    critical_success: 0.0,
                    normal_hit: Distribution::new(),
                    critical_hit: Distribution::new(),
                    miss: Distribution::new(),
                    nested: NestedTally::default(),
                })),
                // reported by the pinned evaluation itself
                None => Tally::Plain {
                    root,
                    dist: Distribution::new(),
                },
            },
            Node::Comparison(cmp) => Tally::Comparison(ComparisonTally {
                cmp,
                critical_ids: deciding_ids(evaluator, root),
                success: 0.0,
                failure: 0.0,
                critical_success: 0.0,
            }),
            _ if evaluator.wants_critical_mixture(root) => {
                let critical_ids = contributing_critical_ids(root);
                if critical_ids.is_empty() {
                    Tally::RateMixture {
                        root,
                        normal: Distribution::new(),
                        critical: Distribution::new(),
                    }
                } else {
                    Tally::SplitMixture {
                        root,
                        critical_ids,
                        normal: Distribution::new(),
                        critical: Distribution::new(),
                    }
                }
            }
            _ => Tally::Plain {
                root,
                dist: Distribution::new(),
            },
        }
    }

    fn visit(&mut self, evaluator: &Evaluator, pins: &PinnedFaces, weight: f64) -> Result<(), EvalError> {
        let ctx = EvalContext::default().pinned(pins);
        match self {
            Tally::Conditional(t) => {
                let holds = evaluator.compare(t.cmp, ctx)?.success > 0.0;
                let with_critical = !t.critical_ids.is_empty();
                if holds {
                    let is_critical = is_critical_combination(evaluator, &t.critical_ids, pins);
                    let branch = evaluator.evaluate(&t.cond.if_true, ctx.critical(is_critical))?;
                    t.success += weight;
                    let step = match (with_critical, is_critical) {
                        (false, _) => BranchStep::True,
                        (true, false) => BranchStep::NormalHit,
                        (true, true) => BranchStep::CriticalHit,
                    };
                    if is_critical {
                        t.critical_success += weight;
                        add_weighted(&mut t.critical_hit, &branch, weight);
                    } else {
                        add_weighted(&mut t.normal_hit, &branch, weight);
                    }
                    t.nested.add(&branch, step, weight);
                } else {
                    let branch = evaluator.evaluate(&t.cond.if_false, ctx)?;
                    t.failure += weight;
                    add_weighted(&mut t.miss, &branch, weight);
                    let step = if with_critical { BranchStep::Miss } else { BranchStep::False };
                    t.nested.add(&branch, step, weight);
                }
            }
            Tally::Comparison(t) => {
                if evaluator.compare(t.cmp, ctx)?.success > 0.0 {
                    t.success += weight;
                    if is_critical_combination(evaluator, &t.critical_ids, pins) {
                        t.critical_success += weight;
                    }
                } else {
                    t.failure += weight;
                }
            }
            Tally::SplitMixture {
                root,
                critical_ids,
                normal,
                critical,
            } => {
                let is_critical = is_critical_combination(evaluator, critical_ids, pins);
                let evaluation = evaluator.evaluate(root, ctx.critical(is_critical))?;
                let acc = if is_critical { critical } else { normal };
                add_weighted(acc, &evaluation, weight);
            }
            Tally::RateMixture {
                root,
                normal,
                critical,
            } => {
                add_weighted(normal, &evaluator.evaluate(root, ctx)?, weight);
                add_weighted(critical, &evaluator.evaluate(root, ctx.critical(true))?, weight);
            }
            Tally::Plain { root, dist } => {
                add_weighted(dist, &evaluator.evaluate(root, ctx)?, weight);
            }
        }
        Ok(())
    }

    fn finish(self, evaluator: &Evaluator) -> Evaluation {
        match self {
            Tally::Conditional(t) => {
                let t = *t;
                let total = t.success + t.failure;
                let critical = (!t.critical_ids.is_empty()).then(|| {
                    CriticalSplit::from_weights(
                        t.success - t.critical_success,
                        t.critical_success,
                        t.failure,
                    )
                });
                let condition = ProbabilityResult {
                    critical,
                    ..ProbabilityResult::new(t.success, t.failure)
                };
                let mut nested = vec![NestedCondition::root(t.cond.condition.to_string(), &condition)];
                nested.extend(t.nested.finish(total));
                // scaled pinned evaluations sum to whole counts up to float drift
                let (normal_hit, critical_hit, miss) =
                    (t.normal_hit.rounded(), t.critical_hit.rounded(), t.miss.rounded());
                let mut combined = normal_hit.clone();
                combined.extend_scaled(&critical_hit, 1.0);
                combined.extend_scaled(&miss, 1.0);
                match critical {
                    Some(probabilities) => {
                        Evaluation::ConditionalCritical(ConditionalCriticalResult {
                            combined,
                            normal_hit,
                            critical_hit,
                            miss,
                            probabilities,
                            nested,
                        })
                    }
                    None => Evaluation::Conditional(ConditionalResult {
                        combined,
                        if_true: normal_hit,
                        if_false: miss,
                        condition,
                        nested,
                    }),
                }
            }
            Tally::Comparison(t) => {
                let critical = (!t.critical_ids.is_empty()).then(|| {
                    CriticalSplit::from_weights(
                        t.success - t.critical_success,
                        t.critical_success,
                        t.failure,
                    )
                });
                Evaluation::Probability(ProbabilityResult {
                    critical,
                    ..ProbabilityResult::new(t.success, t.failure)
                })
            }
            Tally::SplitMixture {
                normal, critical, ..
            } => {
                let (normal, critical) = (normal.rounded(), critical.rounded());
                let mut combined = normal.clone();
                combined.extend_scaled(&critical, 1.0);
                let total = combined.total();
                let critical_probability = if total == 0.0 { 0.0 } else { critical.total() / total };
                Evaluation::CriticalMixture(CriticalMixtureResult {
                    combined,
                    normal,
                    critical,
                    normal_probability: 1.0 - critical_probability,
                    critical_probability,
                })
            }
            Tally::RateMixture {
                normal, critical, ..
            } => Evaluation::CriticalMixture(evaluator.mix_by_rate(normal, critical)),
            Tally::Plain { dist, .. } => Evaluation::Plain(dist.rounded()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_formula;

    fn run(formula: &str, critical: Option<f64>) -> Evaluation {
        let parsed = parse_formula(formula).unwrap();
        let mut evaluator = Evaluator::new(&parsed.registry);
        if let Some(rate) = critical {
            evaluator = evaluator.with_critical(rate);
        }
        evaluator.evaluate_formula(&parsed.root).unwrap()
    }

    #[test]
    fn reference_doubles_the_same_roll() {
        let Evaluation::Plain(dist) = run("d6+d_1", None) else {
            panic!("expected a plain distribution");
        };
        assert_eq!(dist.len(), 6);
        assert_eq!(dist.get(Outcome::from_int(12)), 1.0);
        assert_eq!(dist.get(Outcome::from_int(7)), 0.0);
    }

    #[test]
    fn reused_condition_and_damage_are_correlated() {
        // hit on 11+, damage is the attack die itself
        let Evaluation::Conditional(cond) = run("d20>10?d_1:0", None) else {
            panic!("expected a conditional");
        };
        assert_eq!(cond.combined.total(), 20.0);
        assert_eq!(cond.combined.get(Outcome::ZERO), 10.0);
        assert_eq!(cond.combined.get(Outcome::from_int(5)), 0.0);
        assert_eq!(cond.combined.get(Outcome::from_int(15)), 1.0);
    }

    #[test]
    fn pinned_critical_die_splits_branches() {
        let Evaluation::ConditionalCritical(result) = run("D20>10?#d_1#:0", Some(5.0)) else {
            panic!("expected a conditional-critical result");
        };
        assert!((result.probabilities.critical_hit - 0.05).abs() < 1e-12);
        assert!((result.probabilities.normal_hit - 0.45).abs() < 1e-12);
        // the critical branch doubles the natural 20
        assert_eq!(result.critical_hit.max_outcome(), Some(Outcome::from_int(40)));
    }

    #[test]
    fn keep_defines_its_group() {
        let parsed = parse_formula("kh(2d20)+d_1").unwrap();
        let def = find_definition(&parsed.root, DiceId(1)).unwrap();
        assert!(matches!(def, Node::Keep(_)));
    }

    #[test]
    fn contributing_ids_stop_at_wrappers() {
        let parsed = parse_formula("D20+#D6#+d_1").unwrap();
        assert_eq!(contributing_critical_ids(&parsed.root), vec![DiceId(1)]);
        assert_eq!(leftmost_dice_id(&parsed.root), Some(DiceId(1)));
    }

    #[test]
    fn enumeration_is_bounded() {
        let parsed = parse_formula("d100+d100+d100+d100+d_1").unwrap();
        let result = Evaluator::new(&parsed.registry).evaluate_formula(&parsed.root);
        assert!(matches!(result, Err(EvalError::TooManyCombinations { .. })));
    }
}
