use crate::critical;
use crate::dice_reuse;
use crate::distribution::{
    clamp, clamp_each_given_total, dice_pool, exploding_die, keep, reroll_die, single_die_where,
};
use crate::error::EvalError;
use crate::types::distribution::{Distribution, Exceeded, Mixing, Outcome};
use crate::types::evaluation::*;
use crate::types::expr::*;
use std::collections::BTreeMap;

/// Face fixed for every dice group while enumerating dice-reuse combinations.
pub type PinnedFaces = BTreeMap<DiceId, Outcome>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalSettings {
    pub rate: f64, // percent
}

impl CriticalSettings {
    /// Lowest face that counts as critical on a die with `sides` faces.
    pub fn threshold(&self, sides: u32) -> u32 {
        let span = (sides as f64 * self.rate / 100.0).round() as u32;
        sides.saturating_sub(span.min(sides)) + 1
    }

    pub fn probability(&self) -> f64 {
        self.rate / 100.0
    }
}

/// Per-recursion state threaded through evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'p> {
    pub critical_branch: bool,  // inside the critical-hit pass
    pub restrict_critical: bool, // critical dice only show faces below the threshold
    pub pinned: Option<&'p PinnedFaces>,
}

impl<'p> EvalContext<'p> {
    pub fn critical(self, critical_branch: bool) -> Self {
        EvalContext {
            critical_branch,
            ..self
        }
    }

    pub fn restricted(self, restrict_critical: bool) -> Self {
        EvalContext {
            restrict_critical,
            ..self
        }
    }

    pub fn pinned(self, pinned: &'p PinnedFaces) -> Self {
        EvalContext {
            pinned: Some(pinned),
            ..self
        }
    }
}

pub struct Evaluator<'r> {
    pub(crate) registry: &'r DiceRegistry,
    pub(crate) critical: Option<CriticalSettings>,
    pub(crate) mixing: Mixing,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r DiceRegistry) -> Self {
        Evaluator {
            registry,
            critical: None,
            mixing: Mixing::Rounded,
        }
    }

    pub fn with_critical(mut self, rate: f64) -> Self {
        self.critical = Some(CriticalSettings { rate });
        self
    }

    pub fn with_mixing(mut self, mixing: Mixing) -> Self {
        self.mixing = mixing;
        self
    }

    // ==========================================
    // Whole formula
    // ==========================================

    /// Evaluates a parsed formula, choosing dice-reuse enumeration or a
    /// critical mixture where they apply.
    pub fn evaluate_formula(&self, root: &Node) -> Result<Evaluation, EvalError> {
        if !self.registry.is_empty() {
            return dice_reuse::evaluate(self, root);
        }
        if self.wants_critical_mixture(root) {
            return self.critical_mixture(root);
        }
        self.evaluate(root, EvalContext::default())
    }

    pub(crate) fn wants_critical_mixture(&self, root: &Node) -> bool {
        self.critical.is_some()
            && !matches!(
                root.strip_groups(),
                Node::Comparison(_) | Node::Conditional(_)
            )
            && root.contains_critical_wrapper()
    }

    fn critical_mixture(&self, root: &Node) -> Result<Evaluation, EvalError> {
        let ctx = EvalContext::default();
        if root.contains_critical_dice() {
            // split the elementary outcomes by whether every critical die stays low
            let normal = self.eval_dist(root, ctx.restricted(true))?;
            let all = self.eval_dist(root, ctx.critical(true))?;
            let low = self.eval_dist(root, ctx.critical(true).restricted(true))?;
            let critical = all.subtract(&low);
            let mut combined = normal.clone();
            combined.extend_scaled(&critical, 1.0);
            let total = combined.total();
            let critical_probability = if total == 0.0 { 0.0 } else { critical.total() / total };
            return Ok(Evaluation::CriticalMixture(CriticalMixtureResult {
                combined,
                normal,
                critical,
                normal_probability: 1.0 - critical_probability,
                critical_probability,
            }));
        }
        let normal = self.eval_dist(root, ctx)?;
        let critical = self.eval_dist(root, ctx.critical(true))?;
        Ok(Evaluation::CriticalMixture(self.mix_by_rate(normal, critical)))
    }

    /// Mixes normal and critical outcomes with the configured critical rate.
    pub(crate) fn mix_by_rate(&self, normal: Distribution, critical: Distribution) -> CriticalMixtureResult {
        let p = self.critical.map(|c| c.probability()).unwrap_or(0.0);
        let totals = [normal.total(), critical.total()];
        let target = match Mixing::Exact.target_total(100.0, &totals) {
            t if t > 100.0 => t,
            _ => 100.0 * totals[0].max(totals[1]),
        };
        let combined = Distribution::mix(&[(1.0 - p, &normal), (p, &critical)], target);
        CriticalMixtureResult {
            combined,
            normal,
            critical,
            normal_probability: 1.0 - p,
            critical_probability: p,
        }
    }

    // ==========================================
    // Node dispatch
    // ==========================================

    pub fn eval_dist(&self, node: &Node, ctx: EvalContext) -> Result<Distribution, EvalError> {
        Ok(self.evaluate(node, ctx)?.into_distribution())
    }

    pub fn evaluate(&self, node: &Node, ctx: EvalContext) -> Result<Evaluation, EvalError> {
        if let (Some(pins), Some(id)) = (ctx.pinned, node.defining_id()) {
            let value = pins
                .get(&id)
                .copied()
                .ok_or(EvalError::UnresolvedReference(id.0))?;
            return Ok(Evaluation::Plain(Distribution::point(value, 1.0)));
        }

        let dist = match node {
            Node::Number(n) => {
                let value = Outcome::checked_from_f64(*n).ok_or_else(|| Exceeded::Value.at(node))?;
                Distribution::point(value, 1.0)
            }
            Node::Dice(dice) => {
                let pool = match self.face_limit(dice, ctx) {
                    None => dice_pool(dice.count, dice.sides),
                    Some(limit) => single_die_where(dice.sides, |face| face < limit).sum_of_iid(dice.count),
                };
                pool.map_err(|e| e.at(node))?
            }
            Node::DiceRef(reference) => self.dice_ref(reference, ctx)?,
            Node::Keep(keep_node) => self.keep(node, keep_node, ctx)?,
            Node::Reroll(_) | Node::Exploding(_) => match self.per_die(node, ctx)? {
                Some((die, count)) => die.sum_of_iid(count).map_err(|e| e.at(node))?,
                None => Distribution::new(),
            },
            Node::Comparison(cmp) => {
                return Ok(Evaluation::Probability(self.evaluate_comparison(cmp, ctx)?));
            }
            Node::Conditional(cond) => return self.conditional(cond, ctx),
            Node::Binary(bin) => return self.binary(node, bin, ctx),
            Node::CriticalDouble(inner) => {
                let dist = self.eval_dist(inner, ctx)?;
                if ctx.critical_branch {
                    dist.try_map_values(|v| {
                        v.0.checked_mul(2)
                            .map(Outcome)
                            .ok_or_else(|| Exceeded::Value.at(node))
                    })?
                } else {
                    dist
                }
            }
            Node::CriticalSwitch { normal, critical } => {
                let chosen = if ctx.critical_branch { critical } else { normal };
                self.eval_dist(chosen, ctx)?
            }
            Node::CriticalOnly(inner) => {
                if ctx.critical_branch {
                    self.eval_dist(inner, ctx)?
                } else {
                    Distribution::point(Outcome::ZERO, 1.0)
                }
            }
            Node::Function(call) => self.function(call, ctx)?,
            Node::Group(inner) => return self.evaluate(inner, ctx),
        };
        Ok(Evaluation::Plain(dist))
    }

    // Faces of `dice` are capped below this value when critical dice are restricted.
    fn face_limit(&self, dice: &DiceNode, ctx: EvalContext) -> Option<u32> {
        if !(ctx.restrict_critical && dice.is_critical) {
            return None;
        }
        self.critical.map(|settings| settings.threshold(dice.sides))
    }

    fn dice_ref(&self, reference: &DiceRefNode, ctx: EvalContext) -> Result<Distribution, EvalError> {
        let id = reference.id;
        if self.registry.is_empty() {
            return Err(EvalError::ReferenceOutsideReuse(id.0));
        }
        let group = self
            .registry
            .get(id)
            .ok_or(EvalError::UnresolvedReference(id.0))?;
        match ctx.pinned {
            Some(pins) => pins
                .get(&id)
                .map(|value| Distribution::point(*value, 1.0))
                .ok_or(EvalError::UnresolvedReference(id.0)),
            None => dice_pool(group.count, group.sides).map_err(|e| e.at(reference)),
        }
    }

    /// Distribution of one die of a plain, rerolled or exploding literal, with its count.
    pub(crate) fn per_die(&self, node: &Node, ctx: EvalContext) -> Result<Option<(Distribution, u32)>, EvalError> {
        if ctx.pinned.is_some() && node.defining_id().is_some() {
            return Ok(None);
        }
        let die = match node {
            Node::Dice(dice) => {
                let limit = self.face_limit(dice, ctx);
                let die = single_die_where(dice.sides, |face| limit.is_none_or(|l| face < l));
                (die, dice.count)
            }
            Node::Reroll(reroll) => {
                let limit = self.face_limit(&reroll.dice, ctx);
                let die = reroll_die(reroll.dice.sides, reroll.range, reroll.limit, |face| {
                    limit.is_none_or(|l| face < l)
                })
                .map_err(|e| e.at(node))?;
                (die, reroll.dice.count)
            }
            Node::Exploding(exploding) => {
                let limit = self.face_limit(&exploding.dice, ctx);
                let die = exploding_die(
                    exploding.dice.sides,
                    exploding.success,
                    exploding.explode,
                    exploding.limit,
                    exploding.kind,
                    |face| limit.is_none_or(|l| face < l),
                )
                .map_err(|e| e.at(node))?;
                (die, exploding.dice.count)
            }
            Node::Group(inner) => return self.per_die(inner, ctx),
            _ => return Ok(None),
        };
        Ok(Some(die))
    }

    // Restricted critical dice stay below the threshold one by one, so a
    // restricted pool keeps from rolls where no die is critical.
    fn keep(&self, node: &Node, keep_node: &KeepNode, ctx: EvalContext) -> Result<Distribution, EvalError> {
        let items = match keep_node.exprs.as_slice() {
            [single] => match self.per_die(single, ctx)? {
                Some((die, count)) => vec![die; count as usize],
                None => vec![self.eval_dist(single, ctx)?],
            },
            exprs => exprs
                .iter()
                .map(|expr| self.eval_dist(expr, ctx))
                .collect::<Result<Vec<_>, _>>()?,
        };
        keep(&items, keep_node.count, keep_node.kind).map_err(|e| e.at(node))
    }

    fn function(&self, call: &FunctionCall, ctx: EvalContext) -> Result<Distribution, EvalError> {
        let [target, threshold] = call.args.as_slice() else {
            return Err(EvalError::NonConstantThreshold {
                function: call.name.to_string(),
                argument: String::new(),
            });
        };
        let bound = self
            .eval_dist(threshold, ctx)?
            .as_point()
            .ok_or_else(|| EvalError::NonConstantThreshold {
                function: call.name.to_string(),
                argument: threshold.to_string(),
            })?;
        if call.name.is_per_die() {
            if let Some(clamped) = self.clamp_pinned_each(call, target, bound, ctx)? {
                return Ok(clamped);
            }
            if let Some((die, count)) = self.per_die(target, ctx)? {
                let clamped = clamp(&die, call.name, bound);
                return clamped.sum_of_iid(count).map_err(|e| e.at(target));
            }
        }
        Ok(clamp(&self.eval_dist(target, ctx)?, call.name, bound))
    }

    // A pinned dice group only fixes its total; the per-die clamp ranges over
    // the rolls that produce that total.
    fn clamp_pinned_each(
        &self,
        call: &FunctionCall,
        target: &Node,
        bound: Outcome,
        ctx: EvalContext,
    ) -> Result<Option<Distribution>, EvalError> {
        let (Some(pins), Some(id)) = (ctx.pinned, target.defining_id()) else {
            return Ok(None);
        };
        let unpinned = EvalContext { pinned: None, ..ctx };
        let Some((die, count)) = self.per_die(target, unpinned)? else {
            return Ok(None);
        };
        let total = pins.get(&id).copied().ok_or(EvalError::UnresolvedReference(id.0))?;
        clamp_each_given_total(&die, count, call.name, bound, total)
            .map(Some)
            .map_err(|e| e.at(target))
    }

    // ==========================================
    // Arithmetic
    // ==========================================

    fn binary(&self, node: &Node, bin: &BinaryOp, ctx: EvalContext) -> Result<Evaluation, EvalError> {
        let lhs = self.evaluate(&bin.lhs, ctx)?;
        let rhs = self.evaluate(&bin.rhs, ctx)?;
        if bin.op == BinOp::Mul {
            // a probability times a value scales the value by the chance of success
            match (&lhs, &rhs) {
                (Evaluation::Probability(p), other) | (other, Evaluation::Probability(p)) => {
                    let factor = p.success_probability();
                    let scaled = other.distribution().try_map_values(|v| {
                        Outcome::checked_from_f64(v.to_f64() * factor).ok_or_else(|| Exceeded::Value.at(node))
                    })?;
                    return Ok(Evaluation::Plain(scaled));
                }
                _ => {}
            }
        }
        let (lhs, rhs) = (lhs.into_distribution(), rhs.into_distribution());
        let combined = lhs
            .combine(&rhs, |a, b| apply_bin_op(bin.op, a, b, node))?
            .check_weights()
            .map_err(|e| e.at(node))?;
        Ok(Evaluation::Plain(combined))
    }

    // ==========================================
    // Comparisons and conditionals
    // ==========================================

    /// Success and failure weights of a comparison, without critical analysis.
    pub(crate) fn compare(&self, cmp: &Comparison, ctx: EvalContext) -> Result<ProbabilityResult, EvalError> {
        let left = self.eval_dist(&cmp.left, ctx)?;
        let right = self.eval_dist(&cmp.right, ctx)?;
        let (mut success, mut failure) = (0.0, 0.0);
        let mut tally = |holds: bool, weight: f64| {
            if holds {
                success += weight;
            } else {
                failure += weight;
            }
        };
        if let Some(point) = right.as_point() {
            let scale = right.total();
            for (value, w) in left.iter() {
                tally(cmp.op.holds(value, point), w * scale);
            }
        } else if let Some(point) = left.as_point() {
            let scale = left.total();
            for (value, w) in right.iter() {
                tally(cmp.op.holds(point, value), w * scale);
            }
        } else {
            for (a, wa) in left.iter() {
                for (b, wb) in right.iter() {
                    tally(cmp.op.holds(a, b), wa * wb);
                }
            }
        }
        if !(success + failure).is_finite() {
            return Err(Exceeded::Weight.at(cmp));
        }
        Ok(ProbabilityResult::new(success, failure))
    }

    pub fn evaluate_comparison(&self, cmp: &Comparison, ctx: EvalContext) -> Result<ProbabilityResult, EvalError> {
        let mut result = self.compare(cmp, ctx)?;
        if self.critical.is_some() && ctx.pinned.is_none() && !ctx.restrict_critical {
            result.critical = critical::analyze(self, cmp, ctx, &result)?;
        }
        Ok(result)
    }

    fn conditional(&self, cond: &Conditional, ctx: EvalContext) -> Result<Evaluation, EvalError> {
        let cmp = cond
            .condition
            .as_comparison()
            .ok_or_else(|| EvalError::ConditionNotComparison(cond.condition.to_string()))?;
        let probability = self.evaluate_comparison(cmp, ctx)?;
        let root = NestedCondition::root(cond.condition.to_string(), &probability);

        if let Some(split) = probability.critical {
            let normal_hit = self.evaluate(&cond.if_true, ctx.critical(false))?;
            let critical_hit = self.evaluate(&cond.if_true, ctx.critical(true))?;
            let miss = self.evaluate(&cond.if_false, ctx)?;
            let mut nested = vec![root];
            nested.extend(rebase(&normal_hit, BranchStep::NormalHit, split.normal_hit));
            nested.extend(rebase(&critical_hit, BranchStep::CriticalHit, split.critical_hit));
            nested.extend(rebase(&miss, BranchStep::Miss, split.miss));
            let (normal_hit, critical_hit, miss) = (
                normal_hit.into_distribution(),
                critical_hit.into_distribution(),
                miss.into_distribution(),
            );
            let target = self.mixing.target_total(
                probability.total,
                &[normal_hit.total(), critical_hit.total(), miss.total()],
            );
            let combined = Distribution::mix(
                &[
                    (split.normal_hit, &normal_hit),
                    (split.critical_hit, &critical_hit),
                    (split.miss, &miss),
                ],
                target,
            );
            return Ok(Evaluation::ConditionalCritical(ConditionalCriticalResult {
                combined,
                normal_hit,
                critical_hit,
                miss,
                probabilities: split,
                nested,
            }));
        }

        let p = probability.success_probability();
        let if_true = self.evaluate(&cond.if_true, ctx)?;
        let if_false = self.evaluate(&cond.if_false, ctx)?;
        let mut nested = vec![root];
        nested.extend(rebase(&if_true, BranchStep::True, p));
        nested.extend(rebase(&if_false, BranchStep::False, 1.0 - p));
        let (if_true, if_false) = (if_true.into_distribution(), if_false.into_distribution());
        let target = self
            .mixing
            .target_total(probability.total, &[if_true.total(), if_false.total()]);
        let combined = Distribution::mix(&[(p, &if_true), (1.0 - p, &if_false)], target);
        Ok(Evaluation::Conditional(ConditionalResult {
            combined,
            if_true,
            if_false,
            condition: probability,
            nested,
        }))
    }
}

fn rebase(branch: &Evaluation, step: BranchStep, reach: f64) -> Vec<NestedCondition> {
    branch
        .nested_conditions()
        .iter()
        .map(|entry| entry.under(step, reach))
        .collect()
}

pub(crate) fn apply_bin_op(op: BinOp, a: Outcome, b: Outcome, node: &Node) -> Result<Outcome, EvalError> {
    match op {
        BinOp::Add => a.checked_add(b).ok_or_else(|| EvalError::Overflow(node.to_string())),
        BinOp::Sub => a.checked_sub(b).ok_or_else(|| EvalError::Overflow(node.to_string())),
        BinOp::Mul => a.checked_mul(b).ok_or_else(|| EvalError::Overflow(node.to_string())),
        BinOp::Div => a
            .checked_div(b)
            .ok_or_else(|| EvalError::DivisionByZero(node.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_formula;

    fn eval(formula: &str) -> Evaluation {
        let parsed = parse_formula(formula).unwrap();
        Evaluator::new(&parsed.registry)
            .evaluate_formula(&parsed.root)
            .unwrap()
    }

    fn eval_critical(formula: &str, rate: f64) -> Evaluation {
        let parsed = parse_formula(formula).unwrap();
        Evaluator::new(&parsed.registry)
            .with_critical(rate)
            .evaluate_formula(&parsed.root)
            .unwrap()
    }

    #[test]
    fn threshold_rounds_rate_share() {
        let settings = CriticalSettings { rate: 5.0 };
        assert_eq!(settings.threshold(20), 20);
        assert_eq!(settings.threshold(6), 7);
        assert_eq!(CriticalSettings { rate: 10.0 }.threshold(20), 19);
        assert_eq!(CriticalSettings { rate: 100.0 }.threshold(20), 1);
    }

    #[test]
    fn probability_times_value_scales() {
        let Evaluation::Plain(dist) = eval("(d20>10)*10") else {
            panic!("expected a plain distribution");
        };
        assert_eq!(dist.as_point(), Some(Outcome::from_int(5)));
    }

    #[test]
    fn division_rounds_to_hundredths() {
        let Evaluation::Plain(dist) = eval("10/3") else {
            panic!("expected a plain distribution");
        };
        assert_eq!(dist.as_point(), Some(Outcome(333)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let parsed = parse_formula("d6/0").unwrap();
        let result = Evaluator::new(&parsed.registry).evaluate_formula(&parsed.root);
        assert!(matches!(result, Err(EvalError::DivisionByZero(_))));
    }

    #[test]
    fn critical_only_is_zero_outside_critical_branch() {
        let Evaluation::Plain(dist) = eval("d6+[d6]") else {
            panic!("expected a plain distribution");
        };
        assert_eq!(dist, Distribution::uniform(6));
    }

    #[test]
    fn explicit_critical_dice_split_mixture_exactly() {
        let Evaluation::CriticalMixture(mix) = eval_critical("D20+#d4#", 5.0) else {
            panic!("expected a critical mixture");
        };
        assert!((mix.critical_probability - 0.05).abs() < 1e-12);
        assert_eq!(mix.combined.total(), 80.0);
        // a natural 20 doubles the d4
        assert_eq!(mix.critical.min_outcome(), Some(Outcome::from_int(22)));
    }

    #[test]
    fn conditional_mixes_to_condition_total() {
        let Evaluation::Conditional(cond) = eval("d20>=11?2d6:0") else {
            panic!("expected a conditional");
        };
        assert_eq!(cond.combined.get(Outcome::ZERO), 10.0);
        assert!((cond.combined.total() - 20.0).abs() <= 2.0);
        assert_eq!(cond.nested.len(), 1);
    }

    #[test]
    fn nested_conditions_track_paths() {
        let Evaluation::Conditional(cond) = eval("d20>10?(d20>15?10:5):0") else {
            panic!("expected a conditional");
        };
        assert_eq!(cond.nested.len(), 2);
        let inner = &cond.nested[1];
        assert_eq!(inner.level, 1);
        assert_eq!(inner.path, vec![BranchStep::True]);
        assert!((inner.parent_probability - 0.5).abs() < 1e-12);
        assert!((inner.success_probability - 0.25).abs() < 1e-12);
    }

    #[test]
    fn non_comparison_condition_fails_at_evaluation() {
        let evaluator_registry = DiceRegistry::new();
        let node = Node::conditional(Node::dice(1, 20), Node::number(1.0), Node::number(0.0));
        let result = Evaluator::new(&evaluator_registry).evaluate(&node, EvalContext::default());
        assert!(matches!(result, Err(EvalError::ConditionNotComparison(_))));
    }
}
