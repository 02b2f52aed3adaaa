use super::distribution::{Distribution, Outcome};
use serde::Serialize;
use tsify::Tsify;

// ==========================================
// Evaluation results
// ==========================================

/// One edge on the way from the root conditional to a nested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub enum BranchStep {
    True,
    False,
    NormalHit,
    CriticalHit,
    Miss,
}

/// Probabilities of the three outcomes of a critical-aware check; they sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct CriticalSplit {
    pub normal_hit: f64,
    pub critical_hit: f64,
    pub miss: f64,
}

impl CriticalSplit {
    pub fn from_weights(normal: f64, critical: f64, miss: f64) -> Self {
        let total = normal + critical + miss;
        if total == 0.0 {
            return CriticalSplit::default();
        }
        CriticalSplit {
            normal_hit: normal / total,
            critical_hit: critical / total,
            miss: miss / total,
        }
    }
}

/// Result of a comparison: success/failure weights over `total` elementary outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityResult {
    pub success: f64,
    pub failure: f64,
    pub total: f64,
    pub critical: Option<CriticalSplit>,
}

impl ProbabilityResult {
    pub fn new(success: f64, failure: f64) -> Self {
        ProbabilityResult {
            success,
            failure,
            total: success + failure,
            critical: None,
        }
    }

    pub fn success_probability(&self) -> f64 {
        if self.total == 0.0 { 0.0 } else { self.success / self.total }
    }

    pub fn failure_probability(&self) -> f64 {
        if self.total == 0.0 { 0.0 } else { self.failure / self.total }
    }

    /// `{1: success, 0: failure}`
    pub fn distribution(&self) -> Distribution {
        Distribution::bernoulli(self.success, self.failure)
    }
}

/// Metadata of a conditional somewhere in the branch tree, for rendering a probability tree.
#[derive(Debug, Clone, PartialEq, Serialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct NestedCondition {
    pub condition: String,
    pub level: u32,
    pub path: Vec<BranchStep>,
    pub success_probability: f64,
    pub failure_probability: f64,
    pub parent_probability: f64, // absolute probability of reaching this condition
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub critical: Option<CriticalSplit>,
}

impl NestedCondition {
    pub fn root(condition: String, probability: &ProbabilityResult) -> Self {
        NestedCondition {
            condition,
            level: 0,
            path: Vec::new(),
            success_probability: probability.success_probability(),
            failure_probability: probability.failure_probability(),
            parent_probability: 1.0,
            critical: probability.critical,
        }
    }

    /// Re-roots this entry one level down, below `step` reached with probability `reach`.
    pub fn under(&self, step: BranchStep, reach: f64) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(step);
        path.extend_from_slice(&self.path);
        NestedCondition {
            condition: self.condition.clone(),
            level: self.level + 1,
            path,
            success_probability: self.success_probability,
            failure_probability: self.failure_probability,
            parent_probability: self.parent_probability * reach,
            critical: self.critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalResult {
    pub combined: Distribution,
    pub if_true: Distribution,
    pub if_false: Distribution,
    pub condition: ProbabilityResult,
    pub nested: Vec<NestedCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalCriticalResult {
    pub combined: Distribution,
    pub normal_hit: Distribution,
    pub critical_hit: Distribution,
    pub miss: Distribution,
    pub probabilities: CriticalSplit,
    pub nested: Vec<NestedCondition>,
}

/// A formula evaluated once normally and once on a critical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalMixtureResult {
    pub combined: Distribution,
    pub normal: Distribution,
    pub critical: Distribution,
    pub normal_probability: f64,
    pub critical_probability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Plain(Distribution),
    Probability(ProbabilityResult),
    Conditional(ConditionalResult),
    ConditionalCritical(ConditionalCriticalResult),
    CriticalMixture(CriticalMixtureResult),
}

impl Evaluation {
    /// The value distribution of this result; comparisons become `{1: success, 0: failure}`.
    pub fn distribution(&self) -> Distribution {
        match self {
            Evaluation::Plain(dist) => dist.clone(),
            Evaluation::Probability(p) => p.distribution(),
            Evaluation::Conditional(c) => c.combined.clone(),
            Evaluation::ConditionalCritical(c) => c.combined.clone(),
            Evaluation::CriticalMixture(m) => m.combined.clone(),
        }
    }

    pub fn into_distribution(self) -> Distribution {
        match self {
            Evaluation::Plain(dist) => dist,
            Evaluation::Probability(p) => p.distribution(),
            Evaluation::Conditional(c) => c.combined,
            Evaluation::ConditionalCritical(c) => c.combined,
            Evaluation::CriticalMixture(m) => m.combined,
        }
    }

    pub fn nested_conditions(&self) -> &[NestedCondition] {
        match self {
            Evaluation::Conditional(c) => &c.nested,
            Evaluation::ConditionalCritical(c) => &c.nested,
            _ => &[],
        }
    }

    pub fn as_point(&self) -> Option<Outcome> {
        match self {
            Evaluation::Plain(dist) => dist.as_point(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_condition_rebases_path_and_reach() {
        let inner = NestedCondition::root("d6>3".to_string(), &ProbabilityResult::new(3.0, 3.0));
        let moved = inner.under(BranchStep::True, 0.25).under(BranchStep::False, 0.5);
        assert_eq!(moved.level, 2);
        assert_eq!(moved.path, vec![BranchStep::False, BranchStep::True]);
        assert!((moved.parent_probability - 0.125).abs() < 1e-12);
        assert!((moved.success_probability - 0.5).abs() < 1e-12);
    }

    #[test]
    fn critical_split_normalizes_weights() {
        let split = CriticalSplit::from_weights(4.0, 1.0, 15.0);
        assert!((split.normal_hit - 0.2).abs() < 1e-12);
        assert!((split.critical_hit - 0.05).abs() < 1e-12);
        assert!((split.miss - 0.75).abs() < 1e-12);
    }
}
