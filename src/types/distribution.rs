use crate::error::EvalError;
use std::collections::BTreeMap;
use std::fmt;

// ==========================================
// Outcome: fixed-point value on a two-decimal grid
// ==========================================

/// A distribution key, stored in hundredths so that results rounded to two
/// decimals compare and hash exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Outcome(pub i64);

impl Outcome {
    pub const SCALE: i64 = 100;
    pub const ZERO: Outcome = Outcome(0);
    pub const ONE: Outcome = Outcome(Self::SCALE);

    pub fn from_int(value: i64) -> Self {
        Outcome(value * Self::SCALE)
    }

    /// Rounds to the nearest hundredth.
    pub fn from_f64(value: f64) -> Self {
        Outcome((value * Self::SCALE as f64).round() as i64)
    }

    /// Like `from_f64`, but `None` when the value does not fit the grid.
    pub fn checked_from_f64(value: f64) -> Option<Self> {
        let scaled = (value * Self::SCALE as f64).round();
        // i64::MAX as f64 rounds up to 2^63, which itself does not fit
        (scaled.is_finite() && scaled.abs() < i64::MAX as f64).then(|| Outcome(scaled as i64))
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    pub fn is_integral(self) -> bool {
        self.0 % Self::SCALE == 0
    }

    pub fn checked_add(self, rhs: Outcome) -> Option<Outcome> {
        self.0.checked_add(rhs.0).map(Outcome)
    }

    pub fn checked_sub(self, rhs: Outcome) -> Option<Outcome> {
        self.0.checked_sub(rhs.0).map(Outcome)
    }

    pub fn checked_mul(self, rhs: Outcome) -> Option<Outcome> {
        Outcome::checked_from_f64(self.to_f64() * rhs.to_f64())
    }

    /// `None` on division by zero or when the quotient does not fit.
    pub fn checked_div(self, rhs: Outcome) -> Option<Outcome> {
        if rhs.0 == 0 {
            None
        } else {
            Outcome::checked_from_f64(self.to_f64() / rhs.to_f64())
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integral() {
            return write!(f, "{}", self.0 / Self::SCALE);
        }
        let text = format!("{:.2}", self.to_f64());
        f.write_str(text.trim_end_matches('0').trim_end_matches('.'))
    }
}

// ==========================================
// Distribution
// ==========================================

/// Outcome -> weight, where a weight counts equally likely elementary outcomes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution {
    weights: BTreeMap<Outcome, f64>,
}

/// A bound a distribution computation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exceeded {
    /// An outcome left the `i64` hundredths grid.
    Value,
    /// A weight grew past the largest finite `f64`.
    Weight,
    /// The keep enumeration needed more partial states than allowed.
    KeepStates { limit: usize },
}

impl Exceeded {
    /// The evaluation error for this bound, reported against `expr`.
    pub fn at(self, expr: &impl fmt::Display) -> EvalError {
        let expr = expr.to_string();
        match self {
            Exceeded::Value => EvalError::Overflow(expr),
            Exceeded::Weight => EvalError::WeightOverflow(expr),
            Exceeded::KeepStates { limit } => EvalError::TooManyKeepStates { expr, limit },
        }
    }
}

/// How mixtures of sub-distributions are brought back to integer weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mixing {
    /// Scale to the condition's own total and round each weight.
    #[default]
    Rounded,
    /// Scale to `condition total * lcm(branch totals)`, so weights stay integral.
    Exact,
}

// Beyond this every f64 weight is no longer an exact integer.
const MAX_EXACT_WEIGHT: u128 = 1 << 53;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

fn as_integral(value: f64) -> Option<u128> {
    if value.is_finite() && value >= 1.0 && value.fract() == 0.0 && value < MAX_EXACT_WEIGHT as f64 {
        Some(value as u128)
    } else {
        None
    }
}

impl Mixing {
    /// Total weight a mixture over `branch_totals` is normalized to.
    pub fn target_total(&self, condition_total: f64, branch_totals: &[f64]) -> f64 {
        match self {
            Mixing::Rounded => condition_total,
            Mixing::Exact => {
                let exact = || -> Option<f64> {
                    let base = as_integral(condition_total)?;
                    let mut lcm: u128 = 1;
                    for total in branch_totals {
                        let t = as_integral(*total)?;
                        lcm = (lcm / gcd(lcm, t)).checked_mul(t)?;
                    }
                    let target = base.checked_mul(lcm)?;
                    (target <= MAX_EXACT_WEIGHT).then_some(target as f64)
                };
                exact().unwrap_or(condition_total)
            }
        }
    }
}

impl Distribution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(value: Outcome, weight: f64) -> Self {
        let mut dist = Self::new();
        dist.add(value, weight);
        dist
    }

    /// Faces 1..=sides, each with weight 1.
    pub fn uniform(sides: u32) -> Self {
        let weights = (1..=sides as i64).map(|face| (Outcome::from_int(face), 1.0)).collect();
        Distribution { weights }
    }

    /// `{1: success, 0: failure}`, omitting empty sides.
    pub fn bernoulli(success: f64, failure: f64) -> Self {
        let mut dist = Self::new();
        dist.add(Outcome::ONE, success);
        dist.add(Outcome::ZERO, failure);
        dist
    }

    pub fn add(&mut self, value: Outcome, weight: f64) {
        if weight > 0.0 {
            *self.weights.entry(value).or_insert(0.0) += weight;
        }
    }

    pub fn get(&self, value: Outcome) -> f64 {
        self.weights.get(&value).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Outcome, f64)> + '_ {
        self.weights.iter().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn average(&self) -> f64 {
        let total = self.total();
        if total == 0.0 {
            return 0.0;
        }
        self.iter().map(|(k, w)| k.to_f64() * w).sum::<f64>() / total
    }

    pub fn min_outcome(&self) -> Option<Outcome> {
        self.weights.keys().next().copied()
    }

    pub fn max_outcome(&self) -> Option<Outcome> {
        self.weights.keys().next_back().copied()
    }

    /// The single value of a one-point distribution.
    pub fn as_point(&self) -> Option<Outcome> {
        if self.weights.len() == 1 {
            self.min_outcome()
        } else {
            None
        }
    }

    /// Weighted cross product, merging `op(a, b)` keys.
    pub fn combine<E>(
        &self,
        other: &Distribution,
        mut op: impl FnMut(Outcome, Outcome) -> Result<Outcome, E>,
    ) -> Result<Distribution, E> {
        let mut out = Distribution::new();
        for (a, wa) in self.iter() {
            for (b, wb) in other.iter() {
                out.add(op(a, b)?, wa * wb);
            }
        }
        Ok(out)
    }

    /// Distribution of the sum of two independent values.
    pub fn convolve_sum(&self, other: &Distribution) -> Result<Distribution, Exceeded> {
        let out = self.combine(other, |a, b| a.checked_add(b).ok_or(Exceeded::Value))?;
        out.check_weights()
    }

    /// Passes the distribution through unless a weight has become infinite.
    pub fn check_weights(self) -> Result<Distribution, Exceeded> {
        if self.total().is_finite() {
            Ok(self)
        } else {
            Err(Exceeded::Weight)
        }
    }

    pub fn map_values(&self, mut f: impl FnMut(Outcome) -> Outcome) -> Distribution {
        let mut out = Distribution::new();
        for (k, w) in self.iter() {
            out.add(f(k), w);
        }
        out
    }

    /// `map_values` for a mapping that can fail.
    pub fn try_map_values<E>(
        &self,
        mut f: impl FnMut(Outcome) -> Result<Outcome, E>,
    ) -> Result<Distribution, E> {
        let mut out = Distribution::new();
        for (k, w) in self.iter() {
            out.add(f(k)?, w);
        }
        Ok(out)
    }

    pub fn shift(&self, by: Outcome) -> Result<Distribution, Exceeded> {
        self.try_map_values(|k| k.checked_add(by).ok_or(Exceeded::Value))
    }

    pub fn filter(&self, mut keep: impl FnMut(Outcome) -> bool) -> Distribution {
        let weights = self
            .weights
            .iter()
            .filter(|(k, _)| keep(**k))
            .map(|(k, w)| (*k, *w))
            .collect();
        Distribution { weights }
    }

    pub fn scaled(&self, factor: f64) -> Distribution {
        let mut out = Distribution::new();
        for (k, w) in self.iter() {
            out.add(k, w * factor);
        }
        out
    }

    pub fn extend_scaled(&mut self, other: &Distribution, factor: f64) {
        for (k, w) in other.iter() {
            self.add(k, w * factor);
        }
    }

    /// Pointwise difference, dropping values that would go non-positive.
    pub fn subtract(&self, other: &Distribution) -> Distribution {
        let mut out = Distribution::new();
        for (k, w) in self.iter() {
            let rest = w - other.get(k);
            if rest > 1e-9 {
                out.add(k, rest);
            }
        }
        out
    }

    pub fn rounded(&self) -> Distribution {
        let mut out = Distribution::new();
        for (k, w) in self.iter() {
            out.add(k, w.round());
        }
        out
    }

    /// Mixture of `(probability, distribution)` parts, normalized to `target_total`
    /// and rounded to integer weights.
    pub fn mix(parts: &[(f64, &Distribution)], target_total: f64) -> Distribution {
        let mut out = Distribution::new();
        for (probability, dist) in parts {
            let total = dist.total();
            if *probability <= 0.0 || total == 0.0 {
                continue;
            }
            out.extend_scaled(dist, target_total * probability / total);
        }
        out.rounded()
    }

    /// Sum of `count` independent copies, by binary exponentiation.
    pub fn sum_of_iid(&self, count: u32) -> Result<Distribution, Exceeded> {
        let mut result = Distribution::point(Outcome::ZERO, 1.0);
        let mut base = self.clone();
        let mut n = count;
        while n > 0 {
            if n & 1 == 1 {
                result = result.convolve_sum(&base)?;
            }
            n >>= 1;
            if n > 0 {
                base = base.convolve_sum(&base)?;
            }
        }
        Ok(result)
    }

    /// String-keyed copy for the output record.
    pub fn to_record(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(k, w)| (k.to_string(), w)).collect()
    }
}

impl FromIterator<(Outcome, f64)> for Distribution {
    fn from_iter<I: IntoIterator<Item = (Outcome, f64)>>(iter: I) -> Self {
        let mut dist = Distribution::new();
        for (k, w) in iter {
            dist.add(k, w);
        }
        dist
    }
}
