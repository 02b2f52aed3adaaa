use super::evaluation::{CriticalSplit, NestedCondition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tsify::Tsify;

// ==========================================
// Options passed in by the host
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
#[serde(rename_all = "camelCase", default)]
pub struct CalculationOptions {
    pub critical_enabled: bool,
    pub critical_rate: f64, // percent, 0..=100
    pub exact_mixing: bool, // normalize mixtures to lcm totals instead of rounding
}

impl Default for CalculationOptions {
    fn default() -> Self {
        CalculationOptions {
            critical_enabled: false,
            critical_rate: 5.0,
            exact_mixing: false,
        }
    }
}

impl CalculationOptions {
    pub fn with_critical(rate: f64) -> Self {
        CalculationOptions {
            critical_enabled: true,
            critical_rate: rate,
            ..Default::default()
        }
    }
}

// ==========================================
// Result record handed back to the host
// ==========================================

pub type ValueMap = BTreeMap<String, f64>;

/// Flat result record. Mode-specific fields are omitted when they do not apply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Tsify)]
#[tsify(into_wasm_abi)]
#[serde(rename_all = "camelCase")]
pub struct CalculationResult {
    pub success: bool,
    pub distribution: ValueMap,
    pub average: f64,
    /// Number of equally likely outcomes behind `distribution`; always a whole
    /// number, carried as `f64` because large pools (`30d20`) exceed `u64`.
    pub total_outcomes: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub error: Option<String>,

    // bare comparison
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub is_probability: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub success_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub success_count: Option<f64>,

    // ternary
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub is_conditional: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub true_values: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub false_values: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub nested_conditions: Option<Vec<NestedCondition>>,

    // plain critical mixture
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub is_critical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub normal_distribution: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub critical_distribution: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub normal_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub critical_probability: Option<f64>,

    // ternary with a critical-aware condition
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub is_conditional_critical: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub normal_hit_values: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub critical_hit_values: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub miss_values: Option<ValueMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub probabilities: Option<CriticalSplit>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[tsify(optional)]
    pub has_dice_reuse: Option<bool>,
}

impl CalculationResult {
    pub fn failure(message: String) -> Self {
        CalculationResult {
            success: false,
            error: Some(message),
            ..Default::default()
        }
    }
}
