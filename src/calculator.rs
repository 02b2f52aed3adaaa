use crate::error::CalcError;
use crate::evaluator::Evaluator;
use crate::grammar::{ParsedFormula, parse_formula};
use crate::types::calc_result::*;
use crate::types::distribution::{Distribution, Exceeded, Mixing};
use crate::types::evaluation::Evaluation;
use crate::types::expr::Node;
use wasm_bindgen::prelude::*;

// ==========================================
// Entry points
// ==========================================

/// Computes the exact outcome distribution of `formula`. Never fails: errors
/// come back as a record with `success: false` and the error message.
pub fn calculate(formula: &str, options: &CalculationOptions) -> CalculationResult {
    match try_calculate(formula, options) {
        Ok(result) => result,
        Err(e) => CalculationResult::failure(e.to_string()),
    }
}

#[wasm_bindgen(js_name = calculate)]
pub fn calculate_js(formula: &str, options: JsValue) -> CalculationResult {
    let options = if options.is_undefined() || options.is_null() {
        CalculationOptions::default()
    } else {
        match serde_wasm_bindgen::from_value::<CalculationOptions>(options) {
            Ok(options) => options,
            Err(e) => {
                return CalculationResult::failure(
                    CalcError::InvalidOptions(e.to_string()).to_string(),
                );
            }
        }
    };
    calculate(formula, &options)
}

pub fn try_calculate(formula: &str, options: &CalculationOptions) -> Result<CalculationResult, CalcError> {
    validate_options(options)?;
    let parsed = parse_formula(formula)?;
    let mut evaluator = Evaluator::new(&parsed.registry).with_mixing(if options.exact_mixing {
        Mixing::Exact
    } else {
        Mixing::Rounded
    });
    if options.critical_enabled {
        evaluator = evaluator.with_critical(options.critical_rate);
    }
    let evaluation = evaluator.evaluate_formula(&parsed.root)?;
    if !evaluation.distribution().total().is_finite() {
        return Err(Exceeded::Weight.at(&parsed.root).into());
    }
    Ok(render(&parsed, evaluation))
}

fn validate_options(options: &CalculationOptions) -> Result<(), CalcError> {
    let rate = options.critical_rate;
    if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
        return Err(CalcError::InvalidOptions(format!(
            "criticalRate must be between 0 and 100, got {}",
            rate
        )));
    }
    Ok(())
}

// ==========================================
// Evaluation -> result record
// ==========================================

fn base_record(dist: &Distribution) -> CalculationResult {
    CalculationResult {
        success: true,
        distribution: dist.to_record(),
        average: dist.average(),
        total_outcomes: dist.total(),
        ..Default::default()
    }
}

fn condition_text(root: &Node) -> Option<String> {
    match root.strip_groups() {
        Node::Conditional(cond) => Some(cond.condition.to_string()),
        _ => None,
    }
}

fn render(parsed: &ParsedFormula, evaluation: Evaluation) -> CalculationResult {
    let mut record = match evaluation {
        Evaluation::Plain(dist) => base_record(&dist),
        Evaluation::Probability(p) => {
            let mut record = base_record(&p.distribution());
            record.average = p.success_probability();
            record.total_outcomes = p.total;
            record.is_probability = Some(true);
            record.success_probability = Some(p.success_probability());
            record.success_count = Some(p.success);
            record.probabilities = p.critical;
            record
        }
        Evaluation::Conditional(c) => {
            let mut record = base_record(&c.combined);
            record.is_conditional = Some(true);
            record.true_values = Some(c.if_true.to_record());
            record.false_values = Some(c.if_false.to_record());
            record.condition = condition_text(&parsed.root);
            record.nested_conditions = Some(c.nested);
            record
        }
        Evaluation::ConditionalCritical(c) => {
            let mut record = base_record(&c.combined);
            record.is_conditional_critical = Some(true);
            record.normal_hit_values = Some(c.normal_hit.to_record());
            record.critical_hit_values = Some(c.critical_hit.to_record());
            record.miss_values = Some(c.miss.to_record());
            record.probabilities = Some(c.probabilities);
            record.condition = condition_text(&parsed.root);
            record.nested_conditions = Some(c.nested);
            record
        }
        Evaluation::CriticalMixture(m) => {
            let mut record = base_record(&m.combined);
            record.is_critical = Some(true);
            record.normal_distribution = Some(m.normal.to_record());
            record.critical_distribution = Some(m.critical.to_record());
            record.normal_probability = Some(m.normal_probability);
            record.critical_probability = Some(m.critical_probability);
            record
        }
    };
    if parsed.has_dice_reuse() {
        record.has_dice_reuse = Some(true);
    }
    record
}
