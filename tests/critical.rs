use dicecalc::types::evaluation::BranchStep;
use dicecalc::{CalculationOptions, CalculationResult, calculate};

fn critical(formula: &str, rate: f64) -> CalculationResult {
    let result = calculate(formula, &CalculationOptions::with_critical(rate));
    assert!(result.success, "{} failed: {:?}", formula, result.error);
    result
}

#[test]
fn test_critical_branch_doubles_damage() {
    let result = critical("D20+5>=15?#2d6#+3:0", 5.0);
    assert_eq!(result.is_conditional_critical, Some(true));
    let normal = result.normal_hit_values.unwrap();
    let crit = result.critical_hit_values.unwrap();
    assert_eq!(normal.keys().count(), 11);
    assert!(crit.contains_key("27"));
    assert!(!normal.contains_key("27"));
    assert_eq!(result.miss_values.unwrap().get("0"), Some(&1.0));
}

#[test]
fn test_switch_picks_critical_expression() {
    let result = critical("d20>=10?|1|100|:0", 5.0);
    let crit = result.critical_hit_values.unwrap();
    assert_eq!(crit.keys().collect::<Vec<_>>(), vec!["100"]);
    assert!((result.probabilities.unwrap().critical_hit - 0.05).abs() < 1e-12);
}

#[test]
fn test_critical_only_adds_nothing_on_a_normal_hit() {
    let result = critical("d20>=10?d6+[d6]:0", 5.0);
    let normal = result.normal_hit_values.unwrap();
    assert_eq!(normal.keys().count(), 6);
    let crit = result.critical_hit_values.unwrap();
    assert_eq!(crit.keys().count(), 11);
}

#[test]
fn test_rate_zero_never_crits() {
    let result = critical("d20>=10?#d6#:0", 0.0);
    let p = result.probabilities.unwrap();
    assert_eq!(p.critical_hit, 0.0);
    assert!((p.normal_hit - 0.55).abs() < 1e-12);
}

#[test]
fn test_critical_die_behind_arithmetic() {
    // only a natural 20 can reach 30, and it always does
    let result = critical("D20*2-10>=30?1:0", 5.0);
    let p = result.probabilities.unwrap();
    assert!((p.critical_hit - 0.05).abs() < 1e-12);
    assert_eq!(p.normal_hit, 0.0);
}

#[test]
fn test_advantage_critical_chance() {
    let result = critical("kh(2D20)>=15?#d8#:0", 5.0);
    let p = result.probabilities.unwrap();
    assert!((p.critical_hit - (1.0 - 0.95 * 0.95)).abs() < 1e-12);
}

#[test]
fn test_rerolled_critical_die_uses_final_face() {
    // reroll a natural 1 once; a 20 on either roll is critical
    let result = critical("D20r1>=2?1:0", 5.0);
    let p = result.probabilities.unwrap();
    // 20 on the first roll, or 1 then 20
    assert!((p.critical_hit - (20.0 + 1.0) / 400.0).abs() < 1e-12);
}

#[test]
fn test_exploding_critical_die_uses_natural_roll() {
    let result = critical("D6e6>=6?1:0", 20.0);
    let p = result.probabilities.unwrap();
    // threshold 6 - round(1.2) + 1 = 6, only a natural 6 counts
    assert!((p.critical_hit - 1.0 / 6.0).abs() < 1e-12);
    assert_eq!(p.normal_hit, 0.0);
}

#[test]
fn test_bare_comparison_reports_split() {
    let result = critical("D20+2>=12", 10.0);
    assert_eq!(result.is_probability, Some(true));
    let p = result.probabilities.unwrap();
    assert!((p.critical_hit - 0.10).abs() < 1e-12);
    assert!((p.normal_hit + p.critical_hit - result.success_probability.unwrap()).abs() < 1e-12);
}

#[test]
fn test_exact_critical_mixture() {
    let result = critical("D20+#d4#", 5.0);
    assert_eq!(result.is_critical, Some(true));
    assert_eq!(result.total_outcomes, 80.0);
    assert!((result.critical_probability.unwrap() - 0.05).abs() < 1e-12);
}

#[test]
fn test_nested_critical_paths() {
    let result = critical("d20>=10?(d20>=15?#d6#:1):0", 5.0);
    let nested = result.nested_conditions.unwrap();
    let paths: Vec<_> = nested.iter().map(|n| n.path.clone()).collect();
    assert!(paths.contains(&vec![BranchStep::NormalHit]));
    assert!(paths.contains(&vec![BranchStep::CriticalHit]));
    let under_crit = nested
        .iter()
        .find(|n| n.path == vec![BranchStep::CriticalHit])
        .unwrap();
    assert!((under_crit.parent_probability - 0.05).abs() < 1e-12);
    assert!(under_crit.critical.is_some());
}

#[test]
fn test_keep_lowest_of_critical_pool() {
    let result = critical("kl(2D20)>=10?1:0", 5.0);
    let probabilities = result.probabilities.unwrap();
    assert!((probabilities.critical_hit - 0.0975).abs() < 1e-12);
    assert!((probabilities.normal_hit - 0.205).abs() < 1e-12);
}
