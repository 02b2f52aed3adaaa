use dicecalc::grammar::parse_formula;
use dicecalc::lexer::tokenize;
use dicecalc::{CalculationOptions, calculate};
use proptest::prelude::*;

proptest! {
    #[test]
    fn test_pool_weights_cover_every_roll(count in 1u32..=4, sides in 1u32..=12) {
        let result = calculate(&format!("{}d{}", count, sides), &CalculationOptions::default());
        prop_assert!(result.success);
        prop_assert_eq!(result.total_outcomes, (sides as f64).powi(count as i32));
        let keys: Vec<i64> = result.distribution.keys().map(|k| k.parse().unwrap()).collect();
        prop_assert_eq!(keys.iter().min().copied(), Some(count as i64));
        prop_assert_eq!(keys.iter().max().copied(), Some((count * sides) as i64));
    }

    #[test]
    fn test_comparison_outcomes_are_complementary(sides in 2u32..=20, target in 0i64..=25) {
        let result = calculate(&format!("d{}>{}", sides, target), &CalculationOptions::default());
        prop_assert!(result.success);
        let success = result.success_count.unwrap();
        let failure = result.distribution.get("0").copied().unwrap_or(0.0);
        prop_assert_eq!(success + failure, result.total_outcomes);
        let p = result.success_probability.unwrap();
        let q = failure / result.total_outcomes;
        prop_assert!((p + q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_three_way_split_sums_to_one(
        bonus in 0i64..=10,
        target in 5i64..=25,
        rate in 0.0f64..=100.0,
    ) {
        let formula = format!("d20+{}>={}?2d6:0", bonus, target);
        let result = calculate(&formula, &CalculationOptions::with_critical(rate));
        prop_assert!(result.success);
        let p = result.probabilities.unwrap();
        prop_assert!((p.normal_hit + p.critical_hit + p.miss - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_higher_rate_means_more_criticals(target in 2i64..=16, step in 1u32..=4) {
        let formula = format!("d20>={}?1:0", target);
        let low = calculate(&formula, &CalculationOptions::with_critical(5.0 * step as f64));
        let high = calculate(&formula, &CalculationOptions::with_critical(5.0 * (step + 1) as f64));
        let (low, high) = (low.probabilities.unwrap(), high.probabilities.unwrap());
        prop_assert!(high.critical_hit > low.critical_hit);
        prop_assert!(high.normal_hit < low.normal_hit);
        prop_assert!((high.miss - low.miss).abs() < 1e-12);
    }

    #[test]
    fn test_tokenizer_never_panics(input in "\\PC{0,40}") {
        let _ = tokenize(&input);
    }

    #[test]
    fn test_parser_never_panics(input in "[0-9dD+*/()<>=?:#|\\[\\]khr_;, ~-]{0,24}") {
        let _ = parse_formula(&input);
    }
}
