use dicecalc::LexError;
use dicecalc::lexer::tokenize;
use dicecalc::types::expr::*;
use dicecalc::types::token::*;

fn kinds(formula: &str) -> Vec<TokenKind> {
    tokenize(formula)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn test_bare_die_has_count_one() {
    assert_eq!(
        kinds("D8"),
        vec![TokenKind::Dice {
            count: 1,
            sides: 8,
            is_critical: true
        }]
    );
}

#[test]
fn test_dice_reference() {
    assert_eq!(
        kinds("d_3+D_1"),
        vec![
            TokenKind::DiceRef {
                id: 3,
                is_critical: false
            },
            TokenKind::Plus,
            TokenKind::DiceRef {
                id: 1,
                is_critical: true
            },
        ]
    );
}

#[test]
fn test_keep_count_defaults_to_one() {
    assert_eq!(
        kinds("kl(")[0],
        TokenKind::Keep {
            kind: KeepKind::Low,
            count: 1
        }
    );
    assert_eq!(
        kinds("kh3(")[0],
        TokenKind::Keep {
            kind: KeepKind::High,
            count: 3
        }
    );
}

#[test]
fn test_success_explode_spec() {
    assert_eq!(
        kinds("5d10s8~9x10l2")[1],
        TokenKind::SuccessExplode(SuccessExplodeSpec {
            success_min: 8,
            success_max: Some(9),
            explode: Some((10, None)),
            limit: Some(2),
        })
    );
}

#[test]
fn test_sum_explode_spec() {
    assert_eq!(
        kinds("d6e5~6l4")[1],
        TokenKind::SumExplode(SumExplodeSpec {
            min: 5,
            max: Some(6),
            limit: Some(4),
        })
    );
}

#[test]
fn test_functions_prefer_longest_name() {
    assert_eq!(kinds("min_each")[0], TokenKind::Function(FunctionName::MinEach));
    assert_eq!(kinds("max(")[0], TokenKind::Function(FunctionName::Max));
}

#[test]
fn test_decimal_number() {
    assert_eq!(kinds("1.5*d4")[0], TokenKind::Number(1.5));
}

#[test]
fn test_critical_delimiters() {
    assert_eq!(
        kinds("#|[]?:;,"),
        vec![
            TokenKind::Hash,
            TokenKind::Pipe,
            TokenKind::LeftBracket,
            TokenKind::RightBracket,
            TokenKind::Question,
            TokenKind::Colon,
            TokenKind::Semicolon,
            TokenKind::Comma,
        ]
    );
}

#[test]
fn test_unknown_character() {
    assert_eq!(
        tokenize("2x6"),
        Err(LexError::UnexpectedCharacter { ch: 'x', offset: 1 })
    );
    assert!(matches!(tokenize("d6 & 2"), Err(LexError::UnexpectedCharacter { ch: '&', .. })));
}

#[test]
fn test_malformed_modifiers() {
    assert!(matches!(
        tokenize("d6r"),
        Err(LexError::MalformedModifier { modifier: "reroll", .. })
    ));
    assert!(matches!(
        tokenize("d6s"),
        Err(LexError::MalformedModifier { .. })
    ));
    assert!(matches!(tokenize("kx(d6)"), Err(LexError::MalformedModifier { .. })));
    assert!(matches!(tokenize("d"), Err(LexError::MalformedDice { .. })));
}
