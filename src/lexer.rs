use crate::error::LexError;
use crate::types::expr::{CompareOp, FunctionName, KeepKind};
use crate::types::token::*;
use winnow::Parser;
use winnow::Result as WNResultBase;
use winnow::ascii::digit1;
use winnow::combinator::{alt, opt, preceded};
use winnow::error::{ContextError, ErrMode};
use winnow::token::one_of;

pub type WNResult<O, E = ContextError> = WNResultBase<O, ErrMode<E>>;

// ==========================================
// Entry point
// ==========================================

/// Splits a formula into tokens. Whitespace is dropped first, so token offsets
/// refer to the compacted text.
pub fn tokenize(formula: &str) -> Result<Vec<Token>, LexError> {
    let text: String = formula.chars().filter(|c| !c.is_whitespace()).collect();
    let mut input: &str = &text;
    let mut tokens = Vec::new();
    while let Some(ch) = input.chars().next() {
        let offset = text.len() - input.len();
        let kind = lex_token(ch, &mut input, offset)?;
        tokens.push(Token::new(kind, offset));
    }
    Ok(tokens)
}

fn lex_token(ch: char, input: &mut &str, offset: usize) -> Result<TokenKind, LexError> {
    let kind = match ch {
        '0'..='9' => number_or_dice
            .parse_next(input)
            .map_err(|_| LexError::MalformedNumber { offset })?,
        'd' | 'D' => dice_or_reference
            .parse_next(input)
            .map_err(|_| LexError::MalformedDice {
                offset,
                reason: "expected a number of sides or '_' and a group id",
            })?,
        'k' => keep_spec
            .parse_next(input)
            .map_err(|_| LexError::MalformedModifier { modifier: "keep", offset })?,
        'r' => reroll_spec
            .parse_next(input)
            .map_err(|_| LexError::MalformedModifier { modifier: "reroll", offset })?,
        's' => success_explode_spec
            .parse_next(input)
            .map_err(|_| LexError::MalformedModifier { modifier: "success-exploding", offset })?,
        'e' => sum_explode_spec
            .parse_next(input)
            .map_err(|_| LexError::MalformedModifier { modifier: "sum-exploding", offset })?,
        'm' => function_name
            .parse_next(input)
            .map_err(|_| LexError::UnexpectedCharacter { ch, offset })?,
        _ => symbol
            .parse_next(input)
            .map_err(|_| LexError::UnexpectedCharacter { ch, offset })?,
    };
    validate(kind, offset)
}

// Checks the parsers cannot express: non-zero dice, non-empty ranges.
fn validate(kind: TokenKind, offset: usize) -> Result<TokenKind, LexError> {
    let check_range = |min: u32, max: Option<u32>| match max {
        Some(max) if max < min => Err(LexError::EmptyRange { min, max, offset }),
        _ => Ok(()),
    };
    match &kind {
        TokenKind::Dice { count, sides, .. } => {
            if *count == 0 {
                return Err(LexError::MalformedDice {
                    offset,
                    reason: "dice count must be at least 1",
                });
            }
            if *sides == 0 {
                return Err(LexError::MalformedDice {
                    offset,
                    reason: "dice need at least one side",
                });
            }
        }
        TokenKind::Keep { count, .. } if *count == 0 => {
            return Err(LexError::MalformedModifier { modifier: "keep", offset });
        }
        TokenKind::Reroll(spec) => check_range(spec.min, spec.max)?,
        TokenKind::SuccessExplode(spec) => {
            check_range(spec.success_min, spec.success_max)?;
            if let Some((min, max)) = spec.explode {
                check_range(min, max)?;
            }
        }
        TokenKind::SumExplode(spec) => check_range(spec.min, spec.max)?,
        _ => {}
    }
    Ok(kind)
}

// ==========================================
// Sub-parsers
// ==========================================

fn uint(input: &mut &str) -> WNResult<u32> {
    digit1.try_map(|s: &str| s.parse::<u32>()).parse_next(input)
}

fn decimal(input: &mut &str) -> WNResult<f64> {
    (digit1, opt(('.', digit1)))
        .take()
        .try_map(|s: &str| s.parse::<f64>())
        .parse_next(input)
}

fn dice_letter(input: &mut &str) -> WNResult<bool> {
    one_of(['d', 'D']).map(|c| c == 'D').parse_next(input)
}

// `NdM` or a plain number
fn number_or_dice(input: &mut &str) -> WNResult<TokenKind> {
    alt((
        (uint, dice_letter, uint).map(|(count, is_critical, sides)| TokenKind::Dice {
            count,
            sides,
            is_critical,
        }),
        decimal.map(TokenKind::Number),
    ))
    .parse_next(input)
}

// `dM`, `DM`, `d_N`, `D_N`
fn dice_or_reference(input: &mut &str) -> WNResult<TokenKind> {
    let is_critical = dice_letter.parse_next(input)?;
    alt((
        preceded('_', uint).map(|id| TokenKind::DiceRef { id, is_critical }),
        uint.map(|sides| TokenKind::Dice {
            count: 1,
            sides,
            is_critical,
        }),
    ))
    .parse_next(input)
}

// `kh[K]`, `kl[K]`
fn keep_spec(input: &mut &str) -> WNResult<TokenKind> {
    preceded(
        'k',
        (
            alt(('h'.value(KeepKind::High), 'l'.value(KeepKind::Low))),
            opt(uint),
        ),
    )
    .map(|(kind, count)| TokenKind::Keep {
        kind,
        count: count.unwrap_or(1),
    })
    .parse_next(input)
}

fn range_tail(input: &mut &str) -> WNResult<Option<u32>> {
    opt(preceded('~', uint)).parse_next(input)
}

// `rX[~Y][eZ]`
fn reroll_spec(input: &mut &str) -> WNResult<TokenKind> {
    preceded('r', (uint, range_tail, opt(preceded('e', uint))))
        .map(|(min, max, limit)| TokenKind::Reroll(RerollSpec { min, max, limit }))
        .parse_next(input)
}

// `sX[~Y][xA[~B]][lZ]`
fn success_explode_spec(input: &mut &str) -> WNResult<TokenKind> {
    preceded(
        's',
        (
            uint,
            range_tail,
            opt(preceded('x', (uint, range_tail))),
            opt(preceded('l', uint)),
        ),
    )
    .map(|(success_min, success_max, explode, limit)| {
        TokenKind::SuccessExplode(SuccessExplodeSpec {
            success_min,
            success_max,
            explode,
            limit,
        })
    })
    .parse_next(input)
}

// `eX[~Y][lZ]`
fn sum_explode_spec(input: &mut &str) -> WNResult<TokenKind> {
    preceded('e', (uint, range_tail, opt(preceded('l', uint))))
        .map(|(min, max, limit)| TokenKind::SumExplode(SumExplodeSpec { min, max, limit }))
        .parse_next(input)
}

fn function_name(input: &mut &str) -> WNResult<TokenKind> {
    alt((
        "min_each".value(FunctionName::MinEach),
        "max_each".value(FunctionName::MaxEach),
        "min".value(FunctionName::Min),
        "max".value(FunctionName::Max),
    ))
    .map(TokenKind::Function)
    .parse_next(input)
}

fn symbol(input: &mut &str) -> WNResult<TokenKind> {
    alt((
        ">=".value(TokenKind::Compare(CompareOp::GreaterEqual)),
        "<=".value(TokenKind::Compare(CompareOp::LessEqual)),
        "==".value(TokenKind::Compare(CompareOp::Equal)),
        '>'.value(TokenKind::Compare(CompareOp::Greater)),
        '<'.value(TokenKind::Compare(CompareOp::Less)),
        '='.value(TokenKind::Compare(CompareOp::Equal)),
        alt((
            '+'.value(TokenKind::Plus),
            '-'.value(TokenKind::Minus),
            '*'.value(TokenKind::Star),
            '/'.value(TokenKind::Slash),
            '?'.value(TokenKind::Question),
            ':'.value(TokenKind::Colon),
            ';'.value(TokenKind::Semicolon),
            ','.value(TokenKind::Comma),
        )),
        alt((
            '('.value(TokenKind::LeftParen),
            ')'.value(TokenKind::RightParen),
            '['.value(TokenKind::LeftBracket),
            ']'.value(TokenKind::RightBracket),
            '#'.value(TokenKind::Hash),
            '|'.value(TokenKind::Pipe),
        )),
    ))
    .parse_next(input)
}
