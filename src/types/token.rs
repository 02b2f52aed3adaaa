use super::expr::{CompareOp, FunctionName, KeepKind};
use std::fmt;

// ==========================================
// Token definitions
// ==========================================

/// Inclusive face window used by reroll and exploding modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRange {
    pub min: u32,
    pub max: u32,
}

impl FaceRange {
    pub fn new(min: u32, max: u32) -> Self {
        FaceRange { min, max }
    }

    /// `max` of `None` means "up to the highest face".
    pub fn up_to(min: u32, max: Option<u32>, sides: u32) -> Self {
        FaceRange::new(min, max.unwrap_or(sides))
    }

    pub fn contains(&self, face: u32) -> bool {
        self.min <= face && face <= self.max
    }
}

// `rX[~Y][eZ]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerollSpec {
    pub min: u32,
    pub max: Option<u32>,
    pub limit: Option<u32>,
}

// `sX[~Y][xA[~B]][lZ]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessExplodeSpec {
    pub success_min: u32,
    pub success_max: Option<u32>,
    pub explode: Option<(u32, Option<u32>)>,
    pub limit: Option<u32>,
}

// `eX[~Y][lZ]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumExplodeSpec {
    pub min: u32,
    pub max: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Dice {
        count: u32,
        sides: u32,
        is_critical: bool,
    },
    DiceRef {
        id: u32,
        is_critical: bool,
    },
    Plus,
    Minus,
    Star,
    Slash,
    Compare(CompareOp),
    Question,
    Colon,
    Semicolon,
    Comma,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    Hash,
    Pipe,
    Keep {
        kind: KeepKind,
        count: u32,
    },
    Reroll(RerollSpec),
    SuccessExplode(SuccessExplodeSpec),
    SumExplode(SumExplodeSpec),
    Function(FunctionName),
}

/// A token plus its byte offset in the whitespace-stripped formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize) -> Self {
        Token { kind, offset }
    }
}

impl TokenKind {
    pub fn is_postfix_modifier(&self) -> bool {
        matches!(
            self,
            TokenKind::Reroll(_) | TokenKind::SuccessExplode(_) | TokenKind::SumExplode(_)
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Number(n) => write!(f, "number {}", n),
            TokenKind::Dice {
                count,
                sides,
                is_critical,
            } => write!(f, "dice {}{}{}", count, if *is_critical { 'D' } else { 'd' }, sides),
            TokenKind::DiceRef { id, is_critical } => {
                write!(f, "reference {}_{}", if *is_critical { 'D' } else { 'd' }, id)
            }
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Compare(op) => write!(f, "'{}'", op),
            TokenKind::Question => f.write_str("'?'"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Semicolon => f.write_str("';'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::LeftParen => f.write_str("'('"),
            TokenKind::RightParen => f.write_str("')'"),
            TokenKind::LeftBracket => f.write_str("'['"),
            TokenKind::RightBracket => f.write_str("']'"),
            TokenKind::Hash => f.write_str("'#'"),
            TokenKind::Pipe => f.write_str("'|'"),
            TokenKind::Keep { kind, count } => write!(f, "keep '{}{}'", kind, count),
            TokenKind::Reroll(_) => f.write_str("reroll modifier"),
            TokenKind::SuccessExplode(_) => f.write_str("success-exploding modifier"),
            TokenKind::SumExplode(_) => f.write_str("sum-exploding modifier"),
            TokenKind::Function(name) => write!(f, "function '{}'", name),
        }
    }
}
