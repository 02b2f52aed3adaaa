use thiserror::Error;

/// Offsets are byte positions in the formula after whitespace removal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}' at position {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },

    #[error("malformed dice at position {offset}: {reason}")]
    MalformedDice { offset: usize, reason: &'static str },

    #[error("malformed number at position {offset}")]
    MalformedNumber { offset: usize },

    #[error("malformed {modifier} modifier at position {offset}")]
    MalformedModifier { modifier: &'static str, offset: usize },

    #[error("empty range {min}~{max} at position {offset}")]
    EmptyRange { min: u32, max: u32, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty formula")]
    EmptyFormula,

    #[error("expected {expected} at position {offset}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("expected {expected} but the formula ended")]
    UnexpectedEnd { expected: &'static str },

    #[error("unclosed '{open}' opened at position {offset}")]
    Unclosed { open: char, offset: usize },

    #[error("condition before '?' at position {offset} must be a comparison")]
    ConditionNotComparison { offset: usize },

    #[error("{name} takes {expected} arguments, got {found}")]
    WrongArity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("modifier at position {offset} must follow a dice literal")]
    ModifierTarget { offset: usize },

    #[error("comparison operators cannot be chained (position {offset})")]
    ChainedComparison { offset: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("condition must be a comparison: {0}")]
    ConditionNotComparison(String),

    #[error("dice reference d_{0} does not name a dice group")]
    UnresolvedReference(u32),

    #[error("dice reference d_{0} used outside dice-reuse mode")]
    ReferenceOutsideReuse(u32),

    #[error("division by zero in {0}")]
    DivisionByZero(String),

    #[error("threshold of {function} must be a constant, got {argument}")]
    NonConstantThreshold { function: String, argument: String },

    #[error("value out of range in {0}")]
    Overflow(String),

    #[error("too many equally likely outcomes to count in {0}")]
    WeightOverflow(String),

    #[error("keeping dice in {expr} needs more than {limit} partial results")]
    TooManyKeepStates { expr: String, limit: usize },

    #[error("dice reuse needs {count} face combinations, more than the limit of {limit}")]
    TooManyCombinations { count: f64, limit: u64 },
}

/// Everything `calculate` can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
