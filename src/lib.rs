//! Exact probability distributions for tabletop dice formulas.
//!
//! A formula such as `D20+5>=15?#2d6#+3:0` is tokenized, parsed into an AST and
//! evaluated by enumeration into an exact outcome -> weight map, including
//! critical-hit splits and formulas that reuse the same dice (`d_1`).

pub mod calculator;
pub mod critical;
pub mod dice_reuse;
pub mod distribution;
pub mod error;
pub mod evaluator;
pub mod grammar;
pub mod lexer;
pub mod types;

pub use calculator::calculate;
pub use error::{CalcError, EvalError, LexError, ParseError};
pub use types::calc_result::{CalculationOptions, CalculationResult};
