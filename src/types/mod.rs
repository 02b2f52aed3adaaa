pub mod calc_result;
pub mod distribution;
pub mod evaluation;
pub mod expr;
pub mod token;
