//! Formula language
//!
//! A small decimal expression language used by calculation steps:
//!
//! ```text
//! round(income * 0.3 - min(debt, 500), 2)
//! if(score >= 700) then(rate - 0.25) else(rate)
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! Source → tokenize → substitute variables → parse (Expr tree) → eval
//! ```
//!
//! Every step is pure. Arithmetic uses `rust_decimal` throughout, never
//! floating point.

mod eval;
pub mod lexer;
pub mod parser;

use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;

pub use parser::{BinaryOp, CompareOp, Expr, Function};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("invalid character '{ch}' at offset {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("invalid number literal '{literal}' at offset {offset}")]
    InvalidNumber { literal: String, offset: usize },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unexpected token '{found}' at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: &'static str,
        offset: usize,
    },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },

    #[error("unexpected trailing input '{found}' at offset {offset}")]
    TrailingTokens { found: String, offset: usize },

    #[error("{function}() takes {expected} argument(s), got {found}")]
    ArgumentCount {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("round() digit count must be a whole number from 0 to 28, got {0}")]
    InvalidDigits(Decimal),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("expression is empty")]
    Empty,
}

/// Evaluate `expression` against a flat mapping of variable name to value.
pub fn evaluate(expression: &str, inputs: &HashMap<String, Decimal>) -> Result<Decimal, ExprError> {
    let tokens = lexer::tokenize(expression)?;
    let tokens = lexer::substitute_variables(tokens, inputs)?;
    let tree = parser::parse(&tokens)?;
    let value = eval::eval(&tree)?;

    tracing::debug!(expression, %value, "Evaluated expression");
    Ok(value)
}

/// Check that `expression` is well formed, treating every variable as zero.
///
/// Returns the variable names referenced, in first-use order.
pub fn validate_syntax(expression: &str) -> Result<Vec<String>, ExprError> {
    let tokens = lexer::tokenize(expression)?;

    let mut names: Vec<String> = Vec::new();
    for spanned in &tokens {
        if let lexer::Token::Ident(name) = &spanned.token {
            let is_keyword = lexer::KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k));
            if !is_keyword && !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    let placeholders: HashMap<String, Decimal> =
        names.iter().map(|n| (n.clone(), Decimal::ZERO)).collect();
    parser::parse(&lexer::substitute_variables(tokens, &placeholders)?)?;

    Ok(names)
}
