//! Tokenizer for the formula language.
//!
//! Produces a flat token stream with byte offsets. Identifier resolution
//! (variable substitution) happens afterwards in [`substitute_variables`],
//! so keyword spelling and variable names are checked in one place.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit1},
    combinator::{map, opt, recognize},
    multi::many0_count,
    sequence::pair,
    IResult,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::ExprError;

/// Reserved words. Matched case-insensitively and never substituted.
pub const KEYWORDS: &[&str] = &["if", "then", "else", "min", "max", "round", "abs"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Lt => f.write_str("<"),
            Token::Gt => f.write_str(">"),
            Token::Le => f.write_str("<="),
            Token::Ge => f.write_str(">="),
            Token::EqEq => f.write_str("=="),
        }
    }
}

/// A token with the byte offset where it starts in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

impl Spanned {
    /// True when this token is the given keyword (case-insensitive).
    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.token, Token::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }
}

enum Lexeme<'a> {
    Number(&'a str),
    Ident(&'a str),
    Symbol(Token),
}

// ============================================================================
// Internal Parsers
// ============================================================================

fn number_literal(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(digit1, opt(pair(char('.'), digit1)))),
        recognize(pair(char('.'), digit1)),
    ))(input)
}

/// Identifiers may contain dots so flattened keys like `outputs.score` resolve.
fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_"), tag(".")))),
    ))(input)
}

fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        map(tag("<="), |_| Token::Le),
        map(tag(">="), |_| Token::Ge),
        map(tag("=="), |_| Token::EqEq),
        map(char('<'), |_| Token::Lt),
        map(char('>'), |_| Token::Gt),
        map(char('+'), |_| Token::Plus),
        map(char('-'), |_| Token::Minus),
        map(char('*'), |_| Token::Star),
        map(char('/'), |_| Token::Slash),
        map(char('('), |_| Token::LParen),
        map(char(')'), |_| Token::RParen),
        map(char(','), |_| Token::Comma),
    ))(input)
}

fn lexeme(input: &str) -> IResult<&str, Lexeme<'_>> {
    alt((
        map(number_literal, Lexeme::Number),
        map(identifier, Lexeme::Ident),
        map(symbol, Lexeme::Symbol),
    ))(input)
}

// ============================================================================
// Public API
// ============================================================================

/// Split an expression into tokens.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut rest = source.trim_start();

    while !rest.is_empty() {
        let offset = source.len() - rest.len();
        let (remaining, lexeme) = lexeme(rest).map_err(|_| ExprError::InvalidCharacter {
            ch: rest.chars().next().unwrap_or(' '),
            offset,
        })?;

        let token = match lexeme {
            Lexeme::Number(text) => {
                Token::Number(
                    Decimal::from_str(text).map_err(|_| ExprError::InvalidNumber {
                        literal: text.to_string(),
                        offset,
                    })?,
                )
            }
            Lexeme::Ident(text) => Token::Ident(text.to_string()),
            Lexeme::Symbol(token) => token,
        };

        tokens.push(Spanned { token, offset });
        rest = remaining.trim_start();
    }

    Ok(tokens)
}

/// Replace every non-keyword identifier with its numeric value.
///
/// Fails on the first identifier (in source order) missing from `inputs`,
/// including identifiers inside branches that would never be evaluated.
pub fn substitute_variables(
    tokens: Vec<Spanned>,
    inputs: &HashMap<String, Decimal>,
) -> Result<Vec<Spanned>, ExprError> {
    tokens
        .into_iter()
        .map(|spanned| match spanned.token {
            Token::Ident(ref name)
                if !KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k)) =>
            {
                let value = inputs
                    .get(name)
                    .copied()
                    .ok_or_else(|| ExprError::UnknownVariable(name.clone()))?;
                Ok(Spanned {
                    token: Token::Number(value),
                    offset: spanned.offset,
                })
            }
            _ => Ok(spanned),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_operators_prefer_two_character_forms() {
        assert_eq!(
            kinds("a <= b >= c == d < e > f"),
            vec![
                Token::Ident("a".into()),
                Token::Le,
                Token::Ident("b".into()),
                Token::Ge,
                Token::Ident("c".into()),
                Token::EqEq,
                Token::Ident("d".into()),
                Token::Lt,
                Token::Ident("e".into()),
                Token::Gt,
                Token::Ident("f".into()),
            ]
        );
    }

    #[test]
    fn test_numbers_keep_decimal_scale() {
        let tokens = kinds("12.50 + .5");
        assert_eq!(tokens[0], Token::Number(Decimal::new(1250, 2)));
        assert_eq!(tokens[2], Token::Number(Decimal::new(5, 1)));
    }

    #[test]
    fn test_offsets_track_source_position() {
        let tokens = tokenize("  1 +  x").unwrap();
        assert_eq!(tokens[0].offset, 2);
        assert_eq!(tokens[1].offset, 4);
        assert_eq!(tokens[2].offset, 7);
    }

    #[test]
    fn test_dotted_identifier() {
        assert_eq!(kinds("outputs.score_1"), vec![Token::Ident("outputs.score_1".into())]);
    }

    #[test]
    fn test_single_equals_is_rejected() {
        let err = tokenize("a = 1").unwrap_err();
        assert_eq!(err, ExprError::InvalidCharacter { ch: '=', offset: 2 });
    }

    #[test]
    fn test_substitution_skips_keywords() {
        let mut inputs = HashMap::new();
        inputs.insert("income".to_string(), Decimal::new(100, 0));

        let tokens = substitute_variables(tokenize("MAX(income, 5)").unwrap(), &inputs).unwrap();
        assert!(tokens[0].is_keyword("max"));
        assert_eq!(tokens[2].token, Token::Number(Decimal::new(100, 0)));
    }

    #[test]
    fn test_substitution_reports_unknown_variable() {
        let err = substitute_variables(tokenize("a + b").unwrap(), &HashMap::new()).unwrap_err();
        assert_eq!(err, ExprError::UnknownVariable("a".into()));
    }
}
