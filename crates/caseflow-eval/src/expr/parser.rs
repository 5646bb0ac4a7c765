//! Recursive-descent parser producing an [`Expr`] tree.
//!
//! Grammar:
//!
//! ```text
//! Expression := Term (('+' | '-') Term)*
//! Term       := Unary (('*' | '/') Unary)*
//! Unary      := ('-' | '+') Unary | Primary
//! Primary    := number
//!             | '(' Expression ')'
//!             | 'if' '(' Expression CmpOp Expression ')' 'then' '(' Expression ')' 'else' '(' Expression ')'
//!             | ('min' | 'max' | 'round' | 'abs') '(' Expression (',' Expression)* ')'
//! CmpOp      := '<' | '>' | '<=' | '>=' | '=='
//! ```
//!
//! The tree is built completely before evaluation so that `if` only evaluates
//! the branch it selects, while syntax errors in either branch still surface.

use rust_decimal::Decimal;

use super::lexer::{Spanned, Token};
use super::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
}

impl CompareOp {
    fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::Lt => Some(Self::Lt),
            Token::Gt => Some(Self::Gt),
            Token::Le => Some(Self::Le),
            Token::Ge => Some(Self::Ge),
            Token::EqEq => Some(Self::Eq),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Min,
    Max,
    Round,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "round" => Some(Self::Round),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Round => "round",
            Self::Abs => "abs",
        }
    }

    /// Check the argument count at parse time.
    fn check_arity(self, found: usize) -> Result<(), ExprError> {
        let (ok, expected) = match self {
            Self::Min | Self::Max => (found >= 2, "at least 2"),
            Self::Round => ((1..=2).contains(&found), "1 or 2"),
            Self::Abs => (found == 1, "exactly 1"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExprError::ArgumentCount {
                function: self.name(),
                expected,
                found,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub op: CompareOp,
    pub lhs: Expr,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Number(Decimal),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    If {
        condition: Box<Comparison>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
}

/// Parse a fully substituted token stream. Every token must be consumed.
pub fn parse(tokens: &[Spanned]) -> Result<Expr, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression()?;

    match parser.peek() {
        None => Ok(expr),
        Some(trailing) => Err(ExprError::TrailingTokens {
            found: trailing.token.to_string(),
            offset: trailing.offset,
        }),
    }
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Spanned> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<&'a Spanned, ExprError> {
        let spanned = self
            .tokens
            .get(self.pos)
            .ok_or(ExprError::UnexpectedEnd { expected })?;
        self.pos += 1;
        Ok(spanned)
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> Result<(), ExprError> {
        let spanned = self.next(expected)?;
        if spanned.token == token {
            Ok(())
        } else {
            Err(unexpected(spanned, expected))
        }
    }

    fn expect_keyword(&mut self, keyword: &'static str) -> Result<(), ExprError> {
        let spanned = self.next(keyword)?;
        if spanned.is_keyword(keyword) {
            Ok(())
        } else {
            Err(unexpected(spanned, keyword))
        }
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().and_then(|s| match s.token {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        }) {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().and_then(|s| match s.token {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            _ => None,
        }) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek().map(|s| &s.token) {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let spanned = self.next("a number, '(' or a function")?;

        match &spanned.token {
            Token::Number(n) => Ok(Expr::Number(*n)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) if name.eq_ignore_ascii_case("if") => self.conditional(),
            Token::Ident(name) => match Function::from_name(name) {
                Some(function) => {
                    let args = self.arguments()?;
                    function.check_arity(args.len())?;
                    Ok(Expr::Call { function, args })
                }
                None => Err(unexpected(spanned, "a number, '(' or a function")),
            },
            _ => Err(unexpected(spanned, "a number, '(' or a function")),
        }
    }

    fn conditional(&mut self) -> Result<Expr, ExprError> {
        self.expect(Token::LParen, "'(' after if")?;
        let lhs = self.expression()?;
        let op_token = self.next("a comparison operator")?;
        let op = CompareOp::from_token(&op_token.token)
            .ok_or_else(|| unexpected(op_token, "a comparison operator"))?;
        let rhs = self.expression()?;
        self.expect(Token::RParen, "')' closing the condition")?;

        self.expect_keyword("then")?;
        let then_branch = self.parenthesized()?;
        self.expect_keyword("else")?;
        let else_branch = self.parenthesized()?;

        Ok(Expr::If {
            condition: Box::new(Comparison { op, lhs, rhs }),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parenthesized(&mut self) -> Result<Expr, ExprError> {
        self.expect(Token::LParen, "'('")?;
        let inner = self.expression()?;
        self.expect(Token::RParen, "')'")?;
        Ok(inner)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        self.expect(Token::LParen, "'(' before arguments")?;
        let mut args = Vec::new();

        if matches!(self.peek().map(|s| &s.token), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(args);
        }

        loop {
            args.push(self.expression()?);
            let spanned = self.next("',' or ')'")?;
            match spanned.token {
                Token::Comma => continue,
                Token::RParen => break,
                _ => return Err(unexpected(spanned, "',' or ')'")),
            }
        }

        Ok(args)
    }
}

fn unexpected(spanned: &Spanned, expected: &'static str) -> ExprError {
    ExprError::UnexpectedToken {
        found: spanned.token.to_string(),
        expected,
        offset: spanned.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse_str(source: &str) -> Result<Expr, ExprError> {
        parse(&tokenize(source)?)
    }

    fn num(n: i64) -> Expr {
        Expr::Number(Decimal::from(n))
    }

    #[test]
    fn test_precedence_multiplication_binds_tighter() {
        let expr = parse_str("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(num(1)),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    lhs: Box::new(num(2)),
                    rhs: Box::new(num(3)),
                }),
            }
        );
    }

    #[test]
    fn test_subtraction_is_left_associative() {
        let expr = parse_str("10 - 4 - 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            } => {
                assert_eq!(*rhs, num(3));
                assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Sub, .. }));
            }
            other => panic!("Expected subtraction, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_unary() {
        assert_eq!(
            parse_str("--2").unwrap(),
            Expr::Negate(Box::new(Expr::Negate(Box::new(num(2)))))
        );
        assert_eq!(parse_str("+2").unwrap(), num(2));
    }

    #[test]
    fn test_if_form() {
        let expr = parse_str("if(5 > 3) then(10) else(20)").unwrap();
        match expr {
            Expr::If { condition, .. } => assert_eq!(condition.op, CompareOp::Gt),
            other => panic!("Expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_if_requires_comparison() {
        let err = parse_str("if(5) then(1) else(2)").unwrap_err();
        assert!(matches!(err, ExprError::UnexpectedToken { expected: "a comparison operator", .. }));
    }

    #[test]
    fn test_if_requires_else() {
        let err = parse_str("if(1 < 2) then(1)").unwrap_err();
        assert_eq!(err, ExprError::UnexpectedEnd { expected: "else" });
    }

    #[test]
    fn test_missing_closing_paren() {
        let err = parse_str("(1 + 2").unwrap_err();
        assert_eq!(err, ExprError::UnexpectedEnd { expected: "')'" });
    }

    #[test]
    fn test_trailing_tokens() {
        let err = parse_str("1 + 2 3").unwrap_err();
        assert_eq!(
            err,
            ExprError::TrailingTokens {
                found: "3".into(),
                offset: 6
            }
        );
    }

    #[test]
    fn test_function_arity() {
        assert!(matches!(
            parse_str("min(1)").unwrap_err(),
            ExprError::ArgumentCount { function: "min", found: 1, .. }
        ));
        assert!(matches!(
            parse_str("abs(1, 2)").unwrap_err(),
            ExprError::ArgumentCount { function: "abs", found: 2, .. }
        ));
        assert!(matches!(
            parse_str("round()").unwrap_err(),
            ExprError::ArgumentCount { function: "round", found: 0, .. }
        ));
        assert!(parse_str("max(1, 2, 3)").is_ok());
    }

    #[test]
    fn test_comparison_outside_if_is_rejected() {
        assert!(matches!(
            parse_str("1 < 2").unwrap_err(),
            ExprError::TrailingTokens { .. }
        ));
    }

    #[test]
    fn test_empty_expression() {
        assert_eq!(parse(&[]).unwrap_err(), ExprError::Empty);
    }
}
