//! Evaluation of a parsed [`Expr`] with checked decimal arithmetic.

use rust_decimal::{Decimal, RoundingStrategy};

use super::parser::{BinaryOp, CompareOp, Comparison, Expr, Function};
use super::ExprError;

/// Largest scale `rust_decimal` can represent.
const MAX_ROUND_DIGITS: u32 = 28;

pub fn eval(expr: &Expr) -> Result<Decimal, ExprError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Negate(inner) => Ok(-eval(inner)?),
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs)?;
            let rhs = eval(rhs)?;
            apply_binary(*op, lhs, rhs)
        }
        Expr::Call { function, args } => call(*function, args),
        Expr::If {
            condition,
            then_branch,
            else_branch,
        } => {
            if compare(condition)? {
                eval(then_branch)
            } else {
                eval(else_branch)
            }
        }
    }
}

fn apply_binary(op: BinaryOp, lhs: Decimal, rhs: Decimal) -> Result<Decimal, ExprError> {
    let result = match op {
        BinaryOp::Add => lhs.checked_add(rhs),
        BinaryOp::Sub => lhs.checked_sub(rhs),
        BinaryOp::Mul => lhs.checked_mul(rhs),
        BinaryOp::Div => {
            if rhs.is_zero() {
                return Err(ExprError::DivisionByZero);
            }
            lhs.checked_div(rhs)
        }
    };
    result.ok_or(ExprError::Overflow)
}

fn compare(condition: &Comparison) -> Result<bool, ExprError> {
    let lhs = eval(&condition.lhs)?;
    let rhs = eval(&condition.rhs)?;
    Ok(match condition.op {
        CompareOp::Lt => lhs < rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Eq => lhs == rhs,
    })
}

fn call(function: Function, args: &[Expr]) -> Result<Decimal, ExprError> {
    let values = args.iter().map(eval).collect::<Result<Vec<_>, _>>()?;

    match function {
        Function::Min => values
            .into_iter()
            .reduce(|a, b| a.min(b))
            .ok_or(ExprError::ArgumentCount {
                function: "min",
                expected: "at least 2",
                found: 0,
            }),
        Function::Max => values
            .into_iter()
            .reduce(|a, b| a.max(b))
            .ok_or(ExprError::ArgumentCount {
                function: "max",
                expected: "at least 2",
                found: 0,
            }),
        Function::Abs => values.first().map(|v| v.abs()).ok_or(ExprError::ArgumentCount {
            function: "abs",
            expected: "exactly 1",
            found: 0,
        }),
        Function::Round => {
            let (value, digits) = match values.as_slice() {
                [value] => (*value, 0),
                [value, digits] => (*value, round_digits(*digits)?),
                _ => {
                    return Err(ExprError::ArgumentCount {
                        function: "round",
                        expected: "1 or 2",
                        found: values.len(),
                    })
                }
            };
            Ok(value.round_dp_with_strategy(digits, RoundingStrategy::MidpointAwayFromZero))
        }
    }
}

fn round_digits(digits: Decimal) -> Result<u32, ExprError> {
    if digits.is_sign_negative() || digits.fract() != Decimal::ZERO {
        return Err(ExprError::InvalidDigits(digits));
    }
    u32::try_from(digits.mantissa() / 10i128.pow(digits.scale()))
        .ok()
        .filter(|d| *d <= MAX_ROUND_DIGITS)
        .ok_or(ExprError::InvalidDigits(digits))
}
