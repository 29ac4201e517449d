//! Tree-walking evaluation of parsed expressions.

use std::cmp::Ordering;

use conduit_util::{is_truthy, render_plain};
use serde_json::{Number, Value};

use super::functions::type_name;
use super::parser::{BinaryOp, Expr, Root, UnaryOp};
use super::{ExpressionContext, ExpressionRuntimeError};

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

pub(crate) fn evaluate(expr: &Expr, context: &ExpressionContext) -> Result<Value, ExpressionRuntimeError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Root(root) => Ok(context.root(*root).clone()),
        Expr::Member(target, name) => Ok(member(evaluate(target, context)?, name)),
        Expr::Index(target, index) => {
            let target = evaluate(target, context)?;
            let index = evaluate(index, context)?;
            Ok(lookup_index(target, &index))
        }
        Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!is_truthy(&evaluate(operand, context)?))),
        Expr::Unary(UnaryOp::Negate, operand) => negate(evaluate(operand, context)?),
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, context)?;
            let right = evaluate(right, context)?;
            binary(*op, left, right)
        }
        Expr::And(left, right) => {
            let left = evaluate(left, context)?;
            if !is_truthy(&left) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, context)?)))
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, context)?;
            if is_truthy(&left) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&evaluate(right, context)?)))
        }
        Expr::Coalesce(left, right) => match evaluate(left, context)? {
            Value::Null => evaluate(right, context),
            value => Ok(value),
        },
        Expr::Conditional(condition, then, otherwise) => {
            if is_truthy(&evaluate(condition, context)?) {
                evaluate(then, context)
            } else {
                evaluate(otherwise, context)
            }
        }
        Expr::Call(function, args) => {
            let values = args
                .iter()
                .map(|arg| evaluate(arg, context))
                .collect::<Result<Vec<_>, _>>()?;
            function.call(values)
        }
    }
}

fn member(target: Value, name: &str) -> Value {
    match target {
        Value::Object(mut map) => map.remove(name).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn lookup_index(target: Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(mut items), Value::Number(number)) => number
            .as_u64()
            .and_then(|position| usize::try_from(position).ok())
            .filter(|position| *position < items.len())
            .map(|position| items.swap_remove(position))
            .unwrap_or(Value::Null),
        (Value::Object(mut map), Value::String(key)) => map.remove(key).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn negate(value: Value) -> Result<Value, ExpressionRuntimeError> {
    match &value {
        Value::Null => Ok(Value::Null),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => integer
                .checked_neg()
                .map(Value::from)
                .ok_or(ExpressionRuntimeError::Overflow { op: "-" }),
            None => number_value(-number.as_f64().unwrap_or_default()),
        },
        other => Err(ExpressionRuntimeError::UnaryType {
            op: "-",
            operand: type_name(other),
        }),
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExpressionRuntimeError> {
    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = compare(op, &left, &right)?;
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessEqual => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::Add if left.is_string() || right.is_string() => {
            Ok(Value::String(render_plain(&left) + &render_plain(&right)))
        }
        _ => arithmetic(op, &left, &right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionRuntimeError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let (Value::Number(lhs), Value::Number(rhs)) = (left, right) else {
        return Err(ExpressionRuntimeError::BinaryType {
            op: op.symbol(),
            left: type_name(left),
            right: type_name(right),
        });
    };

    if op != BinaryOp::Divide
        && let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64())
    {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Subtract => a.checked_sub(b),
            BinaryOp::Multiply => a.checked_mul(b),
            _ => {
                if b == 0 {
                    return Err(ExpressionRuntimeError::DivisionByZero);
                }
                a.checked_rem(b)
            }
        };
        return result
            .map(Value::from)
            .ok_or(ExpressionRuntimeError::Overflow { op: op.symbol() });
    }

    let a = lhs.as_f64().unwrap_or_default();
    let b = rhs.as_f64().unwrap_or_default();
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide | BinaryOp::Remainder if b == 0.0 => return Err(ExpressionRuntimeError::DivisionByZero),
        BinaryOp::Divide => a / b,
        _ => a % b,
    };
    number_value(result)
}

/// Converts an arithmetic result to JSON, failing on NaN or infinity.
pub(crate) fn number_value(result: f64) -> Result<Value, ExpressionRuntimeError> {
    normalize_float(result).ok_or(ExpressionRuntimeError::NonFinite)
}

/// Finite integral floats become JSON integers so `2.5 * 100` renders as `250`.
pub(crate) fn normalize_float(result: f64) -> Option<Value> {
    if !result.is_finite() {
        return None;
    }
    if result.fract() == 0.0 && result.abs() < MAX_EXACT_FLOAT_INTEGER {
        // `-0.0` normalizes to `0` here as well.
        return Some(Value::from(result as i64));
    }
    Number::from_f64(result).map(Value::Number)
}

/// Deep JSON equality where `1` and `1.0` compare equal.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y)),
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, value)| b.get(key).is_some_and(|other| values_equal(value, other)))
        }
        _ => left == right,
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, ExpressionRuntimeError> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b)),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ordering.ok_or(ExpressionRuntimeError::BinaryType {
        op: op.symbol(),
        left: type_name(left),
        right: type_name(right),
    })
}

impl ExpressionContext {
    fn root(&self, root: Root) -> &Value {
        match root {
            Root::Model => &self.model,
            Root::Config => &self.config,
            Root::Response => self.response.as_ref().unwrap_or(&Value::Null),
        }
    }
}
