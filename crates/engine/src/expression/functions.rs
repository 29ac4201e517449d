//! The fixed registry of named expression functions.
//!
//! Names and arities are checked when an expression is parsed; evaluation
//! only sees argument values. Every function is pure: there is no clock
//! function, so a replayed dispatch computes the same payload.

use conduit_util::crypto::{base64_encode, hmac_sha256_hex, sha256_hex};
use conduit_util::date_handling::{format_timestamp, parse_timestamp};
use conduit_util::{canonical_json, render_plain};
use serde_json::Value;

use super::ExpressionRuntimeError;
use super::eval::{normalize_float, number_value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Upper,
    Lower,
    Trim,
    Substring,
    Replace,
    Length,
    Concat,
    Coalesce,
    Round,
    Floor,
    Ceil,
    Abs,
    Scale,
    ToNumber,
    ToString,
    DateFormat,
    Sha256,
    HmacSha256,
    Base64Encode,
    JsonEncode,
}

const REGISTRY: &[(&str, Function)] = &[
    ("upper", Function::Upper),
    ("lower", Function::Lower),
    ("trim", Function::Trim),
    ("substring", Function::Substring),
    ("replace", Function::Replace),
    ("length", Function::Length),
    ("concat", Function::Concat),
    ("coalesce", Function::Coalesce),
    ("round", Function::Round),
    ("floor", Function::Floor),
    ("ceil", Function::Ceil),
    ("abs", Function::Abs),
    ("scale", Function::Scale),
    ("to_number", Function::ToNumber),
    ("to_string", Function::ToString),
    ("date_format", Function::DateFormat),
    ("sha256", Function::Sha256),
    ("hmac_sha256", Function::HmacSha256),
    ("base64_encode", Function::Base64Encode),
    ("json_encode", Function::JsonEncode),
];

impl Function {
    pub fn lookup(name: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, function)| *function)
    }

    pub fn name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, function)| *function == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown")
    }

    /// Minimum and optional maximum argument count.
    pub fn arity(self) -> (usize, Option<usize>) {
        match self {
            Function::Upper
            | Function::Lower
            | Function::Trim
            | Function::Length
            | Function::Floor
            | Function::Ceil
            | Function::Abs
            | Function::ToNumber
            | Function::ToString
            | Function::Sha256
            | Function::Base64Encode
            | Function::JsonEncode => (1, Some(1)),
            Function::Round => (1, Some(2)),
            Function::Substring => (2, Some(3)),
            Function::Scale | Function::DateFormat | Function::HmacSha256 => (2, Some(2)),
            Function::Replace => (3, Some(3)),
            Function::Concat | Function::Coalesce => (1, None),
        }
    }

    pub(crate) fn call(self, args: Vec<Value>) -> Result<Value, ExpressionRuntimeError> {
        let name = self.name();
        let arg = |index: usize| args.get(index).unwrap_or(&Value::Null);
        match self {
            Function::Upper => map_text(name, arg(0), |text| text.to_uppercase()),
            Function::Lower => map_text(name, arg(0), |text| text.to_lowercase()),
            Function::Trim => map_text(name, arg(0), |text| text.trim().to_string()),
            Function::Substring => substring(name, arg(0), arg(1), args.get(2)),
            Function::Replace => {
                if arg(0).is_null() {
                    return Ok(Value::Null);
                }
                let text = scalar_text(name, arg(0))?;
                let from = scalar_text(name, arg(1))?;
                if from.is_empty() {
                    return Ok(Value::String(text));
                }
                Ok(Value::String(text.replace(&from, &scalar_text(name, arg(2))?)))
            }
            Function::Length => match arg(0) {
                Value::Null => Ok(Value::from(0)),
                Value::String(text) => Ok(Value::from(text.chars().count())),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                other => Err(type_error(name, "a string, array or object", other)),
            },
            Function::Concat => Ok(Value::String(args.iter().map(render_plain).collect())),
            Function::Coalesce => Ok(args.iter().find(|value| !value.is_null()).cloned().unwrap_or(Value::Null)),
            Function::Round => {
                let Some(number) = optional_number(name, arg(0))? else {
                    return Ok(Value::Null);
                };
                let digits = match args.get(1) {
                    Some(value) => integer_arg(name, value)?,
                    None => 0,
                };
                let factor = 10f64.powi(digits as i32);
                finite(name, (number * factor).round() / factor)
            }
            Function::Floor => unary_number(name, arg(0), f64::floor),
            Function::Ceil => unary_number(name, arg(0), f64::ceil),
            Function::Abs => absolute(name, arg(0)),
            Function::Scale => {
                let Some(number) = optional_number(name, arg(0))? else {
                    return Ok(Value::Null);
                };
                let exponent = integer_arg(name, arg(1))?;
                let factor = 10f64.powi(exponent.unsigned_abs() as i32);
                let scaled = if exponent >= 0 { number * factor } else { number / factor };
                finite(name, scaled)
            }
            Function::ToNumber => to_number(name, arg(0)),
            Function::ToString => match arg(0) {
                Value::Null => Ok(Value::Null),
                value => Ok(Value::String(render_plain(value))),
            },
            Function::DateFormat => {
                if arg(0).is_null() {
                    return Ok(Value::Null);
                }
                let timestamp = parse_timestamp(arg(0)).ok_or_else(|| ExpressionRuntimeError::Function {
                    function: name,
                    message: format!("cannot interpret {} as a date", arg(0)),
                })?;
                let pattern = scalar_text(name, arg(1))?;
                format_timestamp(&timestamp, &pattern)
                    .map(Value::String)
                    .ok_or_else(|| ExpressionRuntimeError::Function {
                        function: name,
                        message: format!("invalid date pattern '{pattern}'"),
                    })
            }
            Function::Sha256 => Ok(Value::String(sha256_hex(&scalar_text(name, arg(0))?))),
            Function::HmacSha256 => {
                if arg(1).is_null() {
                    return Err(ExpressionRuntimeError::Function {
                        function: name,
                        message: "signing key is null".to_string(),
                    });
                }
                let payload = scalar_text(name, arg(0))?;
                let key = scalar_text(name, arg(1))?;
                Ok(Value::String(hmac_sha256_hex(&payload, &key)))
            }
            Function::Base64Encode => Ok(Value::String(base64_encode(&scalar_text(name, arg(0))?))),
            Function::JsonEncode => Ok(Value::String(canonical_json(arg(0)))),
        }
    }
}

fn type_error(function: &'static str, expected: &str, found: &Value) -> ExpressionRuntimeError {
    ExpressionRuntimeError::Function {
        function,
        message: format!("expected {expected}, got {}", type_name(found)),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strings verbatim, other scalars as JSON text, null as empty.
fn scalar_text(function: &'static str, value: &Value) -> Result<String, ExpressionRuntimeError> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(type_error(function, "a scalar", value)),
        other => Ok(render_plain(other)),
    }
}

fn map_text(function: &'static str, value: &Value, op: impl Fn(&str) -> String) -> Result<Value, ExpressionRuntimeError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::String(op(&scalar_text(function, value)?)))
}

fn optional_number(function: &'static str, value: &Value) -> Result<Option<f64>, ExpressionRuntimeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => Ok(number.as_f64()),
        other => Err(type_error(function, "a number", other)),
    }
}

fn integer_arg(function: &'static str, value: &Value) -> Result<i64, ExpressionRuntimeError> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|n| n.fract() == 0.0).map(|n| n as i64))
            .filter(|n| n.abs() <= 308)
            .ok_or_else(|| ExpressionRuntimeError::Function {
                function,
                message: format!("expected a small integer, got {number}"),
            }),
        other => Err(type_error(function, "an integer", other)),
    }
}

fn unary_number(function: &'static str, value: &Value, op: fn(f64) -> f64) -> Result<Value, ExpressionRuntimeError> {
    match value {
        Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
        _ => match optional_number(function, value)? {
            Some(number) => finite(function, op(number)),
            None => Ok(Value::Null),
        },
    }
}

fn absolute(function: &'static str, value: &Value) -> Result<Value, ExpressionRuntimeError> {
    match value {
        Value::Number(number) if number.is_u64() => Ok(value.clone()),
        Value::Number(number) if number.is_i64() => number
            .as_i64()
            .and_then(i64::checked_abs)
            .map(Value::from)
            .ok_or(ExpressionRuntimeError::Overflow { op: "abs" }),
        _ => unary_number(function, value, f64::abs),
    }
}

fn finite(function: &'static str, number: f64) -> Result<Value, ExpressionRuntimeError> {
    normalize_float(number).ok_or_else(|| ExpressionRuntimeError::Function {
        function,
        message: "result is not a finite number".to_string(),
    })
}

fn substring(
    function: &'static str,
    value: &Value,
    start: &Value,
    length: Option<&Value>,
) -> Result<Value, ExpressionRuntimeError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let text = scalar_text(function, value)?;
    let start = integer_arg(function, start)?;
    if start < 0 {
        return Err(ExpressionRuntimeError::Function {
            function,
            message: format!("start index must not be negative, got {start}"),
        });
    }
    let chars = text.chars().skip(start as usize);
    let result: String = match length {
        Some(length) => {
            let length = integer_arg(function, length)?;
            if length < 0 {
                return Err(ExpressionRuntimeError::Function {
                    function,
                    message: format!("length must not be negative, got {length}"),
                });
            }
            chars.take(length as usize).collect()
        }
        None => chars.collect(),
    };
    Ok(Value::String(result))
}

fn to_number(function: &'static str, value: &Value) -> Result<Value, ExpressionRuntimeError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(flag) => Ok(Value::from(i64::from(*flag))),
        Value::String(text) => {
            let trimmed = text.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Ok(Value::from(integer));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(|number| number_value(number).ok())
                .ok_or_else(|| ExpressionRuntimeError::Function {
                    function,
                    message: format!("'{text}' is not a number"),
                })
        }
        other => Err(type_error(function, "a string, number or boolean", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Vec<Value>) -> Result<Value, ExpressionRuntimeError> {
        Function::lookup(name).expect("registered function").call(args)
    }

    #[test]
    fn text_functions() {
        assert_eq!(call("upper", vec![json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("lower", vec![json!(null)]).unwrap(), json!(null));
        assert_eq!(call("trim", vec![json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(call("substring", vec![json!("héllo"), json!(1), json!(3)]).unwrap(), json!("éll"));
        assert_eq!(call("substring", vec![json!("abc"), json!(10)]).unwrap(), json!(""));
        assert_eq!(call("replace", vec![json!("a-b-c"), json!("-"), json!("_")]).unwrap(), json!("a_b_c"));
        assert_eq!(call("length", vec![json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("concat", vec![json!("a"), json!(1), json!(null), json!(true)]).unwrap(), json!("a1true"));
        assert!(call("upper", vec![json!([1])]).is_err());
    }

    #[test]
    fn numeric_functions() {
        assert_eq!(call("round", vec![json!(2.346), json!(2)]).unwrap(), json!(2.35));
        assert_eq!(call("round", vec![json!(2.5)]).unwrap(), json!(3));
        assert_eq!(call("floor", vec![json!(-1.5)]).unwrap(), json!(-2));
        assert_eq!(call("ceil", vec![json!(1.2)]).unwrap(), json!(2));
        assert_eq!(call("abs", vec![json!(-7)]).unwrap(), json!(7));
        assert_eq!(call("scale", vec![json!(2.5), json!(2)]).unwrap(), json!(250));
        assert_eq!(call("scale", vec![json!(250), json!(-2)]).unwrap(), json!(2.5));
        assert_eq!(call("to_number", vec![json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("to_number", vec![json!("1.5")]).unwrap(), json!(1.5));
        assert!(call("to_number", vec![json!("abc")]).is_err());
        assert_eq!(call("to_string", vec![json!(12)]).unwrap(), json!("12"));
    }

    #[test]
    fn crypto_and_encoding_functions() {
        assert_eq!(
            call("sha256", vec![json!("abc")]).unwrap(),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            call("hmac_sha256", vec![json!("{\"a\":1}"), json!("k")]).unwrap(),
            json!("c3a92ff9e274cdcce27a58c15a78ec6dcbbdbd0038a87e7a11baef2028fd8bff")
        );
        assert!(call("hmac_sha256", vec![json!("x"), json!(null)]).is_err());
        assert_eq!(call("base64_encode", vec![json!("user:pass")]).unwrap(), json!("dXNlcjpwYXNz"));
        assert_eq!(call("json_encode", vec![json!({"b": 1, "a": [true]})]).unwrap(), json!(r#"{"a":[true],"b":1}"#));
    }

    #[test]
    fn date_format_accepts_common_inputs() {
        assert_eq!(
            call("date_format", vec![json!("2024-03-05T10:20:30Z"), json!("%Y/%m/%d")]).unwrap(),
            json!("2024/03/05")
        );
        assert_eq!(call("date_format", vec![json!(0), json!("%Y-%m-%d")]).unwrap(), json!("1970-01-01"));
        assert!(call("date_format", vec![json!("not a date"), json!("%Y")]).is_err());
    }

    #[test]
    fn registry_names_round_trip() {
        for (name, function) in REGISTRY {
            assert_eq!(Function::lookup(name), Some(*function));
            assert_eq!(function.name(), *name);
        }
        assert_eq!(Function::lookup("now"), None);
    }
}
