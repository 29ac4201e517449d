//! # Expression Evaluator
//!
//! Mapping rules, header rules, path placeholders and signature formulas are
//! written in a small expression language evaluated against three namespaces:
//!
//! - `model.*`: the caller-supplied internal payload
//! - `config.*`: provider and endpoint configuration, including resolved credentials
//! - `response.*`: the vendor response, only while running extraction rules
//!
//! ```rust
//! use conduit_engine::expression::{Expression, ExpressionContext};
//! use serde_json::json;
//!
//! let expression = Expression::parse("${{ upper(model.currency) + ':' + model.amount * 100 }}").unwrap();
//! let context = ExpressionContext::new(json!({"currency": "usd", "amount": 2.5}), json!({}));
//! assert_eq!(expression.evaluate(&context).unwrap(), json!("USD:250"));
//! ```
//!
//! Reading a path that does not exist yields `null`; evaluation fails only on
//! type errors, division by zero, overflow and function argument errors.
//! Syntax, unknown roots, unknown functions and wrong arities are rejected
//! when the expression is parsed, which happens once when a catalog is
//! compiled.

mod eval;
mod functions;
mod lexer;
mod parser;

use std::fmt;

use serde_json::Value;
use thiserror::Error;

pub use functions::Function;
pub use parser::Root;

/// Variable scope for one dispatch attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionContext {
    pub model: Value,
    pub config: Value,
    /// Present only while evaluating response extraction rules.
    pub response: Option<Value>,
}

impl ExpressionContext {
    pub fn new(model: Value, config: Value) -> Self {
        Self {
            model,
            config,
            response: None,
        }
    }

    pub fn with_response(mut self, response: Value) -> Self {
        self.response = Some(response);
        self
    }
}

/// A parsed, validated expression ready for repeated evaluation.
#[derive(Clone, PartialEq)]
pub struct Expression {
    source: String,
    tree: parser::Expr,
}

impl Expression {
    /// Parses `source`, accepting an optional `${{ ... }}` wrapper.
    pub fn parse(source: &str) -> Result<Self, ExpressionSyntaxError> {
        let normalized = normalize_expression(source);
        if normalized.is_empty() {
            return Err(ExpressionSyntaxError::new(source, 0, "expression cannot be empty"));
        }
        let tree = parser::parse(&normalized)?;
        Ok(Self {
            source: normalized,
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, context: &ExpressionContext) -> Result<Value, ExpressionRuntimeError> {
        eval::evaluate(&self.tree, context)
    }

    /// Whether any part of the expression reads from `root`.
    pub fn references(&self, root: Root) -> bool {
        let mut roots = Vec::new();
        self.tree.roots(&mut roots);
        roots.contains(&root)
    }
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parses and evaluates in one step.
pub fn evaluate(expression: &str, context: &ExpressionContext) -> Result<Value, ExpressionError> {
    Ok(Expression::parse(expression)?.evaluate(context)?)
}

/// Trims whitespace and strips an outer `${{ ... }}` wrapper when present.
pub fn normalize_expression(raw_expression: &str) -> String {
    let trimmed = raw_expression.trim();
    if let Some(stripped) = trimmed.strip_prefix("${{") {
        let inner = stripped.trim();
        let inner = inner.strip_suffix("}}").unwrap_or(inner);
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Malformed expression text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("syntax error at offset {offset} in '{expression}': {message}")]
pub struct ExpressionSyntaxError {
    pub expression: String,
    /// Byte offset into the normalized expression.
    pub offset: usize,
    pub message: String,
}

impl ExpressionSyntaxError {
    pub(crate) fn new(expression: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// Failure while evaluating a well-formed expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionRuntimeError {
    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    BinaryType {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("operator '{op}' cannot be applied to {operand}")]
    UnaryType { op: &'static str, operand: &'static str },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{op}'")]
    Overflow { op: &'static str },

    #[error("arithmetic produced a non-finite number")]
    NonFinite,

    #[error("{function}(): {message}")]
    Function { function: &'static str, message: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    #[error(transparent)]
    Syntax(#[from] ExpressionSyntaxError),

    #[error(transparent)]
    Runtime(#[from] ExpressionRuntimeError),
}
