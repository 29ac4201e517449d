//! # Mapping Resolver
//!
//! Turns a compiled [`MappingDocument`] into an outgoing payload, request
//! headers and endpoint path, and extracts a normalized object from the vendor
//! response.
//!
//! Field rules run in declared order. Each writes its value at a target path:
//!
//! - `a.b` creates nested objects
//! - `items[0].sku` creates arrays, padding with `null` up to the index
//! - `tags[]` appends to an array
//!
//! A required rule that yields null, a blank string or an empty collection
//! stops resolution before anything is sent.

use std::fmt;

use conduit_types::{ExtractionRule, FieldRule, HeaderRule, MAX_TARGET_INDEX, MappingDocument};
use conduit_util::path_template::{PathTemplateError, placeholders, render_path};
use conduit_util::{has_meaningful_value, render_plain};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::CatalogError;
use crate::expression::{Expression, ExpressionContext, ExpressionRuntimeError, Root};

pub const REQUIRED_VALUE_MISSING: &str = "required value missing";
pub const PATH_CONFLICT: &str = "path conflict";
pub const PATH_PARAMETER_MISSING: &str = "path parameter missing";

/// A rule failed to produce a usable value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("mapping failed for '{field}': {reason}")]
pub struct MappingError {
    pub field: String,
    pub reason: String,
}

impl MappingError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Everything that can stop payload, header or path resolution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("expression for '{field}' failed: {source}")]
    Expression {
        field: String,
        #[source]
        source: ExpressionRuntimeError,
    },
}

impl ResolveError {
    pub fn field(&self) -> &str {
        match self {
            ResolveError::Mapping(error) => &error.field,
            ResolveError::Expression { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    Append,
}

/// Parsed target path such as `customer.tags[]` or `items[0].sku`.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetPath {
    source: String,
    segments: Vec<PathSegment>,
}

impl TargetPath {
    pub fn parse(source: &str) -> Result<Self, String> {
        let source = source.trim();
        if source.is_empty() {
            return Err("target path cannot be empty".to_string());
        }
        let mut segments = Vec::new();
        for part in source.split('.') {
            let (key, mut brackets) = match part.find('[') {
                Some(index) => part.split_at(index),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(format!("empty segment in '{source}'"));
            }
            if key.contains(']') {
                return Err(format!("unexpected ']' in '{source}'"));
            }
            segments.push(PathSegment::Key(key.to_string()));
            while !brackets.is_empty() {
                let Some(rest) = brackets.strip_prefix('[') else {
                    return Err(format!("unexpected text after index in '{source}'"));
                };
                let Some(end) = rest.find(']') else {
                    return Err(format!("unclosed '[' in '{source}'"));
                };
                let index = rest[..end].trim();
                if index.is_empty() {
                    segments.push(PathSegment::Append);
                } else {
                    if !index.chars().all(|ch| ch.is_ascii_digit()) {
                        return Err(format!("index '{index}' in '{source}' is not a non-negative integer"));
                    }
                    let position = index
                        .parse::<usize>()
                        .ok()
                        .filter(|position| *position <= MAX_TARGET_INDEX)
                        .ok_or_else(|| format!("index '{index}' in '{source}' exceeds {MAX_TARGET_INDEX}"))?;
                    segments.push(PathSegment::Index(position));
                }
                brackets = &rest[end + 1..];
            }
        }
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Writes `value` at this path inside `root`, creating containers as needed.
    ///
    /// Fails when an existing non-null value is in the way: a scalar where a
    /// container is needed, or a value already present at the final segment.
    pub fn write(&self, root: &mut Value, value: Value) -> Result<(), MappingError> {
        let conflict = || MappingError::new(&self.source, PATH_CONFLICT);
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => {
                    if current.is_null() {
                        *current = Value::Object(Map::new());
                    }
                    let Value::Object(map) = current else {
                        return Err(conflict());
                    };
                    map.entry(key.clone()).or_insert(Value::Null)
                }
                PathSegment::Index(index) => {
                    if current.is_null() {
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(items) = current else {
                        return Err(conflict());
                    };
                    if items.len() <= *index {
                        items.resize(index + 1, Value::Null);
                    }
                    &mut items[*index]
                }
                PathSegment::Append => {
                    if current.is_null() {
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(items) = current else {
                        return Err(conflict());
                    };
                    items.push(Value::Null);
                    let last = items.len() - 1;
                    &mut items[last]
                }
            };
        }
        if !current.is_null() {
            return Err(conflict());
        }
        *current = value;
        Ok(())
    }
}

impl fmt::Debug for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TargetPath").field(&self.source).finish()
    }
}

impl fmt::Display for TargetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledFieldRule {
    pub target: TargetPath,
    pub expression: Expression,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum HeaderSource {
    Static(String),
    Expression(Expression),
}

#[derive(Debug, Clone)]
pub struct CompiledHeaderRule {
    pub name: String,
    pub source: HeaderSource,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub struct CompiledExtractionRule {
    pub target: TargetPath,
    pub expression: Expression,
}

/// Endpoint path with one compiled expression per `{placeholder}`.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    template: String,
    params: Vec<(String, Expression)>,
}

impl PathTemplate {
    /// `{name}` reads `model.name`; anything containing `.` or `[`, or starting
    /// with a namespace, is parsed as a full expression.
    pub fn compile(template: &str, location: &str) -> Result<Self, CatalogError> {
        let names = placeholders(template).map_err(|error| CatalogError::Path {
            location: location.to_string(),
            source: error,
        })?;
        let mut params = Vec::with_capacity(names.len());
        for name in names {
            let source = if name.contains(['.', '[']) || ["model", "config"].contains(&name.as_str()) {
                name.clone()
            } else {
                format!("model.{name}")
            };
            let expression = compile_expression(&source, &format!("{location} path.{name}"), false)?;
            params.push((name, expression));
        }
        Ok(Self {
            template: template.to_string(),
            params,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn render(&self, context: &ExpressionContext) -> Result<String, ResolveError> {
        let mut values = IndexMap::with_capacity(self.params.len());
        for (name, expression) in &self.params {
            let field = format!("path.{name}");
            let value = expression
                .evaluate(context)
                .map_err(|source| ResolveError::Expression {
                    field: field.clone(),
                    source,
                })?;
            if !has_meaningful_value(&value) || value.is_array() || value.is_object() {
                return Err(MappingError::new(field, PATH_PARAMETER_MISSING).into());
            }
            values.insert(name.clone(), value);
        }
        render_path(&self.template, &values).map_err(|error| match error {
            PathTemplateError::Missing { name } => MappingError::new(format!("path.{name}"), PATH_PARAMETER_MISSING).into(),
            other => MappingError::new("path", other.to_string()).into(),
        })
    }
}

/// Compiled form of one endpoint's mapping document.
#[derive(Debug, Clone, Default)]
pub struct CompiledMapping {
    pub fields: Vec<CompiledFieldRule>,
    pub headers: Vec<CompiledHeaderRule>,
    pub signature_formula: Option<Expression>,
    pub response: Vec<CompiledExtractionRule>,
}

impl CompiledMapping {
    pub fn compile(document: &MappingDocument, location: &str) -> Result<Self, CatalogError> {
        let fields = document
            .fields
            .iter()
            .map(|rule| compile_field_rule(rule, location))
            .collect::<Result<Vec<_>, _>>()?;
        let headers = document
            .headers
            .iter()
            .map(|rule| compile_header_rule(rule, location))
            .collect::<Result<Vec<_>, _>>()?;
        let signature_formula = document
            .signature_formula
            .as_deref()
            .filter(|formula| !formula.trim().is_empty())
            .map(|formula| compile_expression(formula, &format!("{location} signature_formula"), false))
            .transpose()?;
        let response = document
            .response
            .iter()
            .map(|rule| compile_extraction_rule(rule, location))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            fields,
            headers,
            signature_formula,
            response,
        })
    }

    /// Builds the outgoing payload. A mapping without field rules has no payload.
    pub fn build_payload(&self, context: &ExpressionContext) -> Result<Option<Value>, ResolveError> {
        if self.fields.is_empty() {
            return Ok(None);
        }
        let mut payload = Value::Object(Map::new());
        for rule in &self.fields {
            let field = rule.target.as_str();
            let value = rule
                .expression
                .evaluate(context)
                .map_err(|source| ResolveError::Expression {
                    field: field.to_string(),
                    source,
                })?;
            if rule.required && !has_meaningful_value(&value) {
                return Err(MappingError::new(field, REQUIRED_VALUE_MISSING).into());
            }
            rule.target.write(&mut payload, value)?;
        }
        debug!(fields = self.fields.len(), "built payload");
        Ok(Some(payload))
    }

    /// Resolves header rules. Non-required headers that evaluate to null are omitted.
    pub fn build_headers(&self, context: &ExpressionContext) -> Result<IndexMap<String, String>, ResolveError> {
        let mut headers = IndexMap::with_capacity(self.headers.len());
        for rule in &self.headers {
            let field = format!("headers.{}", rule.name);
            let value = match &rule.source {
                HeaderSource::Static(value) => Value::String(value.clone()),
                HeaderSource::Expression(expression) => expression
                    .evaluate(context)
                    .map_err(|source| ResolveError::Expression {
                        field: field.clone(),
                        source,
                    })?,
            };
            if !has_meaningful_value(&value) {
                if rule.required {
                    return Err(MappingError::new(field, REQUIRED_VALUE_MISSING).into());
                }
                continue;
            }
            headers.insert(rule.name.clone(), render_plain(&value));
        }
        Ok(headers)
    }

    /// Runs the extraction rules against `response.*`. Returns `None` when the
    /// mapping has no extraction rules. A rule that fails leaves `null` at its
    /// target.
    pub fn extract_response(&self, context: &ExpressionContext) -> Option<Value> {
        if self.response.is_empty() {
            return None;
        }
        let mut normalized = Value::Object(Map::new());
        for rule in &self.response {
            let value = rule.expression.evaluate(context).unwrap_or_else(|error| {
                warn!(target_path = %rule.target, error = %error, "response extraction failed");
                Value::Null
            });
            if let Err(error) = rule.target.write(&mut normalized, value) {
                warn!(target_path = %rule.target, error = %error, "response extraction could not be written");
            }
        }
        Some(normalized)
    }
}

/// Parses an expression for a catalog location. Outside response extraction
/// the `response` namespace does not exist yet.
pub(crate) fn compile_expression(source: &str, location: &str, allow_response: bool) -> Result<Expression, CatalogError> {
    let expression = Expression::parse(source).map_err(|error| CatalogError::Expression {
        location: location.to_string(),
        source: error,
    })?;
    if !allow_response && expression.references(Root::Response) {
        return Err(CatalogError::ResponseOutsideExtraction {
            location: location.to_string(),
        });
    }
    Ok(expression)
}

fn compile_target(target: &str, location: &str) -> Result<TargetPath, CatalogError> {
    TargetPath::parse(target).map_err(|reason| CatalogError::TargetPath {
        location: location.to_string(),
        target: target.to_string(),
        reason,
    })
}

fn compile_field_rule(rule: &FieldRule, location: &str) -> Result<CompiledFieldRule, CatalogError> {
    let rule_location = format!("{location} fields.{}", rule.target_path);
    Ok(CompiledFieldRule {
        target: compile_target(&rule.target_path, &rule_location)?,
        expression: compile_expression(&rule.source_expression, &rule_location, false)?,
        required: rule.required,
    })
}

fn compile_header_rule(rule: &HeaderRule, location: &str) -> Result<CompiledHeaderRule, CatalogError> {
    let rule_location = format!("{location} headers.{}", rule.name);
    let source = match (&rule.value, &rule.expression) {
        (Some(value), None) => HeaderSource::Static(value.clone()),
        (None, Some(expression)) => HeaderSource::Expression(compile_expression(expression, &rule_location, false)?),
        _ => {
            return Err(CatalogError::Invalid {
                location: rule_location,
                reason: "header rule needs exactly one of value or expression".to_string(),
            });
        }
    };
    Ok(CompiledHeaderRule {
        name: rule.name.clone(),
        source,
        required: rule.required,
    })
}

fn compile_extraction_rule(rule: &ExtractionRule, location: &str) -> Result<CompiledExtractionRule, CatalogError> {
    let rule_location = format!("{location} response.{}", rule.target_path);
    Ok(CompiledExtractionRule {
        target: compile_target(&rule.target_path, &rule_location)?,
        expression: compile_expression(&rule.source_expression, &rule_location, true)?,
    })
}
