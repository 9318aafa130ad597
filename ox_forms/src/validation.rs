//! Step validation schemas.
//!
//! A [`ValidationSchema`] is derived from a step's flattened field list and
//! the current values (conditional requiredness is decided at build time, so
//! the schema has to be rebuilt whenever those values change). It can then
//! validate a value tree, producing per-path messages.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use log::warn;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::conditions::{self, strict_equals};
use crate::error::ValidationErrors;
use crate::expr::{display_value, format_number, parse_number};
use crate::path;
use crate::schema::{Field, FieldValidation, Step};
use crate::tree::flatten_step_fields;

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid static regex"))
}

/// Base type a field's value is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseKind {
    String,
    Number,
    Date,
    Boolean,
    Array,
    Mixed,
}

impl BaseKind {
    pub fn for_field_type(field_type: &str) -> Self {
        match field_type {
            "text" | "textarea" | "select" | "radio" | "richtext" => BaseKind::String,
            "number" | "slider" => BaseKind::Number,
            "date" | "time" | "datetime" => BaseKind::Date,
            "checkbox" | "switch" => BaseKind::Boolean,
            "array" => BaseKind::Array,
            _ => BaseKind::Mixed,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BaseKind::String => "string",
            BaseKind::Number => "number",
            BaseKind::Date => "date",
            BaseKind::Boolean => "boolean",
            BaseKind::Array => "array",
            BaseKind::Mixed => "value",
        }
    }
}

/// Which `min`/`max` interpretation applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintFamily {
    Text,
    Numeric,
    Temporal,
    Collection,
}

impl ConstraintFamily {
    fn resolve(validation: &FieldValidation, field_type: &str) -> Option<Self> {
        let declared = validation.rule_type.as_deref().unwrap_or(match field_type {
            "text" | "textarea" => "string",
            "number" | "slider" => "number",
            "date" | "datetime" => "date",
            "array" => "array",
            _ => "",
        });
        match declared {
            "string" => Some(ConstraintFamily::Text),
            "number" => Some(ConstraintFamily::Numeric),
            "date" => Some(ConstraintFamily::Temporal),
            "array" => Some(ConstraintFamily::Collection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Constraint {
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Email,
    Url,
    Min(f64),
    Max(f64),
    Integer,
    Positive,
    After(NaiveDateTime),
    Before(NaiveDateTime),
    MinItems(usize),
    MaxItems(usize),
    OneOf(Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct Check {
    pub constraint: Constraint,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FieldRule {
    pub kind: BaseKind,
    pub label: String,
    pub required: bool,
    pub required_message: String,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone)]
pub enum SchemaNode {
    Object(BTreeMap<String, SchemaNode>),
    Rule(FieldRule),
}

/// Per-step validation schema, keyed by nested field path.
#[derive(Debug, Clone, Default)]
pub struct ValidationSchema {
    root: BTreeMap<String, SchemaNode>,
}

impl ValidationSchema {
    /// Places `rule` at `path`, creating intermediate object nodes and
    /// replacing any rule that stood where an object is now needed.
    pub fn insert(&mut self, path: &str, rule: FieldRule) {
        if path.is_empty() {
            return;
        }
        let mut keys: Vec<&str> = path.split('.').collect();
        let last = keys.pop().unwrap_or_default();

        let mut current = &mut self.root;
        for key in keys {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| SchemaNode::Object(BTreeMap::new()));
            if !matches!(entry, SchemaNode::Object(_)) {
                *entry = SchemaNode::Object(BTreeMap::new());
            }
            current = match entry {
                SchemaNode::Object(children) => children,
                SchemaNode::Rule(_) => return,
            };
        }
        current.insert(last.to_string(), SchemaNode::Rule(rule));
    }

    pub fn rule(&self, path: &str) -> Option<&FieldRule> {
        let mut keys = path.split('.');
        let mut node = self.root.get(keys.next()?)?;
        for key in keys {
            node = match node {
                SchemaNode::Object(children) => children.get(key)?,
                SchemaNode::Rule(_) => return None,
            };
        }
        match node {
            SchemaNode::Rule(rule) => Some(rule),
            SchemaNode::Object(_) => None,
        }
    }

    pub fn is_required(&self, path: &str) -> bool {
        self.rule(path).is_some_and(|r| r.required)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Every rule with its full dotted path, in key order.
    pub fn rules(&self) -> Vec<(String, &FieldRule)> {
        fn collect<'a>(prefix: &str, nodes: &'a BTreeMap<String, SchemaNode>, out: &mut Vec<(String, &'a FieldRule)>) {
            for (key, node) in nodes {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match node {
                    SchemaNode::Rule(rule) => out.push((path, rule)),
                    SchemaNode::Object(children) => collect(&path, children, out),
                }
            }
        }
        let mut out = Vec::new();
        collect("", &self.root, &mut out);
        out
    }

    /// Checks `values` against every rule. Each failing field reports its
    /// first failure.
    pub fn validate(&self, values: &Value) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();
        for (path, rule) in self.rules() {
            if let Err(message) = check_value(rule, path::get(values, &path)) {
                errors.push(path, message);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn required_message(field: &Field) -> String {
    field
        .validation
        .as_ref()
        .and_then(|v| v.required_message.clone())
        .unwrap_or_else(|| format!("{} is required", field.display_label()))
}

fn as_count(value: &Value) -> Option<usize> {
    let n = value.as_f64().or_else(|| value.as_str().map(parse_number))?;
    (n.is_finite() && n >= 0.0).then_some(n as usize)
}

fn as_bound(value: &Value) -> Option<f64> {
    let n = match value {
        Value::String(s) => parse_number(s),
        other => other.as_f64()?,
    };
    (!n.is_nan()).then_some(n)
}

fn bound_text(value: &Value) -> String {
    match value.as_f64() {
        Some(n) => format_number(n),
        None => display_value(value),
    }
}

fn build_checks(validation: &FieldValidation, field_type: &str) -> Vec<Check> {
    let mut checks = Vec::new();
    let message = |default: String| validation.message.clone().unwrap_or(default);

    match ConstraintFamily::resolve(validation, field_type) {
        Some(ConstraintFamily::Text) => {
            if let Some(min) = validation.min.as_ref().and_then(as_count) {
                checks.push(Check {
                    constraint: Constraint::MinLength(min),
                    message: message(format!("Must be at least {min} characters")),
                });
            }
            if let Some(max) = validation.max.as_ref().and_then(as_count) {
                checks.push(Check {
                    constraint: Constraint::MaxLength(max),
                    message: message(format!("Must be at most {max} characters")),
                });
            }
            if let Some(pattern) = validation.regex.as_deref().filter(|p| !p.is_empty()) {
                match Regex::new(pattern) {
                    Ok(re) => checks.push(Check {
                        constraint: Constraint::Pattern(re),
                        message: message("Invalid format".to_string()),
                    }),
                    Err(e) => warn!("Ignoring invalid validation regex '{}' (lookaround and backreferences are not supported): {}", pattern, e),
                }
            }
            if validation.email {
                checks.push(Check {
                    constraint: Constraint::Email,
                    message: message("Invalid email address".to_string()),
                });
            }
            if validation.url {
                checks.push(Check {
                    constraint: Constraint::Url,
                    message: message("Invalid URL".to_string()),
                });
            }
        }
        Some(ConstraintFamily::Numeric) => {
            if let Some(min) = validation.min.as_ref().and_then(as_bound) {
                checks.push(Check {
                    constraint: Constraint::Min(min),
                    message: message(format!("Must be at least {}", format_number(min))),
                });
            }
            if let Some(max) = validation.max.as_ref().and_then(as_bound) {
                checks.push(Check {
                    constraint: Constraint::Max(max),
                    message: message(format!("Must be at most {}", format_number(max))),
                });
            }
            if validation.integer {
                checks.push(Check {
                    constraint: Constraint::Integer,
                    message: message("Must be an integer".to_string()),
                });
            }
            if validation.positive {
                checks.push(Check {
                    constraint: Constraint::Positive,
                    message: message("Must be positive".to_string()),
                });
            }
        }
        Some(ConstraintFamily::Temporal) => {
            for (bound, is_min) in [(&validation.min, true), (&validation.max, false)] {
                let Some(raw) = bound.as_ref().filter(|v| conditions::is_truthy(Some(*v))) else {
                    continue;
                };
                let Some(date) = parse_date(raw) else {
                    warn!("Ignoring unparsable date bound {}", raw);
                    continue;
                };
                let text = bound_text(raw);
                checks.push(if is_min {
                    Check {
                        constraint: Constraint::After(date),
                        message: message(format!("Must be after {text}")),
                    }
                } else {
                    Check {
                        constraint: Constraint::Before(date),
                        message: message(format!("Must be before {text}")),
                    }
                });
            }
        }
        Some(ConstraintFamily::Collection) => {
            if let Some(min) = validation.min.as_ref().and_then(as_count) {
                checks.push(Check {
                    constraint: Constraint::MinItems(min),
                    message: message(format!("Must have at least {min} items")),
                });
            }
            if let Some(max) = validation.max.as_ref().and_then(as_count) {
                checks.push(Check {
                    constraint: Constraint::MaxItems(max),
                    message: message(format!("Must have at most {max} items")),
                });
            }
        }
        None => {}
    }

    if let Some(allowed) = &validation.one_of {
        checks.push(Check {
            constraint: Constraint::OneOf(allowed.clone()),
            message: message("Invalid selection".to_string()),
        });
    }

    checks
}

/// Rule for one field, or `None` when the field has neither validation nor
/// any form of requiredness.
pub fn build_field_schema(field: &Field, all_values: &Value) -> Option<FieldRule> {
    if field.validation.is_none() && !field.required && field.required_when.is_none() {
        return None;
    }

    let checks = field
        .validation
        .as_ref()
        .map(|v| build_checks(v, &field.field_type))
        .unwrap_or_default();

    Some(FieldRule {
        kind: BaseKind::for_field_type(&field.field_type),
        label: field.display_label().to_string(),
        required: conditions::is_required(all_values, field),
        required_message: required_message(field),
        checks,
    })
}

pub fn build_schema<'a>(fields: impl IntoIterator<Item = &'a Field>, all_values: &Value) -> ValidationSchema {
    let mut schema = ValidationSchema::default();
    for field in fields {
        if field.name.is_empty() {
            continue;
        }
        if let Some(rule) = build_field_schema(field, all_values) {
            schema.insert(&field.name, rule);
        }
    }
    schema
}

pub fn build_step_schema(step: &Step, all_values: &Value) -> ValidationSchema {
    build_schema(flatten_step_fields(step), all_values)
}

// --- Value checking ---

/// A value coerced to the rule's base kind.
enum Typed<'a> {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    Boolean,
    List(&'a [Value]),
    Other,
}

pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_f64()? as i64).map(|d| d.naive_utc()),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(s, format) {
            return NaiveDate::from_ymd_opt(1970, 1, 1).map(|d| d.and_time(time));
        }
    }
    None
}

fn coerce<'a>(kind: BaseKind, value: &'a Value) -> Option<Typed<'a>> {
    match kind {
        BaseKind::String => match value {
            Value::String(s) => Some(Typed::Text(s.clone())),
            Value::Number(_) | Value::Bool(_) => Some(Typed::Text(display_value(value))),
            _ => None,
        },
        BaseKind::Number => {
            let n = match value {
                Value::Number(n) => n.as_f64()?,
                Value::String(s) => parse_number(s),
                _ => return None,
            };
            (!n.is_nan()).then_some(Typed::Number(n))
        }
        BaseKind::Date => parse_date(value).map(Typed::Date),
        BaseKind::Boolean => match value {
            Value::Bool(_) => Some(Typed::Boolean),
            Value::String(s) if s == "true" || s == "false" => Some(Typed::Boolean),
            Value::Number(n) if n.as_f64() == Some(0.0) || n.as_f64() == Some(1.0) => Some(Typed::Boolean),
            _ => None,
        },
        BaseKind::Array => value.as_array().map(|items| Typed::List(items.as_slice())),
        BaseKind::Mixed => Some(match value {
            Value::String(s) => Typed::Text(s.clone()),
            Value::Number(n) => Typed::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::Array(items) => Typed::List(items.as_slice()),
            _ => Typed::Other,
        }),
    }
}

fn is_valid_url(s: &str) -> bool {
    url::Url::parse(s).is_ok_and(|u| u.has_host())
}

fn passes(constraint: &Constraint, typed: &Typed<'_>, raw: &Value) -> bool {
    match (constraint, typed) {
        (Constraint::MinLength(min), Typed::Text(s)) => s.chars().count() >= *min,
        (Constraint::MaxLength(max), Typed::Text(s)) => s.chars().count() <= *max,
        (Constraint::Pattern(re), Typed::Text(s)) => re.is_match(s),
        (Constraint::Email, Typed::Text(s)) => email_regex().is_match(s),
        (Constraint::Url, Typed::Text(s)) => is_valid_url(s),
        (Constraint::Min(min), Typed::Number(n)) => n >= min,
        (Constraint::Max(max), Typed::Number(n)) => n <= max,
        (Constraint::Integer, Typed::Number(n)) => n.fract() == 0.0,
        (Constraint::Positive, Typed::Number(n)) => *n > 0.0,
        (Constraint::After(bound), Typed::Date(d)) => d >= bound,
        (Constraint::Before(bound), Typed::Date(d)) => d <= bound,
        (Constraint::MinItems(min), Typed::List(items)) => items.len() >= *min,
        (Constraint::MaxItems(max), Typed::List(items)) => items.len() <= *max,
        (Constraint::OneOf(allowed), _) => allowed.iter().any(|a| strict_equals(Some(a), Some(raw))),
        // Constraint does not apply to this shape of value.
        _ => true,
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn check_value(rule: &FieldRule, value: Option<&Value>) -> Result<(), String> {
    let Some(raw) = value.filter(|_| !is_blank(value)) else {
        return if rule.required {
            Err(rule.required_message.clone())
        } else {
            Ok(())
        };
    };

    let typed = coerce(rule.kind, raw).ok_or_else(|| format!("{} must be a {}", rule.label, rule.kind.name()))?;

    for check in &rule.checks {
        if !passes(&check.constraint, &typed, raw) {
            return Err(check.message.clone());
        }
    }
    Ok(())
}
