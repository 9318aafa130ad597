//! Declarative condition evaluation (`visibleWhen`, `enabledWhen`,
//! `requiredWhen`).

use std::str::FromStr;

use log::warn;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::expr::{self, display_value, parse_number};
use crate::path;
use crate::roles;
use crate::schema::{Condition, Conditions, Field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Truthy,
    Falsy,
    Empty,
    NotEmpty,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Between,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown condition operator '{0}'")]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "eq" | "==" | "===" => Operator::Eq,
            "ne" | "!=" | "!==" => Operator::Ne,
            "gt" | ">" => Operator::Gt,
            "gte" | ">=" => Operator::Gte,
            "lt" | "<" => Operator::Lt,
            "lte" | "<=" => Operator::Lte,
            "truthy" => Operator::Truthy,
            "falsy" => Operator::Falsy,
            "empty" => Operator::Empty,
            "notEmpty" => Operator::NotEmpty,
            "in" => Operator::In,
            "notIn" => Operator::NotIn,
            "contains" => Operator::Contains,
            "startsWith" => Operator::StartsWith,
            "endsWith" => Operator::EndsWith,
            "regex" => Operator::Regex,
            "between" => Operator::Between,
            other => return Err(UnknownOperator(other.to_string())),
        };
        Ok(op)
    }
}

/// Strict equality: no type coercion, numbers compared by value, and an
/// absent value only equals another absent value.
pub fn strict_equals(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(a), Some(b)) => values_equal(a, b),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// `Number()` coercion; an absent value is NaN.
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_number(s),
        Some(Value::Array(_) | Value::Object(_)) => f64::NAN,
    }
}

pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Absent, `null`, blank string, empty collection or NaN.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(true, f64::is_nan),
        Some(Value::Bool(_)) => false,
    }
}

fn contained_in(needle: Option<&Value>, haystack: Option<&Value>) -> bool {
    match haystack {
        Some(Value::Array(items)) => items.iter().any(|item| strict_equals(needle, Some(item))),
        _ => false,
    }
}

fn right_as_text(right: Option<&Value>) -> String {
    match right {
        Some(Value::String(s)) => s.clone(),
        Some(other) => display_value(other),
        None => "undefined".to_string(),
    }
}

fn apply(op: Operator, left: Option<&Value>, right: Option<&Value>) -> bool {
    match op {
        Operator::Eq => strict_equals(left, right),
        Operator::Ne => !strict_equals(left, right),
        Operator::Gt => to_number(left) > to_number(right),
        Operator::Gte => to_number(left) >= to_number(right),
        Operator::Lt => to_number(left) < to_number(right),
        Operator::Lte => to_number(left) <= to_number(right),
        Operator::Truthy => is_truthy(left),
        Operator::Falsy => !is_truthy(left),
        Operator::Empty => is_empty_value(left),
        Operator::NotEmpty => !is_empty_value(left),
        Operator::In => contained_in(left, right),
        Operator::NotIn => matches!(right, Some(Value::Array(_))) && !contained_in(left, right),
        Operator::Contains => match left {
            Some(Value::String(s)) => s.contains(right_as_text(right).as_str()),
            Some(Value::Array(items)) => items.iter().any(|item| strict_equals(Some(item), right)),
            _ => false,
        },
        Operator::StartsWith => match left {
            Some(Value::String(s)) => s.starts_with(right_as_text(right).as_str()),
            _ => false,
        },
        Operator::EndsWith => match left {
            Some(Value::String(s)) => s.ends_with(right_as_text(right).as_str()),
            _ => false,
        },
        Operator::Regex => match left {
            Some(Value::String(s)) => {
                let pattern = right_as_text(right);
                match Regex::new(&pattern) {
                    Ok(re) => re.is_match(s),
                    Err(e) => {
                        warn!("Invalid regex '{}' in condition (lookaround and backreferences are not supported): {}", pattern, e);
                        false
                    }
                }
            }
            _ => false,
        },
        Operator::Between => match right {
            Some(Value::Array(bounds)) if bounds.len() == 2 => {
                let n = to_number(left);
                n >= to_number(bounds.first()) && n <= to_number(bounds.get(1))
            }
            _ => false,
        },
    }
}

/// Evaluates a single condition against `values`. Never fails: malformed
/// conditions and unknown operators evaluate to `false`.
pub fn evaluate_condition(condition: &Condition, values: &Value) -> bool {
    if let Some(js) = &condition.js {
        return expr::evaluate_value(js, values).is_some_and(|v| v.is_truthy());
    }

    let (Some(op), Some(left)) = (&condition.op, &condition.left) else {
        return false;
    };

    match op.parse::<Operator>() {
        Ok(op) => apply(op, path::get(values, left), condition.right.as_ref()),
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// AND of every condition; an empty list holds.
pub fn evaluate_condition_list(conditions: &[Condition], values: &Value) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, values))
}

pub fn evaluate_conditions(conditions: &Conditions, values: &Value) -> bool {
    match conditions {
        Conditions::List(list) => evaluate_condition_list(list, values),
        Conditions::Invalid(raw) => {
            warn!("Condition list is not an array: {}", raw);
            false
        }
    }
}

/// Role check first (only when a role is supplied), then `visibleWhen`.
pub fn is_visible(values: &Value, field: &Field, role: Option<&str>) -> bool {
    if let Some(role) = role.filter(|r| !r.is_empty()) {
        if !roles::is_role_visible(Some(role), &field.roles) {
            return false;
        }
    }
    field
        .visible_when
        .as_ref()
        .map_or(true, |c| evaluate_conditions(c, values))
}

pub fn is_enabled(values: &Value, field: &Field) -> bool {
    field
        .enabled_when
        .as_ref()
        .map_or(true, |c| evaluate_conditions(c, values))
}

pub fn is_required(values: &Value, field: &Field) -> bool {
    if field.required {
        return true;
    }
    field
        .required_when
        .as_ref()
        .is_some_and(|c| evaluate_conditions(c, values))
}
