//! Row predicates for list and clear
//!
//! Predicates are produced by the filter translation atom from already
//! validated `field` / `field__op` keys, so matching never fails: a value of
//! the wrong type simply does not match.

use std::cmp::Ordering;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::session::Row;
use super::sorter::compare_values;
use crate::spec::FilterOp;

/// A single `field <op> value` test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// Check if a row matches this predicate.
    ///
    /// An absent column compares as `null`.
    pub fn matches(&self, row: &Row) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);

        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Gt => ordered(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                ordered(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::Lt => ordered(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                ordered(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Like => like(actual, &self.value).unwrap_or(false),
            FilterOp::NotLike => like(actual, &self.value).map_or(false, |m| !m),
            FilterOp::In => self
                .value
                .as_array()
                .map_or(false, |values| values.contains(actual)),
            FilterOp::NotIn => self
                .value
                .as_array()
                .map_or(false, |values| !values.contains(actual)),
        }
    }
}

/// True when the row satisfies every predicate
pub fn matches_all(row: &Row, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| p.matches(row))
}

/// Ordering between two scalars of the same JSON type
fn ordered(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_))
        | (Value::Bool(_), Value::Bool(_)) => Some(compare_values(Some(a), Some(b))),
        _ => None,
    }
}

/// SQL LIKE: `%` any sequence, `_` any single character
fn like(value: &Value, pattern: &Value) -> Option<bool> {
    let (value, pattern) = (value.as_str()?, pattern.as_str()?);
    let regex = like_regex(pattern)?;
    Some(regex.is_match(value))
}

fn like_regex(pattern: &str) -> Option<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?s)^");
    let mut literal = String::new();
    for c in pattern.chars() {
        match c {
            '%' | '_' => {
                expr.push_str(&regex::escape(&literal));
                literal.clear();
                expr.push_str(if c == '%' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    expr.push_str(&regex::escape(&literal));
    expr.push('$');
    Regex::new(&expr).ok()
}
