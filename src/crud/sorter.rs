//! Row ordering for list
//!
//! Sort is stable, so rows with equal keys keep insertion order.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

use super::session::Row;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Single-key ordering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parses `field` or `-field`
    pub fn parse(key: &str) -> Option<Self> {
        match key.strip_prefix('-') {
            Some("") => None,
            Some(field) => Some(Self::desc(field)),
            None if key.is_empty() => None,
            None => Some(Self::asc(key)),
        }
    }
}

/// Sorts rows in place
pub fn sort_rows(rows: &mut [Row], spec: &SortSpec) {
    rows.sort_by(|a, b| {
        let ordering = compare_values(a.get(&spec.field), b.get(&spec.field));
        match spec.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Total order over JSON values.
///
/// - absent < null < bool < number < string < array < object
/// - same scalar types compare naturally; arrays and objects compare equal
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    let type_order = |v: &Value| -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    };

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(0.0);
                let y = y.as_f64().unwrap_or(0.0);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_order(a).cmp(&type_order(b)),
    }
}
