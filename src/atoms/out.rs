//! Output masking atom
//!
//! `sensitive` replaces the whole value; `redact_last = n` keeps the last n
//! characters of a string. Disabled by `MaskingMode::Off`.

use serde_json::Value;

use super::Atom;
use crate::config::MaskingMode;
use crate::core::context::ExecutionContext;
use crate::core::phase::Phase;
use crate::core::step::{StepFn, StepOutput};
use crate::schema::SchemaField;

const OPAQUE_MASK: &str = "***";

pub(super) fn masking() -> Atom {
    Atom::new("out", "masking", Phase::OutMask, 10, StepFn::sync(run_masking))
        .when(|table, op| table.fields_for_out(op).iter().any(|f| f.io.is_masked()))
}

/// Masks one value. `null` is never masked.
pub fn mask_value(value: &Value, sensitive: bool, redact_last: Option<usize>, mask: char) -> Value {
    match (value, redact_last) {
        (Value::Null, _) => Value::Null,
        (Value::String(s), Some(keep)) => {
            let len = s.chars().count();
            let hidden = len.saturating_sub(keep);
            let masked: String = std::iter::repeat(mask)
                .take(hidden)
                .chain(s.chars().skip(hidden))
                .collect();
            Value::String(masked)
        }
        (Value::String(s), None) if sensitive => {
            Value::String(std::iter::repeat(mask).take(s.chars().count()).collect())
        }
        (_, Some(_)) => Value::String(OPAQUE_MASK.to_string()),
        (_, None) if sensitive => Value::String(OPAQUE_MASK.to_string()),
        (other, None) => other.clone(),
    }
}

fn mask_row(row: &mut Value, fields: &[&SchemaField], mask: char) {
    let Some(row) = row.as_object_mut() else {
        return;
    };
    for field in fields {
        if let Some(value) = row.get_mut(&field.wire_name) {
            *value = mask_value(value, field.sensitive, field.redact_last, mask);
        }
    }
}

fn run_masking(ctx: &mut ExecutionContext) -> StepOutput {
    if ctx.config().masking == MaskingMode::Off {
        return Ok(None);
    }
    let view = ctx.view()?;
    let fields: Vec<&SchemaField> = view
        .schema_out()
        .fields
        .iter()
        .filter(|f| f.is_masked())
        .collect();
    let mask = ctx.config().mask_char;

    match ctx.response.as_mut() {
        Some(Value::Array(rows)) => {
            for row in rows {
                mask_row(row, &fields, mask);
            }
        }
        Some(row) => mask_row(row, &fields, mask),
        None => {}
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_masks_whole_value() {
        assert_eq!(mask_value(&json!("hunter2"), true, None, '*'), json!("*******"));
        assert_eq!(mask_value(&json!(42), true, None, '*'), json!("***"));
        assert_eq!(mask_value(&Value::Null, true, None, '*'), Value::Null);
    }

    #[test]
    fn test_redact_last_keeps_suffix() {
        assert_eq!(
            mask_value(&json!("4111111111111111"), false, Some(4), '#'),
            json!("############1111")
        );
        assert_eq!(mask_value(&json!("abc"), false, Some(4), '*'), json!("abc"));
    }

    #[test]
    fn test_unmasked_passes_through() {
        assert_eq!(mask_value(&json!("x"), false, None, '*'), json!("x"));
    }
}
