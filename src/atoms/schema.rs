//! Contract atoms: decode the request and project the response

use serde_json::{Map, Value};

use super::{takes_input, Atom};
use crate::core::context::ExecutionContext;
use crate::core::error::{KernelError, KernelResult};
use crate::core::phase::Phase;
use crate::core::step::{StepFn, StepOutput};
use crate::spec::OperationAlias;

pub(super) fn collect_in() -> Atom {
    Atom::new("schema", "collect_in", Phase::PreHandler, 10, StepFn::sync(run_collect_in))
        .when(takes_input)
}

pub(super) fn collect_out() -> Atom {
    Atom::new("schema", "collect_out", Phase::OutCollect, 10, StepFn::sync(run_collect_out))
        .when(|table, op| !op.returns_count() && !table.fields_for_out(op).is_empty())
}

/// Payload rows for `op`: the array items for bulk operations, else the body
pub(crate) fn payload_rows(
    payload: &Value,
    op: OperationAlias,
) -> KernelResult<Vec<&Map<String, Value>>> {
    static EMPTY: once_cell::sync::Lazy<Map<String, Value>> = once_cell::sync::Lazy::new(Map::new);

    if op.is_bulk() {
        let items = payload.as_array().ok_or_else(|| {
            KernelError::validation("$payload", format!("{} expects a list of rows", op))
        })?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object().ok_or_else(|| {
                    KernelError::validation(format!("$payload[{}]", i), "expected an object")
                })
            })
            .collect()
    } else {
        match payload {
            Value::Object(map) => Ok(vec![map]),
            Value::Null => Ok(vec![&*EMPTY]),
            _ => Err(KernelError::validation(
                "$payload",
                format!("{} expects an object", op),
            )),
        }
    }
}

fn run_collect_in(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let rows = payload_rows(&ctx.payload, view.op())?
        .into_iter()
        .map(|row| view.schema_in().decode(row))
        .collect();
    ctx.in_rows = rows;
    Ok(None)
}

fn run_collect_out(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let schema = view.schema_out();
    let response = match ctx.result.as_ref() {
        Some(Value::Object(row)) => schema.encode(row),
        Some(Value::Array(rows)) => Value::Array(
            rows.iter()
                .map(|row| match row {
                    Value::Object(row) => schema.encode(row),
                    other => other.clone(),
                })
                .collect(),
        ),
        Some(other) => other.clone(),
        None => Value::Null,
    };
    ctx.response = Some(response);
    Ok(None)
}
