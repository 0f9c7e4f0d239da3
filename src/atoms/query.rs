//! List query atoms
//!
//! Unknown fields, unsupported operators and non-sortable sort keys are
//! dropped, never raised.

use serde_json::Value;
use tracing::debug;

use super::Atom;
use crate::core::context::ExecutionContext;
use crate::core::phase::Phase;
use crate::core::step::{StepFn, StepOutput};
use crate::crud::filters::Predicate;
use crate::crud::sorter::SortSpec;
use crate::spec::{FilterOp, OperationAlias, SpecTable};

/// Keys carrying paging or ordering rather than filters
const RESERVED_KEYS: [&str; 4] = ["sort", "skip", "limit", "offset"];

pub(super) fn filter_translate() -> Atom {
    Atom::new("query", "filter_translate", Phase::PreHandler, 40, StepFn::sync(run_filter_translate))
        .when(|table, op| op.takes_filters() && !table.filterable_fields().is_empty())
}

pub(super) fn sort_translate() -> Atom {
    Atom::new("query", "sort_translate", Phase::PreHandler, 50, StepFn::sync(run_sort_translate))
        .when(|table, op| op == OperationAlias::List && !table.sortable_fields().is_empty())
}

/// Parses `field` or `field__op` into a predicate the field allows
pub(crate) fn translate_filter(table: &SpecTable, key: &str, value: &Value) -> Option<Predicate> {
    let (name, op) = if table.field(key).is_some() {
        (key, FilterOp::Eq)
    } else {
        let (name, op) = key.rsplit_once("__")?;
        (name, op.parse::<FilterOp>().ok()?)
    };

    let field = table.field(name)?;
    if !field.io.filter_ops.contains(&op) {
        return None;
    }

    let value = match (op.takes_list(), value) {
        (true, Value::Array(_)) => value.clone(),
        (true, scalar) => Value::Array(vec![scalar.clone()]),
        (false, _) => value.clone(),
    };
    Some(Predicate::new(name, op, value))
}

fn run_filter_translate(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let table = view.table();

    let mut predicates = Vec::new();
    for (key, value) in &ctx.query.filters {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        match translate_filter(table, key, value) {
            Some(predicate) => predicates.push(predicate),
            None => debug!(model = table.model(), key = %key, "dropping filter key"),
        }
    }
    ctx.filters = predicates;
    Ok(None)
}

fn run_sort_translate(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let table = view.table();

    let Some(key) = ctx.query.sort.as_deref() else {
        return Ok(None);
    };
    let sort = SortSpec::parse(key)
        .filter(|s| table.field(&s.field).map_or(false, |f| f.io.sortable));
    if sort.is_none() {
        debug!(model = table.model(), key = %key, "ignoring sort key");
    }
    ctx.sort = sort;
    Ok(None)
}
