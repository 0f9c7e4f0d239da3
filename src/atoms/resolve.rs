//! Value resolution atoms: policy, assembly and input validation

use serde_json::Value;
use tracing::debug;

use super::{takes_input, Atom};
use crate::core::context::ExecutionContext;
use crate::core::error::KernelError;
use crate::core::phase::Phase;
use crate::core::step::{StepFn, StepOutput};
use crate::crud::session::Row;
use crate::policy::PolicyResolver;

pub(super) fn policy_resolve() -> Atom {
    Atom::new("policy", "resolve", Phase::PreTxBegin, 10, StepFn::sync(run_policy_resolve))
        .when(|table, _| !table.policies().is_empty())
}

pub(super) fn assemble() -> Atom {
    Atom::new("resolve", "assemble", Phase::PreHandler, 20, StepFn::sync(run_assemble))
        .when(takes_input)
}

pub(super) fn validate_in() -> Atom {
    Atom::new("wire", "validate_in", Phase::PreHandler, 30, StepFn::sync(run_validate_in))
        .when(|table, op| op.carries_values() && !table.fields_for_in(op).is_empty())
}

fn run_policy_resolve(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    PolicyResolver::resolve(view.table(), view.op(), ctx)?;
    Ok(None)
}

/// Resolves each input-visible field:
/// policy value, then payload, then default factory, then static default.
///
/// Defaults only apply to operations that always insert; `merge` fills them
/// in its insert branch. On update-like operations a field outside
/// `mutable_verbs` is dropped without error.
fn run_assemble(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let table = view.table();
    let op = view.op();
    let fields = table.fields_for_in(op);

    let mut assembled = Vec::with_capacity(ctx.in_rows.len());
    for input in &ctx.in_rows {
        let mut row = Row::new();
        for field in &fields {
            if let Some(value) = ctx.policy_values.get(&field.name) {
                row.insert(field.name.clone(), value.clone());
            } else if let Some(value) = input.get(&field.name) {
                row.insert(field.name.clone(), value.clone());
            } else if op.always_inserts() {
                if let Some(factory) = &field.default_factory {
                    row.insert(field.name.clone(), factory(ctx));
                } else if let Some(default) = &field.default {
                    row.insert(field.name.clone(), default.clone());
                }
            }

            if op.checks_mutability()
                && !field.io.is_mutable(op)
                && row.remove(&field.name).is_some()
            {
                debug!(
                    model = table.model(),
                    field = %field.name,
                    op = %op,
                    "dropping immutable field"
                );
            }
        }
        if op.inserts() {
            for (name, value) in &ctx.policy_values {
                row.insert(name.clone(), value.clone());
            }
        }
        assembled.push(row);
    }

    ctx.values = assembled;
    Ok(None)
}

/// Rejects type mismatches, nulls on non-nullable fields and missing
/// required values
fn run_validate_in(ctx: &mut ExecutionContext) -> StepOutput {
    let view = ctx.view()?;
    let table = view.table();
    let op = view.op();
    let bulk = op.is_bulk();

    for (i, row) in ctx.values.iter().enumerate() {
        let at = |name: &str| {
            if bulk {
                format!("[{}].{}", i, name)
            } else {
                name.to_string()
            }
        };
        for field in table.fields_for_in(op) {
            match row.get(&field.name) {
                Some(Value::Null) if !field.nullable => {
                    return Err(KernelError::validation(at(&field.name), "must not be null"));
                }
                Some(Value::Null) => {}
                Some(value) if !field.field_type.accepts(value) => {
                    return Err(KernelError::validation(
                        at(&field.name),
                        format!("expected {}", field.field_type.type_name()),
                    ));
                }
                Some(_) => {}
                None if field.required_in.contains(&op) => {
                    return Err(KernelError::validation(at(&field.name), "is required"));
                }
                None if op.always_inserts() && !field.nullable && !field.primary_key => {
                    return Err(KernelError::validation(at(&field.name), "is required"));
                }
                None => {}
            }
        }
    }
    Ok(None)
}
