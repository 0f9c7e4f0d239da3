//! CRUD execution core
//!
//! One executor per operation, run as the chain's HANDLER system step.
//! Executors read values already assembled by the PRE_HANDLER atoms, call
//! into the context's data session and leave the stored row(s) as the step
//! result. They hold no state across calls; bulk operations rely on the
//! chain's transaction for all-or-nothing behavior.

pub mod filters;
pub mod memory;
pub mod session;
pub mod sorter;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::config::ReplaceMode;
use crate::core::context::ExecutionContext;
use crate::core::error::{KernelError, KernelResult};
use crate::core::step::{StepFn, StepOutput};
use crate::schema::OpView;
use crate::spec::{FieldSpec, OperationAlias, SpecTable};
use filters::{matches_all, Predicate};
use session::{DataSession, Row, RowQuery, SessionError};

/// Generic executors
pub struct CrudCore;

impl CrudCore {
    /// The HANDLER step for every operation
    pub fn handler() -> StepFn {
        StepFn::asynchronous(|ctx| Box::pin(Self::run(ctx)))
    }

    /// Dispatches on the operation of the attached chain
    pub async fn run(ctx: &mut ExecutionContext) -> StepOutput {
        let view = ctx.view()?;
        let op = view.op();
        debug!(model = view.model(), op = %op, "crud handler");

        let result = match op {
            OperationAlias::Create => Self::create(ctx, &view).await?,
            OperationAlias::Read => Self::read(ctx, &view).await?,
            OperationAlias::Update => Self::update(ctx, &view).await?,
            OperationAlias::Replace => Self::replace(ctx, &view).await?,
            OperationAlias::Delete => Self::delete(ctx, &view).await?,
            OperationAlias::List => Self::list(ctx, &view).await?,
            OperationAlias::Merge => Self::merge(ctx, &view).await?,
            OperationAlias::BulkCreate => Self::bulk_create(ctx, &view).await?,
            OperationAlias::BulkUpdate | OperationAlias::BulkReplace => {
                Self::bulk_update(ctx, &view).await?
            }
            OperationAlias::BulkDelete => Self::bulk_delete(ctx, &view).await?,
            OperationAlias::Clear => Self::clear(ctx, &view).await?,
        };
        Ok(Some(result))
    }

    async fn create(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let row = value_rows(ctx, view)?.into_iter().next().unwrap_or_default();
        check_unique(ctx, table, &row, None).await?;
        let stored = session(ctx)
            .insert(table.model(), &table.primary_key().name, row)
            .await?;
        Ok(Value::Object(stored))
    }

    async fn read(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let id = target_ident(ctx, view.table())?;
        let row = load(ctx, view.table(), &id).await?;
        Ok(Value::Object(row))
    }

    async fn update(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let id = target_ident(ctx, table)?;
        let changes = value_rows(ctx, view)?.into_iter().next().unwrap_or_default();
        let row = apply_changes(ctx, table, &id, changes).await?;
        Ok(Value::Object(row))
    }

    /// Like update; with `ReplaceMode::ResetToDefault` omitted replace-mutable
    /// fields are reset instead of left untouched
    async fn replace(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let id = target_ident(ctx, table)?;
        let mut changes = value_rows(ctx, view)?.into_iter().next().unwrap_or_default();
        if ctx.config().replace_mode == ReplaceMode::ResetToDefault {
            reset_omitted(table, view.op(), &mut changes);
        }
        let row = apply_changes(ctx, table, &id, changes).await?;
        Ok(Value::Object(row))
    }

    async fn delete(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let id = target_ident(ctx, table)?;
        remove(ctx, table, &id).await?;
        Ok(json!({"deleted": 1}))
    }

    async fn list(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let limit = ctx.config().effective_limit(ctx.query.limit);
        let query = RowQuery::new()
            .filter(ctx.filters.iter().chain(ctx.scope.iter()).cloned())
            .sort(ctx.sort.clone())
            .page(ctx.query.skip, Some(limit));
        let rows = session(ctx).query(view.model(), &query).await?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    /// Upsert; never raises `NotFound`. An existing row is patched with the
    /// supplied fields only; a new row gets defaults and insert checks.
    async fn merge(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let pk = &table.primary_key().name;
        let mut row = value_rows(ctx, view)?.into_iter().next().unwrap_or_default();
        let id = ctx.ident.clone().or_else(|| row.get(pk).cloned());
        let session = session(ctx);

        if let Some(id) = id.filter(|id| !id.is_null()) {
            if let Some(existing) = session.get(table.model(), &id).await? {
                if !matches_all(&existing, &ctx.scope) {
                    return Err(KernelError::policy_violation(
                        table.model(),
                        pk,
                        "merge target belongs to another principal",
                    ));
                }
                row.remove(pk);
                for governed in ctx.policy_values.keys() {
                    row.remove(governed);
                }
                check_unique(ctx, table, &row, Some(&id)).await?;
                let stored = session
                    .update(table.model(), &id, row)
                    .await?
                    .ok_or_else(|| KernelError::internal("merge target vanished"))?;
                return Ok(Value::Object(stored));
            }
            row.insert(pk.clone(), id);
        }

        prepare_insert(ctx, table, view.op(), &mut row)?;
        check_unique(ctx, table, &row, None).await?;
        let stored = session.insert(table.model(), pk, row).await?;
        Ok(Value::Object(stored))
    }

    async fn bulk_create(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let session = session(ctx);
        let mut stored = Vec::new();
        for row in value_rows(ctx, view)? {
            check_unique(ctx, table, &row, None).await?;
            let row = session
                .insert(table.model(), &table.primary_key().name, row)
                .await?;
            stored.push(Value::Object(row));
        }
        Ok(Value::Array(stored))
    }

    async fn bulk_update(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let idents = bulk_idents(&ctx.payload, table)?;
        let rows = value_rows(ctx, view)?;
        let reset = view.op() == OperationAlias::BulkReplace
            && ctx.config().replace_mode == ReplaceMode::ResetToDefault;

        let mut stored = Vec::with_capacity(idents.len());
        for (id, mut changes) in idents.iter().zip(rows) {
            if reset {
                reset_omitted(table, view.op(), &mut changes);
            }
            stored.push(Value::Object(apply_changes(ctx, table, id, changes).await?));
        }
        Ok(Value::Array(stored))
    }

    async fn bulk_delete(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let idents = bulk_idents(&ctx.payload, table)?;
        for id in &idents {
            remove(ctx, table, id).await?;
        }
        Ok(json!({"deleted": idents.len()}))
    }

    async fn clear(ctx: &mut ExecutionContext, view: &OpView) -> KernelResult<Value> {
        let table = view.table();
        let pk = &table.primary_key().name;
        let query = RowQuery::new().filter(ctx.filters.iter().chain(ctx.scope.iter()).cloned());
        let session = session(ctx);

        let rows = session.query(table.model(), &query).await?;
        let mut deleted = 0usize;
        for row in &rows {
            if let Some(id) = row.get(pk) {
                if session.delete(table.model(), id).await? {
                    deleted += 1;
                }
            }
        }
        Ok(json!({"deleted": deleted}))
    }
}

fn session(ctx: &ExecutionContext) -> Arc<dyn DataSession> {
    Arc::clone(ctx.session())
}

/// Assembled rows, or one empty row per payload row when no atom assembled
/// any
fn value_rows(ctx: &ExecutionContext, view: &OpView) -> KernelResult<Vec<Row>> {
    if !ctx.values.is_empty() {
        return Ok(ctx.values.clone());
    }
    let count = if view.op().is_bulk() {
        ctx.payload.as_array().map_or(0, Vec::len)
    } else {
        1
    };
    let mut rows = vec![Row::new(); count];
    if view.op().inserts() {
        for row in &mut rows {
            for (name, value) in &ctx.policy_values {
                row.insert(name.clone(), value.clone());
            }
        }
    }
    Ok(rows)
}

/// Primary key of a single-row target: explicit ident, else the payload
fn target_ident(ctx: &ExecutionContext, table: &SpecTable) -> KernelResult<Value> {
    let pk = table.primary_key();
    ctx.ident
        .clone()
        .or_else(|| wire_key(&ctx.payload, pk))
        .filter(|id| !id.is_null())
        .ok_or_else(|| KernelError::validation(&pk.name, "primary key is required"))
}

/// Primary keys of a bulk payload: bare ids or rows carrying the key
fn bulk_idents(payload: &Value, table: &SpecTable) -> KernelResult<Vec<Value>> {
    let pk = table.primary_key();
    let items = payload
        .as_array()
        .ok_or_else(|| KernelError::validation("$payload", "expected a list"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let id = match item {
                Value::Object(_) => wire_key(item, pk),
                Value::Null => None,
                scalar => Some(scalar.clone()),
            };
            id.filter(|id| !id.is_null()).ok_or_else(|| {
                KernelError::validation(format!("[{}].{}", i, pk.name), "primary key is required")
            })
        })
        .collect()
}

fn wire_key(payload: &Value, pk: &FieldSpec) -> Option<Value> {
    let row = payload.as_object()?;
    row.get(pk.wire_name_in())
        .or_else(|| row.get(&pk.name))
        .cloned()
}

/// Fetches a row visible to the principal
async fn load(ctx: &ExecutionContext, table: &SpecTable, id: &Value) -> KernelResult<Row> {
    session(ctx)
        .get(table.model(), id)
        .await?
        .filter(|row| matches_all(row, &ctx.scope))
        .ok_or_else(|| KernelError::not_found(table.model(), id_string(id)))
}

async fn apply_changes(
    ctx: &ExecutionContext,
    table: &SpecTable,
    id: &Value,
    mut changes: Row,
) -> KernelResult<Row> {
    let existing = load(ctx, table, id).await?;
    changes.remove(&table.primary_key().name);
    if changes.is_empty() {
        return Ok(existing);
    }
    check_unique(ctx, table, &changes, Some(id)).await?;
    session(ctx)
        .update(table.model(), id, changes)
        .await?
        .ok_or_else(|| KernelError::not_found(table.model(), id_string(id)))
}

async fn remove(ctx: &ExecutionContext, table: &SpecTable, id: &Value) -> KernelResult<()> {
    load(ctx, table, id).await?;
    if session(ctx).delete(table.model(), id).await? {
        Ok(())
    } else {
        Err(KernelError::not_found(table.model(), id_string(id)))
    }
}

/// Defaults and insert-only requirements for a merge row whose target does
/// not exist yet
fn prepare_insert(
    ctx: &ExecutionContext,
    table: &SpecTable,
    op: OperationAlias,
    row: &mut Row,
) -> KernelResult<()> {
    for field in table.fields_for_in(op) {
        if !row.contains_key(&field.name) {
            if let Some(factory) = &field.default_factory {
                row.insert(field.name.clone(), factory(ctx));
            } else if let Some(default) = &field.default {
                row.insert(field.name.clone(), default.clone());
            }
        }
        if !row.contains_key(&field.name) && !field.nullable && !field.primary_key {
            return Err(KernelError::validation(&field.name, "is required"));
        }
    }
    Ok(())
}

/// Rejects values of `unique` fields already held by another row.
/// `own` is the key of the row being written, if it exists.
async fn check_unique(
    ctx: &ExecutionContext,
    table: &SpecTable,
    row: &Row,
    own: Option<&Value>,
) -> KernelResult<()> {
    let pk = &table.primary_key().name;
    for field in table.fields().iter().filter(|f| f.unique && !f.primary_key) {
        let Some(value) = row.get(&field.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let query = RowQuery::new().filter([Predicate::eq(field.name.clone(), value.clone())]);
        let holders = session(ctx).query(table.model(), &query).await?;
        if holders.iter().any(|h| own.map_or(true, |id| h.get(pk) != Some(id))) {
            return Err(SessionError::Conflict(format!(
                "{}.{} value {} already exists",
                table.model(),
                field.name,
                value
            ))
            .into());
        }
    }
    Ok(())
}

/// Fills replace-mutable fields missing from `changes` with their static
/// default, or null when nullable
fn reset_omitted(table: &SpecTable, op: OperationAlias, changes: &mut Row) {
    for field in table.fields_for_in(op) {
        if !field.io.is_mutable(op) || field.primary_key || changes.contains_key(&field.name) {
            continue;
        }
        if let Some(default) = &field.default {
            changes.insert(field.name.clone(), default.clone());
        } else if field.nullable {
            changes.insert(field.name.clone(), Value::Null);
        }
    }
}

fn id_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
