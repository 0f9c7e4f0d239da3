//! Kernel Invariant Tests
//!
//! Compile- and run-time guarantees of the phase-chain kernel:
//! - Schema visibility follows each field's IO contract exactly
//! - Compilation is deterministic and cached
//! - Step order within a phase: system, atoms, hooks in registration order
//! - Any abort after START_TX rolls back; nothing is persisted
//! - Registries are read-only once compilation starts

use std::sync::Arc;
use std::time::Duration;

use opkernel::atoms::Atom;
use opkernel::core::StepFn;
use opkernel::spec::SpecErrorCode;
use opkernel::{
    default_kernel, DataSession, ExecutionContext, FieldSpec, Hook, InMemoryStore, IoSpec,
    Kernel, KernelError, ModelSpec, OperationAlias, Phase, Principal,
};
use serde_json::{json, Value};

use OperationAlias::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn note() -> ModelSpec {
    ModelSpec::new("Note")
        .field(FieldSpec::string("title").nullable(false).io(IoSpec::new()
            .in_verbs([Create, Update, BulkCreate])
            .out_verbs([Create, Read, Update, List, BulkCreate])))
        .field(FieldSpec::string("body").io(IoSpec::new()
            .in_verbs([Create, Update, Replace])
            .out_verbs([Read])
            .alias_out("content")))
        .field(FieldSpec::string("draft").io(IoSpec::new()
            .in_verbs([Create])
            .out_verbs([Read])
            .allow_in(false)))
        .field(FieldSpec::string("internal").io(IoSpec::new()
            .in_verbs([Create, Update])
            .out_verbs([Read, List])
            .allow_out(false)))
}

fn kernel() -> Kernel {
    let kernel = Kernel::default();
    kernel.register(note()).unwrap();
    kernel
}

fn ctx(store: &Arc<InMemoryStore>) -> ExecutionContext {
    ExecutionContext::new(store.session(), Principal::user("u1"))
}

/// Appends `name` to `ctx.temp["trail"]`
fn trail(name: &'static str) -> Hook {
    Hook::sync(name, move |ctx| {
        let entry = ctx.temp.entry("trail".to_string()).or_insert_with(|| json!([]));
        if let Value::Array(items) = entry {
            items.push(json!(name));
        }
        Ok(None)
    })
}

fn explode(name: &'static str) -> Hook {
    Hook::sync(name, |_| Err(KernelError::hook("boom")))
}

// =============================================================================
// Schema Visibility
// =============================================================================

/// A field is in SchemaIn(op) iff op is in in_verbs and allow_in; likewise
/// for SchemaOut with out_verbs and allow_out.
#[test]
fn test_schema_visibility_matches_contract() {
    let kernel = kernel();
    let table = kernel.table("Note").unwrap();

    for op in OperationAlias::ALL {
        let expected_in: Vec<&str> = table
            .fields()
            .iter()
            .filter(|f| f.io.allow_in && f.io.in_verbs.contains(&op))
            .map(|f| f.name.as_str())
            .collect();
        let expected_out: Vec<&str> = table
            .fields()
            .iter()
            .filter(|f| f.io.allow_out && f.io.out_verbs.contains(&op))
            .map(|f| f.name.as_str())
            .collect();

        assert_eq!(kernel.schema_in("Note", op).unwrap().field_names(), expected_in, "in {}", op);
        assert_eq!(kernel.schema_out("Note", op).unwrap().field_names(), expected_out, "out {}", op);
    }
}

/// Disallowed fields never appear, whatever their verbs say.
#[test]
fn test_allow_flags_hide_fields() {
    let kernel = kernel();
    assert!(kernel.schema_in("Note", Create).unwrap().field("draft").is_none());
    assert!(kernel.schema_out("Note", Read).unwrap().field("internal").is_none());
    assert_eq!(
        kernel.schema_out("Note", Read).unwrap().field("body").unwrap().wire_name,
        "content"
    );
}

/// Published JSON schemas carry the model and operation in the title.
#[test]
fn test_json_schema_titles() {
    let kernel = kernel();
    let request = kernel.schema_in("Note", BulkCreate).unwrap().to_json_schema();
    assert_eq!(request["title"], "NoteBulkCreateRequest");
    assert_eq!(request["type"], "array");

    let response = kernel.schema_out("Note", Delete).unwrap().to_json_schema();
    assert_eq!(response["title"], "NoteDeleteResponse");
    assert_eq!(response["required"], json!(["deleted"]));
}

// =============================================================================
// Compilation
// =============================================================================

/// Independent kernels with identical declarations compile identical chains.
#[test]
fn test_compile_is_deterministic() {
    let a = kernel();
    let b = kernel();
    for op in OperationAlias::ALL {
        assert_eq!(a.plan("Note", op).unwrap(), b.plan("Note", op).unwrap(), "{}", op);
    }
}

/// Repeated compiles return the cached chain.
#[test]
fn test_compile_is_cached() {
    let kernel = kernel();
    let first = kernel.compile("Note", Update).unwrap();
    let second = kernel.compile("Note", Update).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// Create plan: system steps, atoms by priority, hooks last in phase.
#[test]
fn test_create_plan_order() {
    let kernel = kernel();
    kernel.register_hook("Note", [Create], Phase::PreHandler, trail("first")).unwrap();
    kernel.register_hook("Note", [Create], Phase::PreHandler, trail("second")).unwrap();

    assert_eq!(
        kernel.plan("Note", Create).unwrap(),
        [
            "START_TX:sys:txn:begin",
            "PRE_HANDLER:atom:schema:collect_in",
            "PRE_HANDLER:atom:resolve:assemble",
            "PRE_HANDLER:atom:wire:validate_in",
            "PRE_HANDLER:hook:first",
            "PRE_HANDLER:hook:second",
            "HANDLER:sys:crud:create",
            "OUT_COLLECT:atom:schema:collect_out",
            "END_TX:sys:txn:commit",
        ]
    );
}

/// Delete has no body and no output contract.
#[test]
fn test_delete_plan_is_minimal() {
    let kernel = kernel();
    assert_eq!(
        kernel.compile("Note", Delete).unwrap().step_labels(),
        ["sys:txn:begin", "sys:crud:delete", "sys:txn:commit"]
    );
}

/// Disabled operations are a compile-time error.
#[test]
fn test_disabled_operation_does_not_compile() {
    let kernel = Kernel::default();
    kernel.register(note().disable(Clear)).unwrap();
    match kernel.compile("Note", Clear).unwrap_err() {
        KernelError::Spec(e) => assert_eq!(e.code(), SpecErrorCode::OperationDisabled),
        other => panic!("expected spec error, got {other}"),
    }
    assert!(!kernel.kernelz().unwrap()["Note"].contains_key(&Clear));
}

/// Hooks and atoms cannot be added after compilation.
#[test]
fn test_registries_freeze() {
    let kernel = kernel();
    kernel.compile("Note", Read).unwrap();

    let late_hook = kernel.register_hook("Note", [Read], Phase::PostHandler, trail("late"));
    assert!(matches!(late_hook, Err(KernelError::Spec(_))));

    let late_atom = kernel.register_atom(Atom::new("audit", "stamp", Phase::PostHandler, 0, StepFn::sync(|_| Ok(None))));
    assert!(matches!(late_atom, Err(KernelError::Spec(_))));
}

/// A custom atom registered before compiling joins every matching chain.
#[tokio::test]
async fn test_custom_atom_runs() {
    let kernel = Kernel::default();
    kernel
        .register_atom(
            Atom::new(
                "audit",
                "stamp",
                Phase::PostHandler,
                5,
                StepFn::sync(|ctx| {
                    ctx.temp.insert("stamped".to_string(), json!(true));
                    Ok(None)
                }),
            )
            .when(|_, op| op == Create),
        )
        .unwrap();
    kernel.register(note()).unwrap();

    assert!(kernel.plan("Note", Create).unwrap().contains(&"POST_HANDLER:atom:audit:stamp".to_string()));
    assert!(!kernel.plan("Note", Read).unwrap().iter().any(|s| s.contains("audit")));

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    kernel.run("Note", Create, &mut ctx).await.unwrap();
    assert_eq!(ctx.temp["stamped"], true);
}

/// The shared kernel is a single instance.
#[test]
fn test_default_kernel_is_shared() {
    assert!(std::ptr::eq(default_kernel(), default_kernel()));
}

// =============================================================================
// Hook Execution
// =============================================================================

/// Hooks in the same phase run in registration order.
#[tokio::test]
async fn test_hooks_run_in_registration_order() {
    let kernel = kernel();
    for name in ["a", "b", "c"] {
        kernel.register_hook("Note", [Create], Phase::PostHandler, trail(name)).unwrap();
    }
    kernel.register_hook("Note", [Create], Phase::PreHandler, trail("pre")).unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    kernel.run("Note", Create, &mut ctx).await.unwrap();
    assert_eq!(ctx.temp["trail"], json!(["pre", "a", "b", "c"]));
}

/// An async hook completes before the next step starts.
#[tokio::test]
async fn test_async_hook_is_awaited() {
    let kernel = kernel();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::asynchronous("slow", |ctx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    ctx.temp.insert("slow".to_string(), json!("done"));
                    Ok(None)
                })
            }),
        )
        .unwrap();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::sync("check", |ctx| match ctx.temp.get("slow") {
                Some(v) if v == "done" => Ok(None),
                _ => Err(KernelError::hook("async hook not awaited")),
            }),
        )
        .unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    kernel.run("Note", Create, &mut ctx).await.unwrap();
}

/// Hooks see assembled values and the handler result.
#[tokio::test]
async fn test_hooks_observe_context() {
    let kernel = kernel();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PreHandler,
            Hook::sync("shout", |ctx| {
                if let Some(row) = ctx.values.first_mut() {
                    if let Some(Value::String(title)) = row.get("title").cloned() {
                        row.insert("title".to_string(), json!(title.to_uppercase()));
                    }
                }
                Ok(None)
            }),
        )
        .unwrap();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::sync("peek", |ctx| {
                assert!(ctx.result.as_ref().map_or(false, |r| r["id"].is_string()));
                assert_eq!(ctx.phase(), Some(Phase::PostHandler));
                Ok(None)
            }),
        )
        .unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "quiet"}));
    let out = kernel.run("Note", Create, &mut ctx).await.unwrap();
    assert_eq!(out["title"], "QUIET");
}

// =============================================================================
// Abort and Rollback
// =============================================================================

/// A failing hook after the handler rolls the insert back.
#[tokio::test]
async fn test_hook_failure_rolls_back() {
    let kernel = kernel();
    kernel.register_hook("Note", [BulkCreate], Phase::PostHandler, explode("explode")).unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!([{"title": "a"}, {"title": "b"}]));
    let err = kernel.run("Note", BulkCreate, &mut ctx).await.unwrap_err();

    assert_eq!(err.code(), "OPERATION_ERROR");
    assert_eq!(err.phase(), Some(Phase::PostHandler));
    assert_eq!(err.step(), Some("hook:explode"));
    assert_eq!(err.root_cause().code(), "HOOK_ERROR");
    assert!(store.is_empty("Note"));
}

/// Abort before START_TX never opens a transaction.
#[tokio::test]
async fn test_abort_before_transaction() {
    let kernel = kernel();
    kernel.register_hook("Note", [Create], Phase::PreTxBegin, explode("gate")).unwrap();

    let store = InMemoryStore::new();
    let session = store.session();
    let mut ctx = ExecutionContext::new(session.clone(), Principal::user("u1"))
        .with_payload(json!({"title": "t"}));
    let err = kernel.run("Note", Create, &mut ctx).await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::PreTxBegin));
    assert!(!session.in_transaction());
    assert!(store.is_empty("Note"));
}

/// Validation failures abort with the field and step attached.
#[tokio::test]
async fn test_required_field_missing() {
    let kernel = kernel();
    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"body": "no title"}));
    let err = kernel.run("Note", Create, &mut ctx).await.unwrap_err();

    assert_eq!(err.phase(), Some(Phase::PreHandler));
    assert_eq!(err.step(), Some("atom:wire:validate_in"));
    assert_eq!(err.field(), Some("title"));
    assert!(store.is_empty("Note"));
}

/// Cancelling mid-chain stops before the next step and rolls back.
#[tokio::test]
async fn test_cancellation_rolls_back() {
    let kernel = kernel();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::sync("cancel", |ctx| {
                ctx.cancel_handle().cancel();
                Ok(None)
            }),
        )
        .unwrap();
    kernel.register_hook("Note", [Create], Phase::PostHandler, trail("never")).unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    let err = kernel.run("Note", Create, &mut ctx).await.unwrap_err();

    assert!(matches!(err.root_cause(), KernelError::Cancelled));
    assert_eq!(err.step(), Some("hook:never"));
    assert_eq!(err.status_code(), 499);
    assert!(!ctx.temp.contains_key("trail"));
    assert!(store.is_empty("Note"));
}

/// A context cancelled up front never reaches the handler.
#[tokio::test]
async fn test_cancelled_before_start() {
    let kernel = kernel();
    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    ctx.cancel_handle().cancel();

    let err = kernel.run("Note", Create, &mut ctx).await.unwrap_err();
    assert!(matches!(err.root_cause(), KernelError::Cancelled));
    assert!(store.is_empty("Note"));
}

/// Clearing `persist` returns the response but discards the write.
#[tokio::test]
async fn test_dry_run_discards_writes() {
    let kernel = kernel();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::sync("dry_run", |ctx| {
                ctx.persist = false;
                Ok(None)
            }),
        )
        .unwrap();

    let store = InMemoryStore::new();
    let mut ctx = ctx(&store).with_payload(json!({"title": "t"}));
    let out = kernel.run("Note", Create, &mut ctx).await.unwrap();
    assert_eq!(out["title"], "t");
    assert!(store.is_empty("Note"));
}

/// Dropping an execution mid-transaction schedules a rollback.
#[tokio::test]
async fn test_dropped_execution_rolls_back() {
    let kernel = kernel();
    kernel
        .register_hook(
            "Note",
            [Create],
            Phase::PostHandler,
            Hook::asynchronous("stall", |_| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(None)
                })
            }),
        )
        .unwrap();

    let store = InMemoryStore::new();
    let session = store.session();
    let mut ctx = ExecutionContext::new(session.clone(), Principal::user("u1"))
        .with_payload(json!({"title": "t"}));
    let chain = kernel.compile("Note", Create).unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), kernel.execute(&chain, &mut ctx)).await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!session.in_transaction());
    assert!(store.is_empty("Note"));
}

/// Sessions reject commit outside a transaction.
#[tokio::test]
async fn test_session_commit_requires_transaction() {
    let store = InMemoryStore::new();
    let session = store.session();
    assert!(session.commit().await.is_err());
    session.rollback().await.unwrap();
}
