//! Steps
//!
//! A step is one unit of work in a phase: a system step, a spec-driven atom
//! or a user hook. Its callable is either synchronous or asynchronous; both
//! are dispatched through [`invoke`], so phase iteration never needs to know
//! which convention a step uses.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use super::context::ExecutionContext;
use super::error::KernelResult;
use super::phase::Phase;

/// Output of a step. `Some` replaces the context's running result.
pub type StepOutput = KernelResult<Option<Value>>;

/// Synchronous step callable
pub type SyncFn = Arc<dyn Fn(&mut ExecutionContext) -> StepOutput + Send + Sync>;

/// Asynchronous step callable
pub type AsyncFn =
    Arc<dyn for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, StepOutput> + Send + Sync>;

/// Tagged step callable
#[derive(Clone)]
pub enum StepFn {
    Sync(SyncFn),
    Async(AsyncFn),
}

impl StepFn {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> StepOutput + Send + Sync + 'static,
    {
        StepFn::Sync(Arc::new(f))
    }

    pub fn asynchronous<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, StepOutput> + Send + Sync + 'static,
    {
        StepFn::Async(Arc::new(f))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, StepFn::Async(_))
    }
}

impl fmt::Debug for StepFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFn::Sync(_) => f.write_str("StepFn::Sync"),
            StepFn::Async(_) => f.write_str("StepFn::Async"),
        }
    }
}

/// Runs a step, suspending only for asynchronous callables
pub async fn invoke(func: &StepFn, ctx: &mut ExecutionContext) -> StepOutput {
    match func {
        StepFn::Sync(f) => f(ctx),
        StepFn::Async(f) => f(ctx).await,
    }
}

/// Where a step comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    System,
    Atom,
    Hook,
}

/// A compiled step bound to its phase
#[derive(Debug, Clone)]
pub struct Step {
    pub label: String,
    pub kind: StepKind,
    pub phase: Phase,
    pub func: StepFn,
}

impl Step {
    pub fn system(label: impl Into<String>, phase: Phase, func: StepFn) -> Self {
        Self {
            label: label.into(),
            kind: StepKind::System,
            phase,
            func,
        }
    }

    /// `PHASE:label`, as listed by plans
    pub fn plan_label(&self) -> String {
        format!("{}:{}", self.phase, self.label)
    }
}
