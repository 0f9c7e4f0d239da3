//! User hooks
//!
//! Hooks are callables bound to (model, operation set, phase). They run after
//! the phase's atoms in registration order, may read and mutate the
//! execution context, and abort the chain by returning an error.

use std::collections::HashMap;

use futures_util::future::BoxFuture;

use crate::core::context::ExecutionContext;
use crate::core::phase::Phase;
use crate::core::step::{Step, StepFn, StepKind, StepOutput};
use crate::spec::OperationAlias;

/// A named user callable
#[derive(Debug, Clone)]
pub struct Hook {
    pub name: String,
    pub func: StepFn,
}

impl Hook {
    pub fn new(name: impl Into<String>, func: StepFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ExecutionContext) -> StepOutput + Send + Sync + 'static,
    {
        Self::new(name, StepFn::sync(f))
    }

    pub fn asynchronous<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, StepOutput> + Send + Sync + 'static,
    {
        Self::new(name, StepFn::asynchronous(f))
    }

    pub fn label(&self) -> String {
        format!("hook:{}", self.name)
    }

    fn step(&self, phase: Phase) -> Step {
        Step {
            label: self.label(),
            kind: StepKind::Hook,
            phase,
            func: self.func.clone(),
        }
    }
}

type HookKey = (String, OperationAlias, Phase);

/// Hooks by (model, operation, phase)
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: HashMap<HookKey, Vec<Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `hook` to every operation in `ops` at `phase`
    pub fn register(
        &mut self,
        model: &str,
        ops: impl IntoIterator<Item = OperationAlias>,
        phase: Phase,
        hook: Hook,
    ) {
        for op in ops {
            self.hooks
                .entry((model.to_string(), op, phase))
                .or_default()
                .push(hook.clone());
        }
    }

    /// Compiled hook steps for one phase, in registration order
    pub fn steps(&self, model: &str, op: OperationAlias, phase: Phase) -> Vec<Step> {
        self.hooks
            .get(&(model.to_string(), op, phase))
            .map(|hooks| hooks.iter().map(|h| h.step(phase)).collect())
            .unwrap_or_default()
    }

    /// Number of hooks registered for `model`
    pub fn count_for(&self, model: &str) -> usize {
        self.hooks
            .iter()
            .filter(|((m, _, _), _)| m == model)
            .map(|(_, hooks)| hooks.len())
            .sum()
    }
}
