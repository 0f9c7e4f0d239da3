//! Phase chains
//!
//! A [`PhaseChain`] is the frozen, ordered step table of one
//! (model, operation). Per phase the order is:
//!
//! 1. leading system steps (`sys:txn:begin`, `sys:crud:<op>`)
//! 2. qualifying atoms by (priority, label)
//! 3. user hooks in registration order
//! 4. `sys:txn:commit`, closing END_TX
//!
//! Compilation reads the spec table and registries only, so compiling the
//! same pair twice yields the same step sequence.

use std::sync::Arc;

use tracing::debug;

use super::phase::Phase;
use super::step::{Step, StepFn};
use crate::atoms::AtomRegistry;
use crate::crud::CrudCore;
use crate::hooks::HookRegistry;
use crate::schema::{OpView, SchemaCompiler};
use crate::spec::{OperationAlias, SpecTable};

pub const TXN_BEGIN: &str = "sys:txn:begin";
pub const TXN_COMMIT: &str = "sys:txn:commit";
pub const TXN_ROLLBACK: &str = "sys:txn:rollback";

/// Compiled pipeline of one (model, operation)
#[derive(Debug)]
pub struct PhaseChain {
    model: String,
    op: OperationAlias,
    view: Arc<OpView>,
    phases: Vec<(Phase, Vec<Step>)>,
    rollback: Step,
}

impl PhaseChain {
    /// Merges system steps, atoms and hooks into a chain
    pub fn compile(
        table: Arc<SpecTable>,
        op: OperationAlias,
        atoms: &AtomRegistry,
        hooks: &HookRegistry,
    ) -> Self {
        let model = table.model().to_string();
        let mut phases = Vec::with_capacity(Phase::ALL.len());

        for phase in Phase::ALL {
            let mut steps = Vec::new();
            match phase {
                Phase::StartTx => steps.push(txn_begin()),
                Phase::Handler => steps.push(Step::system(
                    format!("sys:crud:{}", op),
                    Phase::Handler,
                    CrudCore::handler(),
                )),
                _ => {}
            }
            steps.extend(atoms.steps(phase, &table, op));
            steps.extend(hooks.steps(&model, op, phase));
            if phase == Phase::EndTx {
                steps.push(txn_commit());
            }
            phases.push((phase, steps));
        }

        let chain = Self {
            view: Arc::new(SchemaCompiler::view(table, op)),
            model,
            op,
            phases,
            rollback: txn_rollback(),
        };
        debug!(model = %chain.model, op = %op, steps = chain.len(), "compiled chain");
        chain
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn op(&self) -> OperationAlias {
        self.op
    }

    pub fn view(&self) -> &Arc<OpView> {
        &self.view
    }

    /// Every phase in canonical order with its steps
    pub fn phases(&self) -> impl Iterator<Item = (Phase, &[Step])> {
        self.phases.iter().map(|(p, s)| (*p, s.as_slice()))
    }

    pub fn steps(&self, phase: Phase) -> &[Step] {
        &self.phases[phase.index()].1
    }

    /// Step fired on abort once START_TX has run
    pub fn rollback_step(&self) -> &Step {
        &self.rollback
    }

    /// Step labels in execution order
    pub fn step_labels(&self) -> Vec<String> {
        self.phases()
            .flat_map(|(_, steps)| steps.iter().map(|s| s.label.clone()))
            .collect()
    }

    /// `PHASE:label` in execution order
    pub fn plan(&self) -> Vec<String> {
        self.phases()
            .flat_map(|(_, steps)| steps.iter().map(Step::plan_label))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.phases.iter().map(|(_, s)| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn txn_begin() -> Step {
    Step::system(
        TXN_BEGIN,
        Phase::StartTx,
        StepFn::asynchronous(|ctx| {
            Box::pin(async move {
                let session = Arc::clone(ctx.session());
                session.begin().await?;
                Ok(None)
            })
        }),
    )
}

/// Commits, or rolls back when the context's persist flag was cleared
fn txn_commit() -> Step {
    Step::system(
        TXN_COMMIT,
        Phase::EndTx,
        StepFn::asynchronous(|ctx| {
            Box::pin(async move {
                let session = Arc::clone(ctx.session());
                if ctx.persist {
                    session.commit().await?;
                } else {
                    debug!(request_id = %ctx.request_id, "persist cleared, discarding transaction");
                    session.rollback().await?;
                }
                Ok(None)
            })
        }),
    )
}

fn txn_rollback() -> Step {
    Step::system(
        TXN_ROLLBACK,
        Phase::EndTx,
        StepFn::asynchronous(|ctx| {
            Box::pin(async move {
                let session = Arc::clone(ctx.session());
                session.rollback().await?;
                Ok(None)
            })
        }),
    )
}
