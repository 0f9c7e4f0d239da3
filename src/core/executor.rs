//! Chain Executor
//!
//! Runs a compiled chain phase by phase, step by step, on the caller's task.
//!
//! - The cancel flag is checked before every step
//! - Any step error aborts the chain
//! - Once START_TX has run, an abort always fires the rollback step
//! - A future dropped mid-transaction schedules a rollback on the runtime

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{trace, warn};

use super::chain::PhaseChain;
use super::context::ExecutionContext;
use super::error::{KernelError, KernelResult};
use super::phase::Phase;
use super::step::invoke;
use crate::config::KernelConfig;
use crate::crud::session::DataSession;
use crate::spec::OperationAlias;

/// Rolls the session back if dropped while armed
struct TxGuard {
    session: Option<Arc<dyn DataSession>>,
}

impl TxGuard {
    fn idle() -> Self {
        Self { session: None }
    }

    fn arm(&mut self, session: Arc<dyn DataSession>) {
        self.session = Some(session);
    }

    fn disarm(&mut self) {
        self.session = None;
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                warn!("execution dropped inside transaction, scheduling rollback");
                handle.spawn(async move {
                    if let Err(e) = session.rollback().await {
                        warn!(error = %e, "rollback after drop failed");
                    }
                });
            }
            Err(_) => warn!("execution dropped inside transaction outside a runtime"),
        }
    }
}

/// Executes `chain` against `ctx`.
///
/// Returns the wire response: the OUT_* result when present, else an empty
/// projection of the handler result.
pub(crate) async fn run_chain(
    chain: &PhaseChain,
    config: Arc<KernelConfig>,
    ctx: &mut ExecutionContext,
) -> KernelResult<Value> {
    ctx.attach(Arc::clone(chain.view()), config);
    let mut guard = TxGuard::idle();
    let mut tx_started = false;

    for (phase, steps) in chain.phases() {
        ctx.enter_phase(phase);
        if phase == Phase::StartTx {
            tx_started = true;
            guard.arm(Arc::clone(ctx.session()));
        }

        for step in steps {
            let outcome = if ctx.is_cancelled() {
                Err(KernelError::Cancelled)
            } else {
                trace!(phase = %phase, step = %step.label, "step");
                invoke(&step.func, ctx).await
            };

            match outcome {
                Ok(Some(value)) => ctx.result = Some(value),
                Ok(None) => {}
                Err(err) => {
                    let err = err.at_step(phase, step.label.as_str());
                    if tx_started {
                        warn!(phase = %phase, step = %step.label, error = %err, "aborting chain, rolling back");
                        rollback(chain, ctx).await;
                    } else {
                        warn!(phase = %phase, step = %step.label, error = %err, "aborting chain");
                    }
                    guard.disarm();
                    return Err(err);
                }
            }
        }

        if phase == Phase::EndTx {
            guard.disarm();
        }
    }

    Ok(finalize(chain.op(), ctx))
}

async fn rollback(chain: &PhaseChain, ctx: &mut ExecutionContext) {
    let step = chain.rollback_step();
    if let Err(e) = invoke(&step.func, ctx).await {
        warn!(step = %step.label, error = %e, "rollback failed");
    }
}

fn finalize(op: OperationAlias, ctx: &ExecutionContext) -> Value {
    if let Some(response) = &ctx.response {
        return response.clone();
    }
    match &ctx.result {
        Some(Value::Object(_)) if !op.returns_count() => json!({}),
        Some(Value::Array(rows)) => Value::Array(rows.iter().map(|_| json!({})).collect()),
        Some(other) => other.clone(),
        None => Value::Null,
    }
}
