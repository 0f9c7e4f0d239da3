//! # Kernel Core
//!
//! Phases, steps, compiled chains and the executor that runs them.
//!
//! ## Design Principles
//!
//! - Fixed, total phase order
//! - Behavior compiled once per (model, operation), never re-derived per call
//! - Strictly sequential execution within a chain
//! - Rollback on any abort once the transaction started

pub mod chain;
pub mod context;
pub mod error;
mod executor;
pub mod kernel;
pub mod phase;
pub mod step;

pub use chain::PhaseChain;
pub use context::{CancelHandle, ExecutionContext, ListQuery, Principal};
pub use error::{KernelError, KernelResult};
pub use kernel::Kernel;
pub use phase::Phase;
pub use step::{invoke, Step, StepFn, StepKind, StepOutput};
