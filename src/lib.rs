//! opkernel - A declarative operation-pipeline kernel
//!
//! Per-field metadata on a model is compiled into an ordered, cancelable
//! phase chain for each named operation (create, read, update, replace,
//! delete, list, merge, bulk variants, clear). Storage, transport and
//! authentication are external collaborators.

pub mod atoms;
pub mod config;
pub mod core;
pub mod crud;
pub mod hooks;
pub mod policy;
pub mod schema;
pub mod spec;

use once_cell::sync::Lazy;

pub use crate::config::{KernelConfig, MaskingMode, ReplaceMode};
pub use crate::core::{ExecutionContext, Kernel, KernelError, KernelResult, Phase, Principal};
pub use crate::crud::memory::InMemoryStore;
pub use crate::crud::session::DataSession;
pub use crate::hooks::Hook;
pub use crate::policy::{FieldPolicy, PolicyMode, PrincipalClaim};
pub use crate::spec::{FieldSpec, FieldType, FilterOp, IoSpec, ModelSpec, OperationAlias};

static DEFAULT_KERNEL: Lazy<Kernel> = Lazy::new(Kernel::default);

/// Process-wide kernel with the default configuration
pub fn default_kernel() -> &'static Kernel {
    &DEFAULT_KERNEL
}
