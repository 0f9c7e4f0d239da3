//! Kernel Error Types
//!
//! Unified error taxonomy for registration, compilation and execution.
//! Only `Spec`, `NotFound`, `PolicyViolation` and `Operation` reach callers of
//! `execute`; anything else raised by a step is wrapped into `Operation`
//! together with the phase and step that raised it.

use thiserror::Error;

use super::phase::Phase;
use crate::crud::session::SessionError;
use crate::spec::SpecError;

/// Kernel result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel error type
#[derive(Debug, Error)]
pub enum KernelError {
    /// Bad declarative configuration
    #[error("{0}")]
    Spec(#[from] SpecError),

    /// Target row absent
    #[error("Not found: {model}({id})")]
    NotFound { model: String, id: String },

    /// Client tried to set a server-governed field
    #[error("Policy violation on {model}.{field}: {message}")]
    PolicyViolation {
        model: String,
        field: String,
        message: String,
    },

    /// A step failed; the chain was aborted and rolled back
    #[error("Operation failed in {phase} at '{step}': {cause}")]
    Operation {
        phase: Phase,
        step: String,
        #[source]
        cause: Box<KernelError>,
    },

    /// Assembled values violate the field contract
    #[error("Validation error on '{field}': {message}")]
    Validation { field: String, message: String },

    /// Data session failure
    #[error("Storage error: {0}")]
    Storage(#[from] SessionError),

    /// Raised by a user hook
    #[error("Hook error: {0}")]
    Hook(String),

    /// Enclosing task cancelled the execution
    #[error("Execution cancelled")]
    Cancelled,

    /// Kernel invariant broken
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Create a not found error
    pub fn not_found(model: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            model: model.into(),
            id: id.into(),
        }
    }

    /// Create a policy violation
    pub fn policy_violation(
        model: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PolicyViolation {
            model: model.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Self::Hook(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error surfaces as-is instead of being wrapped
    pub fn surfaces_unwrapped(&self) -> bool {
        matches!(
            self,
            Self::Spec(_) | Self::NotFound { .. } | Self::PolicyViolation { .. } | Self::Operation { .. }
        )
    }

    /// Wrap into `Operation` unless the error surfaces unwrapped
    pub fn at_step(self, phase: Phase, step: impl Into<String>) -> Self {
        if self.surfaces_unwrapped() {
            self
        } else {
            Self::Operation {
                phase,
                step: step.into(),
                cause: Box::new(self),
            }
        }
    }

    /// Stable machine-readable kind
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spec(_) => "SPEC_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PolicyViolation { .. } => "POLICY_VIOLATION",
            Self::Operation { .. } => "OPERATION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Hook(_) => "HOOK_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested HTTP status for transport adapters
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Spec(_) => 500,
            Self::NotFound { .. } => 404,
            Self::PolicyViolation { .. } => 403,
            Self::Operation { cause, .. } => match cause.as_ref() {
                Self::Validation { .. } => 422,
                Self::Storage(SessionError::Conflict(_)) => 409,
                Self::Cancelled => 499,
                _ => 500,
            },
            Self::Validation { .. } => 422,
            Self::Storage(SessionError::Conflict(_)) => 409,
            Self::Storage(_) => 500,
            Self::Hook(_) => 500,
            Self::Cancelled => 499,
            Self::Internal(_) => 500,
        }
    }

    /// Phase the error was raised in, if known
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Operation { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Step label the error was raised by, if known
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Operation { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Field the error concerns, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Spec(e) => e.field(),
            Self::PolicyViolation { field, .. } | Self::Validation { field, .. } => Some(field),
            Self::Operation { cause, .. } => cause.field(),
            _ => None,
        }
    }

    /// The innermost error of an `Operation` chain
    pub fn root_cause(&self) -> &KernelError {
        match self {
            Self::Operation { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
