//! Declaration error types
//!
//! Error codes:
//! - KERNEL_SPEC_DUPLICATE_FIELD
//! - KERNEL_SPEC_DUPLICATE_MODEL
//! - KERNEL_SPEC_UNKNOWN_MODEL
//! - KERNEL_SPEC_UNKNOWN_VERB
//! - KERNEL_SPEC_UNKNOWN_FILTER_OP
//! - KERNEL_SPEC_MUTABLE_NOT_INPUT
//! - KERNEL_SPEC_COMPOSITE_KEY
//! - KERNEL_SPEC_OPERATION_DISABLED
//! - KERNEL_SPEC_REGISTRY_FROZEN
//! - KERNEL_SPEC_INVALID
//!
//! Every one of these is fatal at registration or compile time.

use std::fmt;

/// Declaration error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecErrorCode {
    /// Two fields share a name
    DuplicateField,
    /// Model registered twice
    DuplicateModel,
    /// Model was never registered
    UnknownModel,
    /// Verb string is not an operation alias
    UnknownVerb,
    /// Filter operator string is not recognized
    UnknownFilterOp,
    /// `mutable_verbs` is not a subset of `in_verbs`
    MutableNotInput,
    /// More than one primary key field
    CompositeKey,
    /// Operation disabled for the model
    OperationDisabled,
    /// Registration attempted after the kernel froze
    RegistryFrozen,
    /// Any other malformed declaration
    Invalid,
}

impl SpecErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            SpecErrorCode::DuplicateField => "KERNEL_SPEC_DUPLICATE_FIELD",
            SpecErrorCode::DuplicateModel => "KERNEL_SPEC_DUPLICATE_MODEL",
            SpecErrorCode::UnknownModel => "KERNEL_SPEC_UNKNOWN_MODEL",
            SpecErrorCode::UnknownVerb => "KERNEL_SPEC_UNKNOWN_VERB",
            SpecErrorCode::UnknownFilterOp => "KERNEL_SPEC_UNKNOWN_FILTER_OP",
            SpecErrorCode::MutableNotInput => "KERNEL_SPEC_MUTABLE_NOT_INPUT",
            SpecErrorCode::CompositeKey => "KERNEL_SPEC_COMPOSITE_KEY",
            SpecErrorCode::OperationDisabled => "KERNEL_SPEC_OPERATION_DISABLED",
            SpecErrorCode::RegistryFrozen => "KERNEL_SPEC_REGISTRY_FROZEN",
            SpecErrorCode::Invalid => "KERNEL_SPEC_INVALID",
        }
    }
}

impl fmt::Display for SpecErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Declaration error with model/field context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecError {
    code: SpecErrorCode,
    message: String,
    model: Option<String>,
    field: Option<String>,
}

impl SpecError {
    fn new(code: SpecErrorCode, message: String) -> Self {
        Self {
            code,
            message,
            model: None,
            field: None,
        }
    }

    /// Two fields of one model share a name
    pub fn duplicate_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        let model = model.into();
        let field = field.into();
        Self {
            message: format!("Field '{}' declared twice on '{}'", field, model),
            model: Some(model),
            field: Some(field),
            ..Self::new(SpecErrorCode::DuplicateField, String::new())
        }
    }

    /// Model already registered
    pub fn duplicate_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            message: format!("Model '{}' is already registered", model),
            model: Some(model),
            ..Self::new(SpecErrorCode::DuplicateModel, String::new())
        }
    }

    /// Model not registered
    pub fn unknown_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            message: format!("Model '{}' is not registered", model),
            model: Some(model),
            ..Self::new(SpecErrorCode::UnknownModel, String::new())
        }
    }

    /// Unrecognized verb
    pub fn unknown_verb(verb: impl Into<String>) -> Self {
        Self::new(
            SpecErrorCode::UnknownVerb,
            format!("Unknown operation verb '{}'", verb.into()),
        )
    }

    /// Unrecognized filter operator
    pub fn unknown_filter_op(op: impl Into<String>) -> Self {
        Self::new(
            SpecErrorCode::UnknownFilterOp,
            format!("Unknown filter operator '{}'", op.into()),
        )
    }

    /// `mutable_verbs` contains a verb missing from `in_verbs`
    pub fn mutable_not_input(
        model: impl Into<String>,
        field: impl Into<String>,
        verb: &str,
    ) -> Self {
        let model = model.into();
        let field = field.into();
        Self {
            message: format!(
                "Field '{}.{}' is mutable on '{}' but does not accept input there",
                model, field, verb
            ),
            model: Some(model),
            field: Some(field),
            ..Self::new(SpecErrorCode::MutableNotInput, String::new())
        }
    }

    /// More than one primary key
    pub fn composite_key(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            message: format!("Model '{}' declares a composite primary key", model),
            model: Some(model),
            ..Self::new(SpecErrorCode::CompositeKey, String::new())
        }
    }

    /// Operation disabled for the model
    pub fn operation_disabled(model: impl Into<String>, op: &str) -> Self {
        let model = model.into();
        Self {
            message: format!("Operation '{}' is disabled for '{}'", op, model),
            model: Some(model),
            ..Self::new(SpecErrorCode::OperationDisabled, String::new())
        }
    }

    /// Registration after freeze
    pub fn registry_frozen(model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            message: format!(
                "Registrations for '{}' are closed once it has been compiled",
                model
            ),
            model: Some(model),
            ..Self::new(SpecErrorCode::RegistryFrozen, String::new())
        }
    }

    /// Any other malformed declaration
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(SpecErrorCode::Invalid, message.into())
    }

    /// Attach model context
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Attach field context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> SpecErrorCode {
        self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the model if applicable
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Returns the field if applicable
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }
}

impl fmt::Display for SpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for SpecError {}

/// Result type for declaration operations
pub type SpecResult<T> = Result<T, SpecError>;
