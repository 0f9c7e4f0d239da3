//! Field specification model
//!
//! Declarations are validated once at registration; the resulting
//! [`SpecTable`] is immutable and shared by every compiled chain.
//!
//! # Invariants
//!
//! - A field is input-visible for an operation iff the operation is in its
//!   `in_verbs` and `allow_in` is set
//! - A field is output-visible iff the operation is in its `out_verbs` and
//!   `allow_out` is set
//! - `mutable_verbs ⊆ in_verbs`
//! - Exactly one primary key per model

mod errors;
pub mod loader;
mod table;
mod types;

pub use errors::{SpecError, SpecErrorCode, SpecResult};
pub use loader::{parse_model, ModelLoader};
pub use table::{ModelSpec, SpecTable, IMPLICIT_PK};
pub use types::{DefaultFactory, FieldSpec, FieldType, FilterOp, IoSpec, OperationAlias};
