//! Field declaration types
//!
//! A model is declared as an ordered list of [`FieldSpec`]s. Each spec carries
//! a storage descriptor (type, nullability, keys, defaults) and an [`IoSpec`]
//! stating which operations may read or write the field and under what name.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::SpecError;
use crate::core::context::ExecutionContext;

/// The fixed set of named operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAlias {
    Create,
    Read,
    Update,
    Replace,
    Delete,
    List,
    Merge,
    BulkCreate,
    BulkUpdate,
    BulkReplace,
    BulkDelete,
    Clear,
}

impl OperationAlias {
    /// Every operation, in declaration order
    pub const ALL: [OperationAlias; 12] = [
        OperationAlias::Create,
        OperationAlias::Read,
        OperationAlias::Update,
        OperationAlias::Replace,
        OperationAlias::Delete,
        OperationAlias::List,
        OperationAlias::Merge,
        OperationAlias::BulkCreate,
        OperationAlias::BulkUpdate,
        OperationAlias::BulkReplace,
        OperationAlias::BulkDelete,
        OperationAlias::Clear,
    ];

    /// Operation name as used in declarations and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationAlias::Create => "create",
            OperationAlias::Read => "read",
            OperationAlias::Update => "update",
            OperationAlias::Replace => "replace",
            OperationAlias::Delete => "delete",
            OperationAlias::List => "list",
            OperationAlias::Merge => "merge",
            OperationAlias::BulkCreate => "bulk_create",
            OperationAlias::BulkUpdate => "bulk_update",
            OperationAlias::BulkReplace => "bulk_replace",
            OperationAlias::BulkDelete => "bulk_delete",
            OperationAlias::Clear => "clear",
        }
    }

    /// Whether the payload is a list of rows
    pub fn is_bulk(&self) -> bool {
        matches!(
            self,
            OperationAlias::BulkCreate
                | OperationAlias::BulkUpdate
                | OperationAlias::BulkReplace
                | OperationAlias::BulkDelete
        )
    }

    /// Whether non-mutable fields are dropped from assembled values
    pub fn checks_mutability(&self) -> bool {
        matches!(
            self,
            OperationAlias::Update
                | OperationAlias::Replace
                | OperationAlias::BulkUpdate
                | OperationAlias::BulkReplace
        )
    }

    /// Whether the operation inserts new rows
    pub fn inserts(&self) -> bool {
        matches!(
            self,
            OperationAlias::Create | OperationAlias::BulkCreate | OperationAlias::Merge
        )
    }

    /// Whether every row the operation writes is new. `merge` only inserts
    /// when its target is absent, so defaults and insert-only checks for it
    /// are applied by the handler.
    pub fn always_inserts(&self) -> bool {
        matches!(self, OperationAlias::Create | OperationAlias::BulkCreate)
    }

    /// Whether the operation addresses rows by primary key
    pub fn targets_identity(&self) -> bool {
        matches!(
            self,
            OperationAlias::Read
                | OperationAlias::Update
                | OperationAlias::Replace
                | OperationAlias::Delete
                | OperationAlias::Merge
        )
    }

    /// Whether the operation carries a body of field values
    pub fn carries_values(&self) -> bool {
        matches!(
            self,
            OperationAlias::Create
                | OperationAlias::Update
                | OperationAlias::Replace
                | OperationAlias::Merge
                | OperationAlias::BulkCreate
                | OperationAlias::BulkUpdate
                | OperationAlias::BulkReplace
        )
    }

    /// Whether the operation takes list filters
    pub fn takes_filters(&self) -> bool {
        matches!(self, OperationAlias::List | OperationAlias::Clear)
    }

    /// Whether the result is `{"deleted": n}` rather than rows
    pub fn returns_count(&self) -> bool {
        matches!(
            self,
            OperationAlias::Delete | OperationAlias::BulkDelete | OperationAlias::Clear
        )
    }

    /// Whether the result is a list of rows
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            OperationAlias::List
                | OperationAlias::BulkCreate
                | OperationAlias::BulkUpdate
                | OperationAlias::BulkReplace
        )
    }

    /// PascalCase name used in schema titles
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect()
    }
}

impl fmt::Display for OperationAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationAlias {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationAlias::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| SpecError::unknown_verb(s))
    }
}

/// Recognized list filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    NotIn,
}

impl FilterOp {
    pub const ALL: [FilterOp; 10] = [
        FilterOp::Eq,
        FilterOp::Ne,
        FilterOp::Gt,
        FilterOp::Gte,
        FilterOp::Lt,
        FilterOp::Lte,
        FilterOp::Like,
        FilterOp::NotLike,
        FilterOp::In,
        FilterOp::NotIn,
    ];

    /// Operator suffix used in `field__op` filter keys
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::NotLike => "not_like",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
        }
    }

    /// Whether the operand is a list
    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterOp::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| SpecError::unknown_filter_op(s))
    }
}

/// Storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string
    String,
    /// 64-bit signed integer
    Int,
    /// 64-bit floating point
    Float,
    /// Boolean
    Bool,
    /// UUID in its hyphenated string form
    Uuid,
    /// RFC 3339 timestamp string
    DateTime,
    /// Arbitrary JSON
    Json,
}

impl FieldType {
    /// Returns the type name for error messages and schemas
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
            FieldType::Uuid => "uuid",
            FieldType::DateTime => "datetime",
            FieldType::Json => "json",
        }
    }

    /// JSON Schema type keyword
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldType::String | FieldType::Uuid | FieldType::DateTime => "string",
            FieldType::Int => "integer",
            FieldType::Float => "number",
            FieldType::Bool => "boolean",
            FieldType::Json => "object",
        }
    }

    /// Whether a non-null value matches this type exactly (no coercion)
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Uuid => value
                .as_str()
                .map_or(false, |s| uuid::Uuid::parse_str(s).is_ok()),
            FieldType::DateTime => value
                .as_str()
                .map_or(false, |s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
            FieldType::Json => true,
        }
    }
}

/// Computes a default from the execution context
pub type DefaultFactory = Arc<dyn Fn(&ExecutionContext) -> Value + Send + Sync>;

/// IO contract of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoSpec {
    pub in_verbs: BTreeSet<OperationAlias>,
    pub out_verbs: BTreeSet<OperationAlias>,
    /// `None` means every input verb is mutable
    pub mutable_verbs: Option<BTreeSet<OperationAlias>>,
    pub filter_ops: BTreeSet<FilterOp>,
    pub sortable: bool,
    pub alias_in: Option<String>,
    pub alias_out: Option<String>,
    pub allow_in: bool,
    pub allow_out: bool,
    pub sensitive: bool,
    pub redact_last: Option<usize>,
}

impl Default for IoSpec {
    fn default() -> Self {
        Self {
            in_verbs: BTreeSet::new(),
            out_verbs: BTreeSet::new(),
            mutable_verbs: None,
            filter_ops: BTreeSet::new(),
            sortable: false,
            alias_in: None,
            alias_out: None,
            allow_in: true,
            allow_out: true,
            sensitive: false,
            redact_last: None,
        }
    }
}

impl IoSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_verbs(mut self, verbs: impl IntoIterator<Item = OperationAlias>) -> Self {
        self.in_verbs = verbs.into_iter().collect();
        self
    }

    pub fn out_verbs(mut self, verbs: impl IntoIterator<Item = OperationAlias>) -> Self {
        self.out_verbs = verbs.into_iter().collect();
        self
    }

    pub fn mutable_verbs(mut self, verbs: impl IntoIterator<Item = OperationAlias>) -> Self {
        self.mutable_verbs = Some(verbs.into_iter().collect());
        self
    }

    pub fn filter_ops(mut self, ops: impl IntoIterator<Item = FilterOp>) -> Self {
        self.filter_ops = ops.into_iter().collect();
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn alias_in(mut self, alias: impl Into<String>) -> Self {
        self.alias_in = Some(alias.into());
        self
    }

    pub fn alias_out(mut self, alias: impl Into<String>) -> Self {
        self.alias_out = Some(alias.into());
        self
    }

    pub fn allow_in(mut self, allow: bool) -> Self {
        self.allow_in = allow;
        self
    }

    pub fn allow_out(mut self, allow: bool) -> Self {
        self.allow_out = allow;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn redact_last(mut self, keep: usize) -> Self {
        self.redact_last = Some(keep);
        self
    }

    /// Input-visible: `op ∈ in_verbs ∧ allow_in`
    pub fn accepts_input(&self, op: OperationAlias) -> bool {
        self.allow_in && self.in_verbs.contains(&op)
    }

    /// Output-visible: `op ∈ out_verbs ∧ allow_out`
    pub fn exposes_output(&self, op: OperationAlias) -> bool {
        self.allow_out && self.out_verbs.contains(&op)
    }

    pub fn is_mutable(&self, op: OperationAlias) -> bool {
        match &self.mutable_verbs {
            Some(verbs) => verbs.contains(&op),
            None => self.in_verbs.contains(&op),
        }
    }

    pub fn is_filterable(&self) -> bool {
        !self.filter_ops.is_empty()
    }

    /// Whether the masking atom has work to do for this field
    pub fn is_masked(&self) -> bool {
        self.sensitive || self.redact_last.is_some()
    }
}

/// Per-field declarative unit
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub default_factory: Option<DefaultFactory>,
    pub primary_key: bool,
    /// Writes holding a value another row already has fail with a conflict
    pub unique: bool,
    /// `"model.field"` reference. Carried for storage backends and schema
    /// consumers; the kernel does not check referential integrity.
    pub foreign_key: Option<String>,
    pub required_in: BTreeSet<OperationAlias>,
    pub io: IoSpec,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            default: None,
            default_factory: None,
            primary_key: false,
            unique: false,
            foreign_key: None,
            required_in: BTreeSet::new(),
            io: IoSpec::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Int)
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn default_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Value + Send + Sync + 'static,
    {
        self.default_factory = Some(Arc::new(factory));
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn required_in(mut self, verbs: impl IntoIterator<Item = OperationAlias>) -> Self {
        self.required_in = verbs.into_iter().collect();
        self
    }

    pub fn io(mut self, io: IoSpec) -> Self {
        self.io = io;
        self
    }

    /// Name the field carries in request payloads
    pub fn wire_name_in(&self) -> &str {
        self.io.alias_in.as_deref().unwrap_or(&self.name)
    }

    /// Name the field carries in responses
    pub fn wire_name_out(&self) -> &str {
        self.io.alias_out.as_deref().unwrap_or(&self.name)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.default_factory.is_some()
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("nullable", &self.nullable)
            .field("default", &self.default)
            .field("default_factory", &self.default_factory.is_some())
            .field("primary_key", &self.primary_key)
            .field("unique", &self.unique)
            .field("foreign_key", &self.foreign_key)
            .field("required_in", &self.required_in)
            .field("io", &self.io)
            .finish()
    }
}
