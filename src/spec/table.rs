//! Per-model spec tables
//!
//! A [`ModelSpec`] is the mutable declaration; [`SpecTable::build`] validates
//! it once and produces the read-only table every other component reads.

use std::collections::{BTreeSet, HashMap};

use super::errors::{SpecError, SpecResult};
use super::types::{FieldSpec, FieldType, IoSpec, OperationAlias};
use crate::policy::FieldPolicy;

/// Name of the synthetic key injected into models without a primary key
pub const IMPLICIT_PK: &str = "id";

/// Declaration of a model prior to registration
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub disabled: BTreeSet<OperationAlias>,
    pub policies: Vec<FieldPolicy>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            disabled: BTreeSet::new(),
            policies: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn disable(mut self, op: OperationAlias) -> Self {
        self.disabled.insert(op);
        self
    }

    pub fn policy(mut self, policy: FieldPolicy) -> Self {
        self.policies.push(policy);
        self
    }
}

/// Read-only, validated field table of one model
#[derive(Debug)]
pub struct SpecTable {
    model: String,
    fields: Vec<FieldSpec>,
    index: HashMap<String, usize>,
    primary_key: usize,
    disabled: BTreeSet<OperationAlias>,
    policies: Vec<FieldPolicy>,
}

impl SpecTable {
    /// Validates a declaration.
    ///
    /// # Errors
    ///
    /// - duplicate field names
    /// - `mutable_verbs` not a subset of `in_verbs`
    /// - more than one primary key
    /// - a policy naming an undeclared field
    pub fn build(spec: ModelSpec) -> SpecResult<Self> {
        let ModelSpec {
            name: model,
            mut fields,
            disabled,
            policies,
        } = spec;

        if model.trim().is_empty() {
            return Err(SpecError::invalid("Model name must not be empty"));
        }

        let mut index = HashMap::with_capacity(fields.len() + 1);
        for (i, field) in fields.iter().enumerate() {
            if field.name.trim().is_empty() {
                return Err(SpecError::invalid("Field name must not be empty").with_model(&model));
            }
            if index.insert(field.name.clone(), i).is_some() {
                return Err(SpecError::duplicate_field(&model, &field.name));
            }
            if let Some(mutable) = &field.io.mutable_verbs {
                if let Some(verb) = mutable.difference(&field.io.in_verbs).next() {
                    return Err(SpecError::mutable_not_input(&model, &field.name, verb.as_str()));
                }
            }
        }

        let keys: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.primary_key)
            .map(|(i, _)| i)
            .collect();

        let primary_key = match keys.as_slice() {
            [] => {
                if index.contains_key(IMPLICIT_PK) {
                    return Err(SpecError::invalid(format!(
                        "Field '{}' must be the primary key when no other key is declared",
                        IMPLICIT_PK
                    ))
                    .with_model(&model)
                    .with_field(IMPLICIT_PK));
                }
                fields.push(implicit_key());
                let i = fields.len() - 1;
                index.insert(IMPLICIT_PK.to_string(), i);
                i
            }
            [single] => *single,
            _ => return Err(SpecError::composite_key(&model)),
        };

        for policy in &policies {
            if !index.contains_key(&policy.field) {
                return Err(SpecError::invalid(format!(
                    "Policy references undeclared field '{}'",
                    policy.field
                ))
                .with_model(&model)
                .with_field(&policy.field));
            }
        }

        Ok(Self {
            model,
            fields,
            index,
            primary_key,
            disabled,
            policies,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// All fields in declaration order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn primary_key(&self) -> &FieldSpec {
        &self.fields[self.primary_key]
    }

    pub fn is_enabled(&self, op: OperationAlias) -> bool {
        !self.disabled.contains(&op)
    }

    pub fn enabled_operations(&self) -> impl Iterator<Item = OperationAlias> + '_ {
        OperationAlias::ALL
            .into_iter()
            .filter(move |op| self.is_enabled(*op))
    }

    pub fn policies(&self) -> &[FieldPolicy] {
        &self.policies
    }

    /// Input-visible fields for `op`
    pub fn fields_for_in(&self, op: OperationAlias) -> Vec<&FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.io.accepts_input(op))
            .collect()
    }

    /// Output-visible fields for `op`
    pub fn fields_for_out(&self, op: OperationAlias) -> Vec<&FieldSpec> {
        self.fields
            .iter()
            .filter(|f| f.io.exposes_output(op))
            .collect()
    }

    pub fn sortable_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.io.sortable).collect()
    }

    pub fn filterable_fields(&self) -> Vec<&FieldSpec> {
        self.fields.iter().filter(|f| f.io.is_filterable()).collect()
    }
}

fn implicit_key() -> FieldSpec {
    FieldSpec::new(IMPLICIT_PK, FieldType::Uuid)
        .primary_key()
        .io(IoSpec::new()
            .out_verbs(OperationAlias::ALL)
            .filter_ops([crate::spec::FilterOp::Eq, crate::spec::FilterOp::In]))
}
