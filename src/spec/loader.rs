//! Model declaration loader
//!
//! Reads model declarations from JSON files, one model per file. Verbs and
//! filter operators are spelled as strings and rejected with a `SpecError`
//! when unrecognized. Default factories are referenced by name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::errors::{SpecError, SpecResult};
use super::table::ModelSpec;
use super::types::{DefaultFactory, FieldSpec, FieldType, FilterOp, IoSpec, OperationAlias};
use crate::policy::FieldPolicy;

/// Factory producing the current UTC time as RFC 3339
pub fn utc_now() -> DefaultFactory {
    Arc::new(|_| Value::String(chrono::Utc::now().to_rfc3339()))
}

/// Factory producing a random v4 UUID string
pub fn uuid4() -> DefaultFactory {
    Arc::new(|_| Value::String(uuid::Uuid::new_v4().to_string()))
}

fn named_factory(name: &str) -> Option<DefaultFactory> {
    match name {
        "utc_now" => Some(utc_now()),
        "uuid4" => Some(uuid4()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawModel {
    model: String,
    #[serde(default)]
    disabled: Vec<String>,
    fields: Vec<RawField>,
    #[serde(default)]
    policies: Vec<FieldPolicy>,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    field_type: FieldType,
    #[serde(default = "default_true")]
    nullable: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    default_factory: Option<String>,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    foreign_key: Option<String>,
    #[serde(default)]
    required_in: Vec<String>,
    #[serde(default)]
    io: RawIo,
}

#[derive(Debug, Deserialize)]
struct RawIo {
    #[serde(default)]
    in_verbs: Vec<String>,
    #[serde(default)]
    out_verbs: Vec<String>,
    #[serde(default)]
    mutable_verbs: Option<Vec<String>>,
    #[serde(default)]
    filter_ops: Vec<String>,
    #[serde(default)]
    sortable: bool,
    #[serde(default)]
    alias_in: Option<String>,
    #[serde(default)]
    alias_out: Option<String>,
    #[serde(default = "default_true")]
    allow_in: bool,
    #[serde(default = "default_true")]
    allow_out: bool,
    #[serde(default)]
    sensitive: bool,
    #[serde(default)]
    redact_last: Option<usize>,
}

impl Default for RawIo {
    fn default() -> Self {
        Self {
            in_verbs: Vec::new(),
            out_verbs: Vec::new(),
            mutable_verbs: None,
            filter_ops: Vec::new(),
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

fn default_true() -> bool {
    true
}

fn parse_verbs(verbs: &[String]) -> SpecResult<Vec<OperationAlias>> {
    verbs.iter().map(|v| v.parse()).collect()
}

impl RawIo {
    fn into_io(self) -> SpecResult<IoSpec> {
        let mut io = IoSpec::new()
            .in_verbs(parse_verbs(&self.in_verbs)?)
            .out_verbs(parse_verbs(&self.out_verbs)?)
            .filter_ops(
                self.filter_ops
                    .iter()
                    .map(|op| op.parse::<FilterOp>())
                    .collect::<SpecResult<Vec<_>>>()?,
            )
            .allow_in(self.allow_in)
            .allow_out(self.allow_out);
        if let Some(mutable) = &self.mutable_verbs {
            io = io.mutable_verbs(parse_verbs(mutable)?);
        }
        io.sortable = self.sortable;
        io.alias_in = self.alias_in;
        io.alias_out = self.alias_out;
        io.sensitive = self.sensitive;
        io.redact_last = self.redact_last;
        Ok(io)
    }
}

impl RawField {
    fn into_spec(self) -> SpecResult<FieldSpec> {
        let name = self.name;
        let with_field = |e: SpecError| e.with_field(name.clone());

        let mut spec = FieldSpec::new(name.clone(), self.field_type)
            .nullable(self.nullable)
            .required_in(parse_verbs(&self.required_in).map_err(with_field)?)
            .io(self.io.into_io().map_err(with_field)?);
        spec.default = self.default;
        spec.unique = self.unique;
        spec.foreign_key = self.foreign_key;
        if self.primary_key {
            spec = spec.primary_key();
        }
        if let Some(factory) = self.default_factory {
            spec.default_factory = Some(named_factory(&factory).ok_or_else(|| {
                SpecError::invalid(format!("Unknown default factory '{}'", factory))
                    .with_field(name.clone())
            })?);
        }
        Ok(spec)
    }
}

/// Parses one model declaration from JSON text
pub fn parse_model(json: &str) -> SpecResult<ModelSpec> {
    let raw: RawModel = serde_json::from_str(json)
        .map_err(|e| SpecError::invalid(format!("Invalid model declaration: {}", e)))?;

    let model = raw.model;
    let with_model = |e: SpecError| e.with_model(model.clone());

    let mut spec = ModelSpec::new(model.clone());
    for field in raw.fields {
        spec = spec.field(field.into_spec().map_err(with_model)?);
    }
    for op in parse_verbs(&raw.disabled).map_err(with_model)? {
        spec = spec.disable(op);
    }
    for policy in raw.policies {
        spec = spec.policy(policy);
    }
    Ok(spec)
}

/// Loads model declarations from a directory of `*.json` files
pub struct ModelLoader {
    model_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Loads every declaration, sorted by file name for deterministic
    /// registration order.
    pub fn load_all(&self) -> SpecResult<Vec<ModelSpec>> {
        let entries = fs::read_dir(&self.model_dir).map_err(|e| {
            SpecError::invalid(format!(
                "Failed to read model directory '{}': {}",
                self.model_dir.display(),
                e
            ))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| SpecError::invalid(format!("Failed to read directory entry: {}", e)))?
                .path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.iter().map(|p| Self::load_file(p)).collect()
    }

    /// Loads a single declaration file
    pub fn load_file(path: &Path) -> SpecResult<ModelSpec> {
        let content = fs::read_to_string(path).map_err(|e| {
            SpecError::invalid(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        parse_model(&content)
    }
}
