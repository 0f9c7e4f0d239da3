//! Per-operation input/output contracts
//!
//! Derived from a [`SpecTable`] once per (model, operation) and frozen into
//! the compiled chain's [`OpView`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::crud::session::Row;
use crate::spec::{FieldSpec, FieldType, OperationAlias, SpecTable};

/// One field as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaField {
    pub name: String,
    pub wire_name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub required: bool,
    pub has_default: bool,
    pub primary_key: bool,
    pub sensitive: bool,
    pub redact_last: Option<usize>,
}

impl SchemaField {
    fn new(field: &FieldSpec, op: OperationAlias, wire_name: &str) -> Self {
        Self {
            name: field.name.clone(),
            wire_name: wire_name.to_string(),
            field_type: field.field_type,
            nullable: field.nullable,
            required: field.required_in.contains(&op),
            has_default: field.has_default(),
            primary_key: field.primary_key,
            sensitive: field.io.sensitive,
            redact_last: field.io.redact_last,
        }
    }

    pub fn is_masked(&self) -> bool {
        self.sensitive || self.redact_last.is_some()
    }

    fn json_schema(&self) -> Value {
        let mut schema = Map::new();
        let base = self.field_type.json_type();
        if self.field_type != FieldType::Json {
            schema.insert(
                "type".to_string(),
                if self.nullable {
                    json!([base, "null"])
                } else {
                    json!(base)
                },
            );
        }
        match self.field_type {
            FieldType::Uuid => {
                schema.insert("format".to_string(), json!("uuid"));
            }
            FieldType::DateTime => {
                schema.insert("format".to_string(), json!("date-time"));
            }
            _ => {}
        }
        if self.is_masked() {
            schema.insert("x-masked".to_string(), json!(true));
        }
        Value::Object(schema)
    }
}

fn object_schema(title: String, fields: &[SchemaField], required: Vec<&str>) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|f| (f.wire_name.clone(), f.json_schema()))
        .collect();
    json!({
        "title": title,
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Request contract of one operation
#[derive(Debug, Clone, Serialize)]
pub struct SchemaIn {
    pub model: String,
    pub op: OperationAlias,
    pub fields: Vec<SchemaField>,
}

impl SchemaIn {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Maps wire keys to field names, dropping keys outside the contract.
    ///
    /// The alias wins when both the alias and the field name are present.
    pub fn decode(&self, payload: &Map<String, Value>) -> Row {
        let mut row = Row::new();
        for field in &self.fields {
            let value = payload
                .get(&field.wire_name)
                .or_else(|| payload.get(&field.name));
            if let Some(value) = value {
                row.insert(field.name.clone(), value.clone());
            }
        }
        row
    }

    /// JSON Schema titled `<Model><Op>Request`
    pub fn to_json_schema(&self) -> Value {
        let required = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.wire_name.as_str())
            .collect();
        let row = object_schema(
            format!("{}{}Request", self.model, self.op.title()),
            &self.fields,
            required,
        );
        if self.op.is_bulk() {
            json!({
                "title": row["title"].clone(),
                "type": "array",
                "items": row,
            })
        } else {
            row
        }
    }
}

/// Response contract of one operation
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOut {
    pub model: String,
    pub op: OperationAlias,
    pub fields: Vec<SchemaField>,
}

impl SchemaOut {
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Projects a stored row onto the contract under output names.
    ///
    /// Fields absent from the row are emitted as `null`.
    pub fn encode(&self, row: &Row) -> Value {
        let projected: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.wire_name.clone(),
                    row.get(&f.name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect();
        Value::Object(projected)
    }

    /// JSON Schema titled `<Model><Op>Response`
    pub fn to_json_schema(&self) -> Value {
        let title = format!("{}{}Response", self.model, self.op.title());
        if self.op.returns_count() {
            return json!({
                "title": title,
                "type": "object",
                "properties": {"deleted": {"type": "integer"}},
                "required": ["deleted"],
                "additionalProperties": false,
            });
        }
        let required = self.fields.iter().map(|f| f.wire_name.as_str()).collect();
        let row = object_schema(title.clone(), &self.fields, required);
        if self.op.returns_rows() {
            json!({"title": title, "type": "array", "items": row})
        } else {
            row
        }
    }
}

/// Accepted list parameters of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListParams {
    /// `field` and `field__op` keys
    pub filters: Vec<String>,
    /// `field` and `-field` keys
    pub sort: Vec<String>,
}

/// Compiled, read-only view of one (model, operation)
#[derive(Debug)]
pub struct OpView {
    table: Arc<SpecTable>,
    op: OperationAlias,
    schema_in: SchemaIn,
    schema_out: SchemaOut,
}

impl OpView {
    pub fn table(&self) -> &SpecTable {
        &self.table
    }

    pub fn op(&self) -> OperationAlias {
        self.op
    }

    pub fn model(&self) -> &str {
        self.table.model()
    }

    pub fn schema_in(&self) -> &SchemaIn {
        &self.schema_in
    }

    pub fn schema_out(&self) -> &SchemaOut {
        &self.schema_out
    }
}

/// Derives contracts from spec tables
pub struct SchemaCompiler;

impl SchemaCompiler {
    /// Input-visible fields under their input names
    pub fn compile_in(table: &SpecTable, op: OperationAlias) -> SchemaIn {
        SchemaIn {
            model: table.model().to_string(),
            op,
            fields: table
                .fields_for_in(op)
                .into_iter()
                .map(|f| SchemaField::new(f, op, f.wire_name_in()))
                .collect(),
        }
    }

    /// Output-visible fields under their output names
    pub fn compile_out(table: &SpecTable, op: OperationAlias) -> SchemaOut {
        SchemaOut {
            model: table.model().to_string(),
            op,
            fields: table
                .fields_for_out(op)
                .into_iter()
                .map(|f| SchemaField::new(f, op, f.wire_name_out()))
                .collect(),
        }
    }

    pub fn list_params(table: &SpecTable) -> ListParams {
        let mut filters = Vec::new();
        for field in table.filterable_fields() {
            for op in &field.io.filter_ops {
                filters.push(format!("{}__{}", field.name, op));
            }
            filters.push(field.name.clone());
        }
        filters.sort();
        filters.dedup();

        let sort = table
            .sortable_fields()
            .into_iter()
            .flat_map(|f| [f.name.clone(), format!("-{}", f.name)])
            .collect();

        ListParams { filters, sort }
    }

    pub fn view(table: Arc<SpecTable>, op: OperationAlias) -> OpView {
        let schema_in = Self::compile_in(&table, op);
        let schema_out = Self::compile_out(&table, op);
        OpView {
            table,
            op,
            schema_in,
            schema_out,
        }
    }
}
