use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use strum_macros::Display;

use crate::errors::FieldViolation;

/// Primitive types a tool input field can take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|v| v.is_finite() && v.fract() == 0.0)
            }
            FieldType::Boolean => value.is_boolean(),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
}

/// Structural description of a tool's input: an object with named primitive fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    fields: Vec<FieldSchema>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required<N, D>(self, name: N, field_type: FieldType, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        self.field(name, field_type, description, true)
    }

    pub fn optional<N, D>(self, name: N, field_type: FieldType, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        self.field(name, field_type, description, false)
    }

    fn field<N, D>(mut self, name: N, field_type: FieldType, description: D, required: bool) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        self.fields.push(FieldSchema {
            name: name.into(),
            field_type,
            description: description.into(),
            required,
        });
        self
    }

    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Render as the JSON schema object sent to the backend
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": field.field_type.to_string(),
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check `input` against the schema, reporting every offending field.
    ///
    /// Fields not named by the schema are ignored. A `null` optional field counts as absent.
    pub fn validate(&self, input: &Value) -> Result<(), Vec<FieldViolation>> {
        let object = match input {
            Value::Object(object) => object,
            // Backends send no arguments at all for parameterless calls
            Value::Null if self.fields.iter().all(|field| !field.required) => return Ok(()),
            other => {
                return Err(vec![FieldViolation::new(
                    "$",
                    format!("expected object, found {}", json_type_name(other)),
                )])
            }
        };

        let mut violations = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        violations.push(FieldViolation::new(&field.name, "required field is missing"));
                    }
                }
                Some(value) if !field.field_type.accepts(value) => {
                    violations.push(FieldViolation::new(
                        &field.name,
                        format!("expected {}, found {}", field.field_type, json_type_name(value)),
                    ));
                }
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
