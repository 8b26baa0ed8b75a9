//! Tool argument schemas.
//!
//! Each tool declares its arguments as a small typed table. Validation
//! applies defaults for omitted optional fields, coerces losslessly where
//! possible, and rejects anything else with a message the model can act on.

use serde_json::{Map, Value, json};

/// Argument value type. `Any` accepts every shape and is described to the
/// model in prose only (used where an argument legitimately takes more than
/// one form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Integer,
    Boolean,
    StringArray,
    Any,
}

impl ArgKind {
    fn json_type(self) -> Option<Value> {
        match self {
            ArgKind::String => Some(json!("string")),
            ArgKind::Integer => Some(json!("integer")),
            ArgKind::Boolean => Some(json!("boolean")),
            ArgKind::StringArray => Some(json!("array")),
            ArgKind::Any => None,
        }
    }
}

/// Declaration of one tool argument.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    pub kind: ArgKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: &'static str,
}

impl ArgSpec {
    pub fn required(kind: ArgKind, description: &'static str) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            description,
        }
    }

    pub fn optional(kind: ArgKind, description: &'static str) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            description,
        }
    }

    pub fn with_default(kind: ArgKind, default: Value, description: &'static str) -> Self {
        Self {
            kind,
            required: false,
            default: Some(default),
            description,
        }
    }
}

/// Declaration of one tool: name, model-facing description, argument table.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub args: Vec<(&'static str, ArgSpec)>,
}

impl ToolSpec {
    /// Provider-facing JSON schema for this tool.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.args {
            let mut property = Map::new();
            if let Some(json_type) = spec.kind.json_type() {
                property.insert("type".into(), json_type);
            }
            property.insert("description".into(), json!(spec.description));
            if spec.kind == ArgKind::StringArray {
                property.insert("items".into(), json!({ "type": "string" }));
            }
            properties.insert((*name).into(), Value::Object(property));
            if spec.required {
                required.push(json!(name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate and coerce arguments. Returns the normalized argument
    /// object or a message suitable for reporting back to the model.
    pub fn validate(&self, args: &Value) -> Result<Value, String> {
        let incoming = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(format!(
                    "arguments must be an object, got {}",
                    type_name(other)
                ));
            }
        };

        let mut normalized = incoming.clone();
        for (name, spec) in &self.args {
            match incoming.get(*name) {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(format!("missing required argument: {name}"));
                    }
                    if let Some(default) = &spec.default {
                        normalized.insert((*name).into(), default.clone());
                    } else {
                        normalized.remove(*name);
                    }
                }
                Some(value) => {
                    let coerced = coerce(value, spec.kind)
                        .ok_or_else(|| format!("argument {name}: {}", mismatch(value, spec.kind)))?;
                    normalized.insert((*name).into(), coerced);
                }
            }
        }

        Ok(Value::Object(normalized))
    }
}

fn coerce(value: &Value, kind: ArgKind) -> Option<Value> {
    match (kind, value) {
        (ArgKind::String, Value::String(_)) => Some(value.clone()),
        (ArgKind::String, Value::Number(n)) => Some(json!(n.to_string())),
        (ArgKind::String, Value::Bool(b)) => Some(json!(b.to_string())),
        (ArgKind::Integer, Value::Number(n)) => n.as_i64().map(|i| json!(i)),
        (ArgKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
        (ArgKind::Boolean, Value::Bool(_)) => Some(value.clone()),
        (ArgKind::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(json!(true)),
            "false" => Some(json!(false)),
            _ => None,
        },
        (ArgKind::StringArray, Value::Array(items)) => {
            let strings: Option<Vec<Value>> = items
                .iter()
                .map(|item| coerce(item, ArgKind::String))
                .collect();
            strings.map(Value::Array)
        }
        (ArgKind::StringArray, Value::String(s)) => Some(json!([s])),
        (ArgKind::Any, _) => Some(value.clone()),
        _ => None,
    }
}

fn mismatch(value: &Value, kind: ArgKind) -> String {
    format!("expected {kind:?}, got {}", type_name(value))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
