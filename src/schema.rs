//! Structured-output validation.
//!
//! Every model step's record type derives `JsonSchema`. The generated schema
//! is sent to the model as its response format and used here to check what
//! comes back (and what callers hand back in checkpoints) before anything is
//! deserialized into a typed record.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// A single mismatch between a value and its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value (`""` is the root).
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// Why a model response could not be turned into a typed record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Not JSON at all.
    Malformed(String),
    /// JSON, but not the declared shape.
    Violations(Vec<SchemaViolation>),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "malformed JSON: {}", msg),
            DecodeError::Violations(violations) => {
                let joined: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
                write!(f, "schema violations: {}", joined.join("; "))
            }
        }
    }
}

/// Generated JSON Schema for `T`, with nested types under `$defs`.
pub fn schema_to_json_value<T: JsonSchema>() -> Value {
    schema_for!(T).to_value()
}

/// A record a model step produces.
pub trait StructuredOutput: DeserializeOwned + JsonSchema {
    /// Name sent alongside the schema; must match `^[a-zA-Z0-9_-]+$`.
    const NAME: &'static str;

    fn schema() -> Value {
        schema_to_json_value::<Self>()
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Walks `schema` and `value` together, collecting every violation.
///
/// `$ref`s are resolved against `schema` itself, which is the root.
pub fn validate(schema: &Value, value: &Value) -> Result<(), Vec<SchemaViolation>> {
    let mut violations = Vec::new();
    walk(schema, schema, value, String::new(), &mut violations);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn resolve<'a>(root: &'a Value, reference: &str) -> Option<&'a Value> {
    reference.strip_prefix('#').and_then(|pointer| root.pointer(pointer))
}

fn walk(
    root: &Value,
    schema: &Value,
    value: &Value,
    path: String,
    out: &mut Vec<SchemaViolation>,
) {
    let Some(schema) = schema.as_object() else {
        if schema == &Value::Bool(false) {
            out.push(SchemaViolation {
                path,
                message: "no value is allowed here".to_string(),
            });
        }
        return;
    };

    if let Some(reference) = schema.get("$ref").and_then(|r| r.as_str()) {
        match resolve(root, reference) {
            Some(target) => walk(root, target, value, path.clone(), out),
            None => out.push(SchemaViolation {
                path: path.clone(),
                message: format!("unresolvable schema reference {}", reference),
            }),
        }
    }

    for keyword in ["anyOf", "oneOf"] {
        if let Some(branches) = schema.get(keyword).and_then(|b| b.as_array()) {
            let matched = branches.iter().any(|branch| {
                let mut scratch = Vec::new();
                walk(root, branch, value, path.clone(), &mut scratch);
                scratch.is_empty()
            });
            if !matched {
                out.push(SchemaViolation {
                    path: path.clone(),
                    message: format!("{} matches none of the allowed shapes", type_name(value)),
                });
                return;
            }
        }
    }

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(single) => vec![single.as_str()],
            Value::Array(many) => many.iter().filter_map(|t| t.as_str()).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            out.push(SchemaViolation {
                path,
                message: format!("expected {}, found {}", allowed.join(" or "), type_name(value)),
            });
            // Nothing below makes sense against the wrong type
            return;
        }
    }

    if let Some(expected) = schema.get("const") {
        if expected != value {
            out.push(SchemaViolation {
                path: path.clone(),
                message: format!("expected {}, found {}", expected, value),
            });
        }
    }

    if let Some(options) = schema.get("enum").and_then(|e| e.as_array()) {
        if !options.contains(value) {
            let listed: Vec<String> = options.iter().map(|o| o.to_string()).collect();
            out.push(SchemaViolation {
                path: path.clone(),
                message: format!("{} is not one of [{}]", value, listed.join(", ")),
            });
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if number < min {
                out.push(SchemaViolation {
                    path: path.clone(),
                    message: format!("{} is below minimum {}", number, min),
                });
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if number > max {
                out.push(SchemaViolation {
                    path: path.clone(),
                    message: format!("{} is above maximum {}", number, max),
                });
            }
        }
    }

    match value {
        Value::Object(fields) => walk_object(root, schema, fields, &path, out),
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(|m| m.as_u64()) {
                if (items.len() as u64) < min {
                    out.push(SchemaViolation {
                        path: path.clone(),
                        message: format!("expected at least {} items, found {}", min, items.len()),
                    });
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (idx, item) in items.iter().enumerate() {
                    walk(root, item_schema, item, format!("{}/{}", path, idx), out);
                }
            }
        }
        _ => {}
    }
}

fn walk_object(
    root: &Value,
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
    out: &mut Vec<SchemaViolation>,
) {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for name in required.iter().filter_map(|n| n.as_str()) {
            if !fields.contains_key(name) {
                out.push(SchemaViolation {
                    path: format!("{}/{}", path, escape_pointer(name)),
                    message: "required field is missing".to_string(),
                });
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    if let Some(properties) = properties {
        for (name, property_schema) in properties {
            if let Some(field) = fields.get(name) {
                walk(
                    root,
                    property_schema,
                    field,
                    format!("{}/{}", path, escape_pointer(name)),
                    out,
                );
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        for name in fields.keys() {
            if !properties.is_some_and(|p| p.contains_key(name)) {
                out.push(SchemaViolation {
                    path: format!("{}/{}", path, escape_pointer(name)),
                    message: "field is not part of the declared shape".to_string(),
                });
            }
        }
    }
}

/// Pulls the JSON payload out of a model reply, tolerating a Markdown fence.
pub fn extract_json_payload(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Parse, validate against the generated schema, then deserialize. Decode-or-fail.
pub fn decode_structured<T: StructuredOutput>(content: &str) -> Result<T, DecodeError> {
    let payload = extract_json_payload(content);
    let value: Value =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode_value(value)
}

/// Validate an already-parsed value against `T`'s schema, then deserialize.
pub fn decode_value<T: DeserializeOwned + JsonSchema>(value: Value) -> Result<T, DecodeError> {
    validate(&schema_to_json_value::<T>(), &value).map_err(DecodeError::Violations)?;

    // The schema is a subset of what serde checks (e.g. u8 ranges), so a
    // residual serde failure is still a shape failure
    serde_json::from_value(value).map_err(|e| {
        DecodeError::Violations(vec![SchemaViolation {
            path: String::new(),
            message: e.to_string(),
        }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string" },
                "score": { "type": ["integer", "null"], "minimum": 300, "maximum": 900 },
                "level": { "$ref": "#/$defs/Level" },
                "items": { "type": "array", "items": { "type": "number", "minimum": 0 } },
            },
            "required": ["name", "level", "items"],
            "additionalProperties": false,
            "$defs": {
                "Level": { "type": "string", "enum": ["Low", "High"] }
            }
        })
    }

    #[test]
    fn test_accepts_conforming_value() {
        let value = json!({ "name": "A", "score": 750, "level": "Low", "items": [1, 2.5] });
        assert!(validate(&sample_schema(), &value).is_ok());

        let nullable = json!({ "name": "A", "score": null, "level": "High", "items": [] });
        assert!(validate(&sample_schema(), &nullable).is_ok());
    }

    #[test]
    fn test_reports_every_violation_with_paths() {
        let value = json!({ "score": 950, "level": "Medium", "items": [1, -3, "x"] });
        let violations = validate(&sample_schema(), &value).unwrap_err();
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();

        assert!(paths.contains(&"/name"));
        assert!(paths.contains(&"/score"));
        assert!(paths.contains(&"/level"));
        assert!(paths.contains(&"/items/1"));
        assert!(paths.contains(&"/items/2"));
        assert_eq!(violations.len(), 5);
    }

    #[test]
    fn test_undeclared_fields_are_rejected() {
        let value = json!({ "name": "A", "level": "Low", "items": [], "injected": "extra" });
        let violations = validate(&sample_schema(), &value).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/injected");
    }

    #[test]
    fn test_any_of_accepts_either_branch() {
        let schema = json!({
            "anyOf": [{ "$ref": "#/$defs/Inner" }, { "type": "null" }],
            "$defs": { "Inner": { "type": "object", "required": ["a"] } }
        });
        assert!(validate(&schema, &json!(null)).is_ok());
        assert!(validate(&schema, &json!({ "a": 1 })).is_ok());
        assert!(validate(&schema, &json!({ "b": 1 })).is_err());
        assert!(validate(&schema, &json!("x")).is_err());
    }

    #[test]
    fn test_dangling_reference_fails_closed() {
        let schema = json!({ "$ref": "#/$defs/Missing" });
        assert!(validate(&schema, &json!(1)).is_err());
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let schema = json!({ "type": "integer" });
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_err());
    }

    #[test]
    fn test_min_items() {
        let schema = json!({ "type": "array", "minItems": 1 });
        assert!(validate(&schema, &json!([])).is_err());
        assert!(validate(&schema, &json!([0])).is_ok());
    }

    #[test]
    fn test_extract_json_payload_strips_fence() {
        assert_eq!(extract_json_payload("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_payload("```\n[1]\n```\n"), "[1]");
        assert_eq!(extract_json_payload("  {\"a\":1} "), "{\"a\":1}");
    }
}
