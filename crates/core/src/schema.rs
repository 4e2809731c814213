//! Structured output schemas.
//!
//! An agent with an [`OutputSchema`] must reply with a JSON object that
//! matches it. The schema is sent to the provider as a response-format
//! constraint and checked again on the way back, since not every backend
//! honours the constraint.
//!
//! Validation covers the subset of JSON Schema agents actually use:
//! top-level `object`, `required` properties, primitive `type` checks and
//! `enum` membership.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named JSON schema describing an agent's structured reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name (sent to providers that require one)
    pub name: String,

    /// JSON Schema document; must describe an object
    pub schema: Value,
}

impl OutputSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Build an object schema whose fields are all required strings.
    ///
    /// Covers the common "record of text fields" case such as
    /// `{ restaurant_name, reason }` or `{ subject, body }`.
    pub fn string_fields(name: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        let mut properties = serde_json::Map::new();
        for (field, description) in fields {
            properties.insert(
                (*field).to_string(),
                serde_json::json!({ "type": "string", "description": description }),
            );
        }
        let required: Vec<&str> = fields.iter().map(|(f, _)| *f).collect();
        Self::new(
            name,
            serde_json::json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        )
    }

    /// Names of required properties.
    pub fn required_fields(&self) -> Vec<&str> {
        self.schema["required"]
            .as_array()
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Parse raw model text into a value and validate it.
    pub fn parse(&self, raw: &str) -> Result<Value, String> {
        let body = strip_code_fence(raw);
        let value: Value =
            serde_json::from_str(body).map_err(|e| format!("reply is not valid JSON: {e}"))?;
        self.validate(&value)?;
        Ok(value)
    }

    /// Validate an already-parsed value against the schema.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(obj) = value.as_object() else {
            return Err("expected a JSON object".into());
        };

        for field in self.required_fields() {
            if !obj.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }

        let Some(properties) = self.schema["properties"].as_object() else {
            return Ok(());
        };

        for (field, property) in properties {
            let Some(actual) = obj.get(field) else {
                continue;
            };
            if let Some(expected) = property["type"].as_str() {
                if !type_matches(expected, actual) {
                    return Err(format!("field '{field}' should be of type {expected}"));
                }
            }
            if let Some(allowed) = property["enum"].as_array() {
                if !allowed.contains(actual) {
                    return Err(format!("field '{field}' has a value outside its enum"));
                }
            }
        }

        if self.schema["additionalProperties"] == Value::Bool(false) {
            if let Some(extra) = obj.keys().find(|k| !properties.contains_key(*k)) {
                return Err(format!("unexpected field '{extra}'"));
            }
        }

        Ok(())
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Strip a surrounding Markdown code fence (```json ... ```), if present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop the info string ("json") on the opening fence line.
    match rest.find('\n') {
        Some(idx) => rest[idx + 1..].trim(),
        None => rest.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn foodie_schema() -> OutputSchema {
        OutputSchema::string_fields(
            "FoodieResponse",
            &[
                ("restaurant_name", "The name of the recommended restaurant"),
                ("reason", "Brief reason why this was chosen"),
            ],
        )
    }

    #[test]
    fn parses_plain_json() {
        let value = foodie_schema()
            .parse(r#"{"restaurant_name": "Britannia & Co.", "reason": "Iconic berry pulao"}"#)
            .unwrap();
        assert_eq!(value["restaurant_name"], "Britannia & Co.");
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"restaurant_name\": \"Burma Burma\", \"reason\": \"Khow suey\"}\n```";
        let value = foodie_schema().parse(raw).unwrap();
        assert_eq!(value["reason"], "Khow suey");
    }

    #[test]
    fn rejects_missing_field() {
        let err = foodie_schema().parse(r#"{"restaurant_name": "X"}"#).unwrap_err();
        assert!(err.contains("reason"));
    }

    #[test]
    fn rejects_wrong_type() {
        let err = foodie_schema()
            .parse(r#"{"restaurant_name": 42, "reason": "r"}"#)
            .unwrap_err();
        assert!(err.contains("restaurant_name"));
    }

    #[test]
    fn rejects_extra_field_when_closed() {
        let err = foodie_schema()
            .parse(r#"{"restaurant_name": "X", "reason": "r", "price": "$$"}"#)
            .unwrap_err();
        assert!(err.contains("price"));
    }

    #[test]
    fn rejects_free_text() {
        assert!(foodie_schema().parse("I recommend Burma Burma.").is_err());
    }

    #[test]
    fn enforces_enum() {
        let schema = OutputSchema::new(
            "Route",
            json!({
                "type": "object",
                "properties": { "route": { "type": "string", "enum": ["a", "b"] } },
                "required": ["route"]
            }),
        );
        assert!(schema.validate(&json!({"route": "a"})).is_ok());
        assert!(schema.validate(&json!({"route": "c"})).is_err());
    }
}
