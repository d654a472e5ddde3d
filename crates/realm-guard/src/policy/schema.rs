//! Request payload schemas.
//!
//! The policy composer only needs a yes/no answer plus a readable reason, so
//! schemas sit behind the [`PayloadSchema`] trait. [`RequiredFields`] covers
//! the common "object with these typed fields" case.

use serde_json::Value;
use std::fmt;

/// Structural validation of a JSON request body.
pub trait PayloadSchema: Send + Sync {
    /// Validate `payload`, returning every violation found.
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>>;
}

/// JSON value kinds a field may be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl JsonKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Number => value.is_number(),
            JsonKind::Integer => value.is_i64() || value.is_u64(),
            JsonKind::Boolean => value.is_boolean(),
            JsonKind::Array => value.is_array(),
            JsonKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JsonKind::String => "string",
            JsonKind::Number => "number",
            JsonKind::Integer => "integer",
            JsonKind::Boolean => "boolean",
            JsonKind::Array => "array",
            JsonKind::Object => "object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    kind: JsonKind,
    required: bool,
}

/// Object schema listing required (and optionally typed) fields.
///
/// ```rust,ignore
/// let schema = RequiredFields::new()
///     .field("title", JsonKind::String)
///     .optional("description", JsonKind::String);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequiredFields {
    rules: Vec<FieldRule>,
}

impl RequiredFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `name` to be present with the given kind.
    pub fn field(mut self, name: &str, kind: JsonKind) -> Self {
        self.rules.push(FieldRule {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// If `name` is present and not null, it must have the given kind.
    pub fn optional(mut self, name: &str, kind: JsonKind) -> Self {
        self.rules.push(FieldRule {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }
}

impl PayloadSchema for RequiredFields {
    fn validate(&self, payload: &Value) -> Result<(), Vec<String>> {
        let Some(object) = payload.as_object() else {
            return Err(vec!["payload must be a JSON object".to_string()]);
        };

        let mut errors = Vec::new();
        for rule in &self.rules {
            match object.get(&rule.name) {
                None | Some(Value::Null) if rule.required => {
                    errors.push(format!("'{}' is required", rule.name));
                }
                None | Some(Value::Null) => {}
                Some(value) if !rule.kind.matches(value) => {
                    errors.push(format!("'{}' must be of type {}", rule.name, rule.kind));
                }
                Some(Value::String(s)) if rule.required && s.trim().is_empty() => {
                    errors.push(format!("'{}' must not be empty", rule.name));
                }
                Some(_) => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
