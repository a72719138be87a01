// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-schema
//!
//! Thin wrapper over the `jsonschema` crate used at the two validation
//! boundaries: schemas-of-schemas at registration, and inputs/outputs on
//! every invocation. Violations carry a JSON-pointer location, the failed
//! keyword, and a human-readable message.
//!
//! An empty schema (`{}`, `null`, or `true`) is permissive: every document
//! passes without compiling a validator.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde_json::Value;
use thiserror::Error;

/// A schema document that failed to compile.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is not a valid JSON-Schema.
    #[error("invalid schema: {detail}")]
    InvalidSchema {
        /// Compiler diagnostic.
        detail: String,
    },
}

/// One failed schema check against a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// JSON-pointer into the validated document (`""` for the root).
    pub pointer: String,
    /// The schema keyword that failed (`required`, `type`, …).
    pub keyword: String,
    /// Human-readable diagnostic.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "{} ({})", self.message, self.keyword)
        } else {
            write!(f, "{}: {} ({})", self.pointer, self.message, self.keyword)
        }
    }
}

/// A compiled, reusable schema validator.
#[derive(Debug)]
pub struct CompiledSchema {
    validator: Option<jsonschema::Validator>,
}

impl CompiledSchema {
    /// Check one document, returning every violation found.
    #[must_use]
    pub fn validate(&self, document: &Value) -> Vec<Violation> {
        let Some(validator) = &self.validator else {
            return Vec::new();
        };
        validator
            .iter_errors(document)
            .map(|err| Violation {
                pointer: err.instance_path.to_string(),
                keyword: keyword_of(&err.schema_path.to_string()),
                message: err.to_string(),
            })
            .collect()
    }

    /// Fast accept/reject check without collecting violations.
    #[must_use]
    pub fn is_valid(&self, document: &Value) -> bool {
        match &self.validator {
            Some(validator) => validator.is_valid(document),
            None => true,
        }
    }
}

/// Returns `true` for schemas that accept every document.
#[must_use]
pub fn is_permissive(schema: &Value) -> bool {
    match schema {
        Value::Null | Value::Bool(true) => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Compile a schema document, rejecting malformed schemas.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidSchema`] when the document does not
/// compile under its declared draft (2020-12 when `$schema` is absent).
pub fn compile(schema: &Value) -> Result<CompiledSchema, SchemaError> {
    if is_permissive(schema) {
        return Ok(CompiledSchema { validator: None });
    }
    let validator =
        jsonschema::validator_for(schema).map_err(|err| SchemaError::InvalidSchema {
            detail: err.to_string(),
        })?;
    Ok(CompiledSchema {
        validator: Some(validator),
    })
}

/// One-shot convenience: compile `schema` and check `document`.
///
/// # Errors
///
/// Returns [`SchemaError::InvalidSchema`] if the schema itself is bad; an
/// empty violation list means the document passed.
pub fn validate(document: &Value, schema: &Value) -> Result<Vec<Violation>, SchemaError> {
    Ok(compile(schema)?.validate(document))
}

fn keyword_of(schema_path: &str) -> String {
    schema_path
        .rsplit('/')
        .find(|seg| !seg.is_empty() && seg.parse::<usize>().is_err())
        .unwrap_or("schema")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_schema_accepts_everything() {
        for schema in [json!({}), Value::Null, json!(true)] {
            let compiled = compile(&schema).unwrap();
            assert!(compiled.is_valid(&json!({"any": "thing"})));
            assert!(compiled.is_valid(&json!(null)));
            assert!(compiled.validate(&json!([1, 2, 3])).is_empty());
        }
    }

    #[test]
    fn required_field_violation_has_pointer_and_keyword() {
        let schema = json!({
            "type": "object",
            "required": ["value"],
            "properties": {"value": {"type": "number"}}
        });
        let violations = validate(&json!({}), &schema).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].keyword, "required");
        assert_eq!(violations[0].pointer, "");
        assert!(violations[0].message.contains("value"));
    }

    #[test]
    fn nested_violation_points_into_the_document() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": "object", "properties": {"b": {"type": "integer"}}}
            }
        });
        let violations = validate(&json!({"a": {"b": "nope"}}), &schema).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].pointer, "/a/b");
        assert_eq!(violations[0].keyword, "type");
    }

    #[test]
    fn multiple_violations_are_all_reported() {
        let schema = json!({
            "type": "object",
            "required": ["x", "y"],
            "properties": {
                "x": {"type": "integer"},
                "y": {"type": "string"}
            }
        });
        let violations = validate(&json!({"x": "bad"}), &schema).unwrap();
        assert!(violations.len() >= 2, "got {violations:?}");
    }

    #[test]
    fn malformed_schema_is_rejected() {
        let schema = json!({"type": "not-a-type"});
        let err = compile(&schema).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidSchema { .. }));
    }

    #[test]
    fn honors_declared_draft() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": ["value"]
        });
        let compiled = compile(&schema).unwrap();
        assert!(compiled.is_valid(&json!({"value": 1})));
        assert!(!compiled.is_valid(&json!({})));
    }

    #[test]
    fn violation_display_is_readable() {
        let v = Violation {
            pointer: "/a/b".into(),
            keyword: "type".into(),
            message: "\"nope\" is not of type \"integer\"".into(),
        };
        assert_eq!(v.to_string(), "/a/b: \"nope\" is not of type \"integer\" (type)");
    }
}
