// SPDX-License-Identifier: MIT OR Apache-2.0
//! Placeholder parsing and substitution.
//!
//! A placeholder is `${node}` (the whole result of `node`) or
//! `${node.field}` (one field of it; dots traverse nested objects). A string
//! that *is* a placeholder is substituted structurally, preserving the JSON
//! type of the referenced value; placeholders *inside* a longer string are
//! substituted textually, with structured values rendered as compact JSON.

use serde_json::Value;
use thiserror::Error;

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    /// Referenced node id (or the reserved name `global`).
    pub node: String,
    /// Optional field path within the node's result, dot-separated.
    pub field: Option<String>,
}

impl Placeholder {
    fn parse_inner(inner: &str) -> Option<Self> {
        if inner.is_empty() {
            return None;
        }
        match inner.split_once('.') {
            Some((node, field)) if !node.is_empty() && !field.is_empty() => Some(Self {
                node: node.to_string(),
                field: Some(field.to_string()),
            }),
            Some(_) => None,
            None => Some(Self {
                node: inner.to_string(),
                field: None,
            }),
        }
    }
}

/// Errors from placeholder substitution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The referenced node has no recorded result.
    #[error("reference_missing: node '{node}' has no result")]
    NodeMissing {
        /// Referenced node id.
        node: String,
    },
    /// The referenced field is absent from the node's result.
    #[error("reference_missing: field '{field}' is absent from the result of '{node}'")]
    FieldMissing {
        /// Referenced node id.
        node: String,
        /// Field path that failed to resolve.
        field: String,
    },
}

/// Parse a string that consists of exactly one placeholder.
#[must_use]
pub fn full_placeholder(s: &str) -> Option<Placeholder> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.contains('}') {
        return None;
    }
    Placeholder::parse_inner(inner)
}

/// Find every placeholder embedded in a string.
#[must_use]
pub fn embedded_placeholders(s: &str) -> Vec<Placeholder> {
    let mut found = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        if let Some(p) = Placeholder::parse_inner(&after[..end]) {
            found.push(p);
        }
        rest = &after[end + 1..];
    }
    found
}

/// Collect every placeholder referenced anywhere in a template.
#[must_use]
pub fn collect(template: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    walk(template, &mut found);
    found
}

fn walk(value: &Value, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(s) => {
            if let Some(p) = full_placeholder(s) {
                found.push(p);
            } else {
                found.extend(embedded_placeholders(s));
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, found);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk(item, found);
            }
        }
        _ => {}
    }
}

/// Substitute every placeholder in `template` using `lookup` to fetch node
/// results.
///
/// # Errors
///
/// [`ResolveError`] when a referenced node or field is absent.
pub fn resolve(
    template: &Value,
    lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Value, ResolveError> {
    match template {
        Value::String(s) => resolve_string(s, lookup),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve(item, lookup)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve(item, lookup)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    s: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Value, ResolveError> {
    // Whole-string placeholder: structural substitution.
    if let Some(p) = full_placeholder(s) {
        return lookup_value(&p, lookup);
    }

    if !s.contains("${") {
        return Ok(Value::String(s.to_string()));
    }

    // Embedded placeholders: textual substitution.
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated; keep the remainder literally.
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        match Placeholder::parse_inner(&after[..end]) {
            Some(p) => {
                let value = lookup_value(&p, lookup)?;
                out.push_str(&render_text(&value));
            }
            None => {
                // Not a well-formed reference; keep it literally.
                out.push_str(&rest[start..start + 2 + end + 1]);
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn lookup_value(
    p: &Placeholder,
    lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Value, ResolveError> {
    let result = lookup(&p.node).ok_or_else(|| ResolveError::NodeMissing {
        node: p.node.clone(),
    })?;
    let Some(field) = &p.field else {
        return Ok(result);
    };

    let mut current = &result;
    for segment in field.split('.') {
        current = current
            .as_object()
            .and_then(|map| map.get(segment))
            .ok_or_else(|| ResolveError::FieldMissing {
                node: p.node.clone(),
                field: field.clone(),
            })?;
    }
    Ok(current.clone())
}

fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        structured => serde_json::to_string(structured).unwrap_or_default(),
    }
}
