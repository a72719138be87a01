// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registration validation.
//!
//! Runs the documented checks in order, accumulating every cheap field
//! violation into one `SKILL_REG_002` response rather than reporting them
//! drip by drip. Code decoding is classified separately (`SKILL_REG_003`),
//! and schema documents are compiled so malformed schemas are rejected at
//! registration instead of on the first invocation.

use semver::Version;
use serde_json::{Value, json};
use sp_core::{Language, RegisterRequest, TIMEOUT_MAX_SECONDS, TIMEOUT_MIN_SECONDS};
use sp_error::{ErrorCode, SkillError};

/// A registration request that passed every check, with typed fields.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// Caller-chosen identifier.
    pub skill_id: String,
    /// Display name.
    pub skill_name: String,
    /// Description.
    pub description: String,
    /// Parsed semantic version.
    pub version: Version,
    /// Parsed language.
    pub language: Language,
    /// Decoded, non-empty code blob.
    pub code: Vec<u8>,
    /// Timeout within the allowed range.
    pub timeout_seconds: u64,
    /// Opaque dependency manifest.
    pub dependencies: Value,
    /// Input schema (`{}` when omitted), known to compile.
    pub input_schema: Value,
    /// Output schema (`{}` when omitted), known to compile.
    pub output_schema: Value,
    /// Author attribution.
    pub author: String,
    /// License identifier.
    pub license: String,
    /// Discovery category.
    pub category: String,
}

/// Validate a raw registration request.
pub(crate) fn validate(request: RegisterRequest) -> Result<ValidatedRequest, SkillError> {
    let mut violations: Vec<String> = Vec::new();

    if request.skill_id.trim().is_empty() {
        violations.push("skill_id must not be empty".into());
    }
    if request.skill_name.trim().is_empty() {
        violations.push("skill_name must not be empty".into());
    }

    let language = match Language::parse(&request.language) {
        Some(language) => Some(language),
        None => {
            violations.push(format!(
                "language '{}' is not supported (expected one of: {})",
                request.language,
                Language::all()
                    .iter()
                    .map(|l| l.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            None
        }
    };

    let version = match Version::parse(request.version.trim()) {
        Ok(version) => Some(version),
        Err(e) => {
            violations.push(format!(
                "version '{}' is not a semantic version: {e}",
                request.version
            ));
            None
        }
    };

    if !(TIMEOUT_MIN_SECONDS..=TIMEOUT_MAX_SECONDS).contains(&request.timeout_seconds) {
        violations.push(format!(
            "timeout_seconds must be within [{TIMEOUT_MIN_SECONDS}, {TIMEOUT_MAX_SECONDS}], got {}",
            request.timeout_seconds
        ));
    }

    if !violations.is_empty() {
        return Err(validation_failed(violations));
    }

    // Code classification is its own error code, checked once the cheap
    // field checks all passed.
    let code = crate::decode_code(&request.code)?;

    // Schema documents must themselves compile.
    let input_schema = checked_schema("input_schema", request.input_schema, &mut violations);
    let output_schema = checked_schema("output_schema", request.output_schema, &mut violations);
    if !violations.is_empty() {
        return Err(validation_failed(violations));
    }

    Ok(ValidatedRequest {
        skill_id: request.skill_id.trim().to_string(),
        skill_name: request.skill_name.trim().to_string(),
        description: request.description,
        version: version.expect("validated above"),
        language: language.expect("validated above"),
        code,
        timeout_seconds: request.timeout_seconds,
        dependencies: request.dependencies,
        input_schema,
        output_schema,
        author: request.author,
        license: request.license,
        category: request.category,
    })
}

fn checked_schema(field: &str, schema: Option<Value>, violations: &mut Vec<String>) -> Value {
    let schema = schema.unwrap_or_else(|| json!({}));
    if let Err(e) = sp_schema::compile(&schema) {
        violations.push(format!("{field} is not a valid JSON-Schema: {e}"));
    }
    schema
}

fn validation_failed(violations: Vec<String>) -> SkillError {
    let summary = violations.join("; ");
    SkillError::new(ErrorCode::ValidationFailed, summary).with_detail("violations", json!(violations))
}
