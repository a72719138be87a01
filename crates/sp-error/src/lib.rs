//! Unified error taxonomy with stable wire codes for Skillport.
//!
//! Every fallible core operation reports a [`SkillError`]: a stable
//! machine-readable [`ErrorCode`], a human-readable message, an optional
//! structured detail map, and an optional source chain. The HTTP layer maps
//! codes to statuses through [`ErrorCode::http_status`] and never invents
//! codes of its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Skill registration and lookup errors.
    Registry,
    /// Invocation scheduling and execution errors.
    Invocation,
    /// Workflow validation and orchestration errors.
    Orchestration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registry => "registry",
            Self::Invocation => "invocation",
            Self::Orchestration => "orchestration",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to its wire code (e.g. `"SKILL_REG_001"`), which
/// is guaranteed not to change across releases. Clients dispatch on these
/// strings, so renaming a variant's wire form is a breaking API change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // -- Registry --
    /// A skill with the same `(skill_id, version)` already exists.
    #[serde(rename = "SKILL_REG_001")]
    DuplicateSkill,
    /// The registration request failed semantic validation.
    #[serde(rename = "SKILL_REG_002")]
    ValidationFailed,
    /// The supplied code blob is not valid (bad base64 or empty).
    #[serde(rename = "SKILL_REG_003")]
    InvalidCode,
    /// Unexpected registry-side failure.
    #[serde(rename = "SKILL_REG_999")]
    RegistryInternal,

    // -- Invocation --
    /// The requested skill does not exist (or was deleted).
    #[serde(rename = "SKILL_INV_001")]
    SkillNotFound,
    /// The inputs payload failed the skill's input schema.
    #[serde(rename = "SKILL_INV_002")]
    InvalidInputs,
    /// The execution exceeded its effective deadline.
    #[serde(rename = "SKILL_INV_003")]
    ExecutionTimeout,
    /// The execution failed (guest error, overload, output violation).
    #[serde(rename = "SKILL_INV_004")]
    ExecutionFailed,
    /// Unexpected scheduler-side failure.
    #[serde(rename = "SKILL_INV_999")]
    InvocationInternal,

    // -- Orchestration --
    /// The workflow definition is invalid (bad edges or references).
    #[serde(rename = "SKILL_ORC_001")]
    InvalidWorkflow,
    /// The workflow graph contains a cycle.
    #[serde(rename = "SKILL_ORC_002")]
    CyclicWorkflow,
    /// Unexpected orchestrator-side failure.
    #[serde(rename = "SKILL_ORC_999")]
    OrchestrationInternal,
}

impl ErrorCode {
    /// The stable wire code, e.g. `"SKILL_INV_001"`.
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::DuplicateSkill => "SKILL_REG_001",
            Self::ValidationFailed => "SKILL_REG_002",
            Self::InvalidCode => "SKILL_REG_003",
            Self::RegistryInternal => "SKILL_REG_999",
            Self::SkillNotFound => "SKILL_INV_001",
            Self::InvalidInputs => "SKILL_INV_002",
            Self::ExecutionTimeout => "SKILL_INV_003",
            Self::ExecutionFailed => "SKILL_INV_004",
            Self::InvocationInternal => "SKILL_INV_999",
            Self::InvalidWorkflow => "SKILL_ORC_001",
            Self::CyclicWorkflow => "SKILL_ORC_002",
            Self::OrchestrationInternal => "SKILL_ORC_999",
        }
    }

    /// Short snake_case kind tag, e.g. `"duplicate_skill"`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateSkill => "duplicate_skill",
            Self::ValidationFailed => "validation_failed",
            Self::InvalidCode => "invalid_code",
            Self::RegistryInternal | Self::InvocationInternal | Self::OrchestrationInternal => {
                "internal_error"
            }
            Self::SkillNotFound => "skill_not_found",
            Self::InvalidInputs => "invalid_inputs",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::InvalidWorkflow => "invalid_workflow",
            Self::CyclicWorkflow => "cyclic_workflow",
        }
    }

    /// The category this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DuplicateSkill
            | Self::ValidationFailed
            | Self::InvalidCode
            | Self::RegistryInternal => ErrorCategory::Registry,
            Self::SkillNotFound
            | Self::InvalidInputs
            | Self::ExecutionTimeout
            | Self::ExecutionFailed
            | Self::InvocationInternal => ErrorCategory::Invocation,
            Self::InvalidWorkflow | Self::CyclicWorkflow | Self::OrchestrationInternal => {
                ErrorCategory::Orchestration
            }
        }
    }

    /// The HTTP status the daemon answers with for this code.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DuplicateSkill => 409,
            Self::ValidationFailed | Self::InvalidInputs | Self::InvalidWorkflow => 422,
            Self::InvalidCode | Self::CyclicWorkflow => 400,
            Self::SkillNotFound => 404,
            Self::ExecutionTimeout => 504,
            Self::ExecutionFailed
            | Self::RegistryInternal
            | Self::InvocationInternal
            | Self::OrchestrationInternal => 500,
        }
    }

    /// Every code in the taxonomy, in wire-code order.
    #[must_use]
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::DuplicateSkill,
            Self::ValidationFailed,
            Self::InvalidCode,
            Self::RegistryInternal,
            Self::SkillNotFound,
            Self::InvalidInputs,
            Self::ExecutionTimeout,
            Self::ExecutionFailed,
            Self::InvocationInternal,
            Self::InvalidWorkflow,
            Self::CyclicWorkflow,
            Self::OrchestrationInternal,
        ]
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_code())
    }
}

// ---------------------------------------------------------------------------
// SkillError
// ---------------------------------------------------------------------------

/// The unified error carrier for all core operations.
///
/// Construct with [`SkillError::new`] and enrich fluently:
///
/// ```
/// use sp_error::{ErrorCode, SkillError};
///
/// let err = SkillError::new(ErrorCode::SkillNotFound, "no such skill")
///     .with_detail("skill_id", "skill_square");
/// assert_eq!(err.code.wire_code(), "SKILL_INV_001");
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct SkillError {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message. Never contains stack traces.
    pub message: String,
    /// Structured key-value details (violations, node ids, limits).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
    /// Underlying cause, not serialised across the boundary.
    #[serde(skip)]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SkillError {
    /// Create an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a structured detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach an underlying cause. The cause participates in the
    /// `std::error::Error` chain but never crosses the wire.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns `true` if this is one of the `*_999` internal codes.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::RegistryInternal
                | ErrorCode::InvocationInternal
                | ErrorCode::OrchestrationInternal
        )
    }

    /// Shorthand for a registry internal error wrapping `source`.
    pub fn registry_internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorCode::RegistryInternal, "internal registry error").with_source(source)
    }

    /// Shorthand for an invocation internal error wrapping `source`.
    pub fn invocation_internal(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorCode::InvocationInternal, "internal scheduler error").with_source(source)
    }
}

impl Clone for SkillError {
    fn clone(&self) -> Self {
        // The source chain is diagnostic-only and not cloneable; drop it.
        Self {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            source: None,
        }
    }
}

impl PartialEq for SkillError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.message == other.message && self.details == other.details
    }
}

impl fmt::Display for SkillError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.wire_code(), self.message)
    }
}

impl std::error::Error for SkillError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

/// Convenience alias used across the core crates.
pub type Result<T> = std::result::Result<T, SkillError>;
