// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-core
//!
//! Contract types shared by every Skillport crate: skill manifests and
//! registration payloads, execution identifiers and records, workflow
//! definitions, and usage statistics.
//!
//! Inputs and outputs are arbitrary JSON carried as [`serde_json::Value`];
//! JSON-Schema validation (sp-schema) is the sole type boundary.

#![deny(unsafe_code)]

/// Execution identifiers, states, and records.
pub mod execution;
/// Usage statistics counters.
pub mod stats;
/// Workflow (DAG) definitions.
pub mod workflow;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use execution::{ExecutionId, ExecutionRecord, ExecutionState};
pub use stats::UsageStats;
pub use workflow::{WorkflowEdge, WorkflowNode, WorkflowSpec};

/// Minimum allowed per-skill timeout in seconds.
pub const TIMEOUT_MIN_SECONDS: u64 = 1;
/// Maximum allowed per-skill timeout in seconds.
pub const TIMEOUT_MAX_SECONDS: u64 = 600;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Source languages the sandbox knows how to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    /// CPython, entry point `def execute(inputs): ...`.
    Python,
    /// TypeScript, entry point `export function execute(inputs) { ... }`.
    Typescript,
    /// Go, entry point `func Execute(inputs map[string]any) (any, error)`.
    Go,
}

impl Language {
    /// Stable lowercase tag used on the wire and in storage.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Typescript => "typescript",
            Self::Go => "go",
        }
    }

    /// All supported languages.
    #[must_use]
    pub fn all() -> &'static [Language] {
        &[Self::Python, Self::Typescript, Self::Go]
    }

    /// Parse a wire tag, case-insensitively. Returns `None` for unsupported
    /// languages so callers can produce their own validation error.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "python" => Some(Self::Python),
            "typescript" => Some(Self::Typescript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SkillKey
// ---------------------------------------------------------------------------

/// The identity of one stored skill version: `(skill_id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkillKey {
    /// Opaque caller-chosen identifier.
    pub skill_id: String,
    /// Semantic version of this artifact.
    pub version: Version,
}

impl SkillKey {
    /// Create a key from its parts.
    pub fn new(skill_id: impl Into<String>, version: Version) -> Self {
        Self {
            skill_id: skill_id.into(),
            version,
        }
    }
}

impl fmt::Display for SkillKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.skill_id, self.version)
    }
}

// ---------------------------------------------------------------------------
// SkillManifest
// ---------------------------------------------------------------------------

/// Stored metadata for one skill version.
///
/// The code blob itself lives in the blob store, addressed by
/// [`code_digest`](Self::code_digest); the manifest is immutable after
/// registration apart from [`stats`](Self::stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    /// Opaque caller-chosen identifier, unique together with `version`.
    pub skill_id: String,
    /// Human-readable display name.
    pub skill_name: String,
    /// Free-text description, searchable via discovery.
    pub description: String,
    /// Semantic version of this artifact.
    pub version: Version,
    /// Language the sandbox hosts this skill in.
    pub language: Language,
    /// Hard per-invocation wall-clock limit, `1..=600` seconds.
    pub timeout_seconds: u64,
    /// Language-specific dependency manifest; opaque to the server.
    #[serde(default)]
    pub dependencies: Value,
    /// JSON-Schema for inputs; `{}` accepts anything.
    #[serde(default = "permissive_schema")]
    pub input_schema: Value,
    /// JSON-Schema for outputs; `{}` accepts anything.
    #[serde(default = "permissive_schema")]
    pub output_schema: Value,
    /// Author attribution.
    #[serde(default)]
    pub author: String,
    /// License identifier.
    #[serde(default)]
    pub license: String,
    /// Discovery category.
    #[serde(default)]
    pub category: String,
    /// SHA-256 digest (hex) of the decoded code blob; blob-store key.
    pub code_digest: String,
    /// Size of the decoded code blob in bytes.
    pub code_size: u64,
    /// Server-stamped creation time.
    pub created_at: DateTime<Utc>,
    /// Server-stamped last-update time (stats updates do not touch this).
    pub updated_at: DateTime<Utc>,
    /// Usage counters, updated after each terminal invocation.
    #[serde(default)]
    pub stats: UsageStats,
}

impl SkillManifest {
    /// This manifest's `(skill_id, version)` identity.
    #[must_use]
    pub fn key(&self) -> SkillKey {
        SkillKey::new(self.skill_id.clone(), self.version.clone())
    }
}

fn permissive_schema() -> Value {
    Value::Object(serde_json::Map::new())
}

// ---------------------------------------------------------------------------
// RegisterRequest
// ---------------------------------------------------------------------------

/// Boundary payload for `POST /skill/register`.
///
/// Everything arrives as loosely-typed JSON; the registry performs the full
/// validation pass (field presence, language, semver, base64, schemas,
/// timeout range) and produces typed errors with stable codes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RegisterRequest {
    /// Opaque caller-chosen identifier.
    pub skill_id: String,
    /// Human-readable display name.
    pub skill_name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Semantic version string (`MAJOR.MINOR.PATCH[-pre]`).
    pub version: String,
    /// Language tag (`python`, `typescript`, `go`).
    pub language: String,
    /// Base64-encoded code blob.
    pub code: String,
    /// Per-invocation timeout in seconds, `1..=600`.
    pub timeout_seconds: u64,
    /// Language-specific dependency manifest; opaque.
    #[serde(default)]
    pub dependencies: Value,
    /// JSON-Schema for inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// JSON-Schema for outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Author attribution.
    #[serde(default)]
    pub author: String,
    /// License identifier.
    #[serde(default)]
    pub license: String,
    /// Discovery category.
    #[serde(default)]
    pub category: String,
}

impl RegisterRequest {
    /// Start building a request with the required identity fields and a
    /// default timeout of 30 seconds.
    pub fn builder(skill_id: impl Into<String>, version: impl Into<String>) -> RegisterRequestBuilder {
        RegisterRequestBuilder {
            request: RegisterRequest {
                skill_id: skill_id.into(),
                skill_name: String::new(),
                description: String::new(),
                version: version.into(),
                language: "python".into(),
                code: String::new(),
                timeout_seconds: 30,
                dependencies: Value::Null,
                input_schema: None,
                output_schema: None,
                author: String::new(),
                license: String::new(),
                category: String::new(),
            },
        }
    }
}

/// Fluent builder for [`RegisterRequest`], used heavily in tests.
#[derive(Debug, Clone)]
pub struct RegisterRequestBuilder {
    request: RegisterRequest,
}

impl RegisterRequestBuilder {
    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.request.skill_name = name.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.request.description = description.into();
        self
    }

    /// Set the language tag.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.request.language = language.into();
        self
    }

    /// Set the code blob from raw source, base64-encoding it.
    #[must_use]
    pub fn source(mut self, source: &str) -> Self {
        use base64::Engine as _;
        self.request.code = base64::engine::general_purpose::STANDARD.encode(source);
        self
    }

    /// Set the already-encoded code blob verbatim.
    #[must_use]
    pub fn code_base64(mut self, code: impl Into<String>) -> Self {
        self.request.code = code.into();
        self
    }

    /// Set the timeout in seconds.
    #[must_use]
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.request.timeout_seconds = seconds;
        self
    }

    /// Set the input schema.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.request.input_schema = Some(schema);
        self
    }

    /// Set the output schema.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.request.output_schema = Some(schema);
        self
    }

    /// Set the discovery category.
    #[must_use]
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.request.category = category.into();
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> RegisterRequest {
        self.request
    }
}
