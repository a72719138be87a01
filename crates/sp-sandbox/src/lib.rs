// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-sandbox
//!
//! One-shot isolated execution of a skill artifact against an inputs
//! payload. The host stages the code blob plus a small per-language harness
//! in a private temp directory, spawns the interpreter with piped stdio,
//! writes the inputs as one JSON line, and reads back a single result
//! envelope: `{"ok": value}` or `{"err": kind, "detail": text}`.
//!
//! The process-level host here relies on OS process isolation plus an
//! emptied environment; production deployments put a container boundary
//! behind the same [`SandboxHost`] trait.

#![deny(unsafe_code)]

mod harness;
/// Deterministic in-process sandbox for tests.
pub mod mock;
mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sp_core::Language;
use std::time::Duration;
use thiserror::Error;

pub use mock::MockSandbox;
pub use process::{ProcessSandbox, RuntimeCommand};

/// Default cap on guest output size: 10 MiB.
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

/// Grace window between the cooperative stop and the hard kill.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Caps
// ---------------------------------------------------------------------------

/// Resource and time caps applied to one sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxCaps {
    /// Hard wall-clock deadline for the whole run.
    pub max_wall: Duration,
    /// Maximum bytes of guest output; exceeding it discards the result.
    pub max_output_bytes: u64,
    /// Address-space limit handed to the guest, where the runtime supports
    /// it (Python honors it via `resource.setrlimit`).
    pub max_memory_bytes: Option<u64>,
    /// Whether the guest may open network connections. Denied by default;
    /// only runtimes with a permission system (Deno) can enforce it.
    pub allow_network: bool,
}

impl Default for SandboxCaps {
    fn default() -> Self {
        Self {
            max_wall: Duration::from_secs(30),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_memory_bytes: None,
            allow_network: false,
        }
    }
}

impl SandboxCaps {
    /// Caps with the given wall-clock deadline and defaults otherwise.
    #[must_use]
    pub fn with_deadline(max_wall: Duration) -> Self {
        Self {
            max_wall,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a sandbox run did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The wall-clock deadline expired; the guest was killed.
    TimedOut,
    /// Guest output exceeded `max_output_bytes`; the result was discarded.
    OversizeOutput,
    /// The guest raised; `detail` carries the traceback text.
    ExecutionFailed,
    /// The guest returned a non-JSON-serialisable value or emitted
    /// non-UTF-8 output.
    MarshallingFailed,
    /// The host could not launch the isolate at all.
    SandboxUnavailable,
}

impl FailureKind {
    /// Stable snake_case tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimedOut => "timed_out",
            Self::OversizeOutput => "oversize_output",
            Self::ExecutionFailed => "execution_failed",
            Self::MarshallingFailed => "marshalling_failed",
            Self::SandboxUnavailable => "sandbox_unavailable",
        }
    }
}

/// A structured sandbox failure: a kind plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}: {detail}", .kind.as_str())]
pub struct SandboxFailure {
    /// Failure classification.
    pub kind: FailureKind,
    /// Diagnostic text (tracebacks, limits, spawn errors).
    pub detail: String,
}

impl SandboxFailure {
    /// Create a failure of the given kind.
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Deadline-expiry failure.
    pub fn timed_out(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::TimedOut, detail)
    }

    /// Guest-raised failure.
    pub fn execution_failed(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::ExecutionFailed, detail)
    }

    /// Marshalling failure.
    pub fn marshalling_failed(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::MarshallingFailed, detail)
    }

    /// Host-side launch failure.
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::SandboxUnavailable, detail)
    }
}

/// The result of one sandbox run.
pub type Outcome = Result<Value, SandboxFailure>;

// ---------------------------------------------------------------------------
// SandboxHost
// ---------------------------------------------------------------------------

/// The collaborator seam for launching isolates.
///
/// `inputs` follows JSON semantics end-to-end; a `null` payload is passed to
/// the guest as an empty object.
#[async_trait]
pub trait SandboxHost: Send + Sync {
    /// Execute `blob` as a `language` skill against `inputs` under `caps`.
    async fn run(
        &self,
        language: Language,
        blob: &[u8],
        inputs: &Value,
        caps: &SandboxCaps,
    ) -> Outcome;
}

/// Normalise an inputs payload: `null` becomes `{}`.
#[must_use]
pub fn normalize_inputs(inputs: &Value) -> Value {
    match inputs {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    }
}
