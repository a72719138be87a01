// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic in-process sandbox for tests.
//!
//! The blob is interpreted as a JSON directive object instead of real code,
//! so scheduler and workflow tests can exercise every outcome without an
//! interpreter on the machine:
//!
//! ```json
//! {"return": {"result": 25}}          // fixed value
//! {"echo": true}                      // return the inputs verbatim
//! {"square": "value"}                 // {"result": inputs.value ** 2}
//! {"sum": ["a", "b"]}                 // {"result": inputs.a + inputs.b}
//! {"sleep_ms": 10000}                 // hold the slot (times out per caps)
//! {"raise": "division by zero"}       // execution_failed
//! {"unserialisable": true}            // marshalling_failed
//! ```
//!
//! `sleep_ms` composes with the other directives: the mock sleeps first,
//! then evaluates the rest, honoring `caps.max_wall` like the real host.

use crate::{Outcome, SandboxCaps, SandboxFailure, SandboxHost};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use sp_core::Language;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scriptable sandbox double. Cheap to clone-by-`Arc` and fully
/// deterministic apart from `sleep_ms` timing.
#[derive(Default)]
pub struct MockSandbox {
    calls: AtomicUsize,
}

impl MockSandbox {
    /// Create a fresh mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `run` calls observed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Render a float back as an integer when it is whole, so mock arithmetic
/// matches JSON number semantics (`25 + 9 == 34`, not `34.0`).
fn number(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

fn field_f64(inputs: &Value, field: &str) -> Result<f64, SandboxFailure> {
    inputs
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            SandboxFailure::execution_failed(format!(
                "KeyError: '{field}' is missing or not a number"
            ))
        })
}

fn evaluate(directive: &Map<String, Value>, inputs: &Value) -> Outcome {
    if let Some(detail) = directive.get("raise").and_then(Value::as_str) {
        return Err(SandboxFailure::execution_failed(detail));
    }
    if directive.get("unserialisable").and_then(Value::as_bool) == Some(true) {
        return Err(SandboxFailure::marshalling_failed(
            "result is not JSON-serialisable",
        ));
    }
    if directive.get("echo").and_then(Value::as_bool) == Some(true) {
        return Ok(inputs.clone());
    }
    if let Some(field) = directive.get("square").and_then(Value::as_str) {
        let v = field_f64(inputs, field)?;
        return Ok(json!({"result": number(v * v)}));
    }
    if let Some(fields) = directive.get("sum").and_then(Value::as_array) {
        let mut total = 0.0;
        for field in fields {
            let Some(name) = field.as_str() else {
                return Err(SandboxFailure::execution_failed("sum fields must be strings"));
            };
            total += field_f64(inputs, name)?;
        }
        return Ok(json!({"result": number(total)}));
    }
    if let Some(value) = directive.get("return") {
        return Ok(value.clone());
    }
    Err(SandboxFailure::execution_failed(
        "mock directive matched nothing",
    ))
}

#[async_trait]
impl SandboxHost for MockSandbox {
    async fn run(
        &self,
        _language: Language,
        blob: &[u8],
        inputs: &Value,
        caps: &SandboxCaps,
    ) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let directive: Value = serde_json::from_slice(blob)
            .map_err(|e| SandboxFailure::execution_failed(format!("mock blob is not JSON: {e}")))?;
        let directive = directive
            .as_object()
            .ok_or_else(|| SandboxFailure::execution_failed("mock blob must be an object"))?
            .clone();

        let inputs = crate::normalize_inputs(inputs);

        if let Some(ms) = directive.get("sleep_ms").and_then(Value::as_u64) {
            let nap = Duration::from_millis(ms);
            if nap >= caps.max_wall {
                tokio::time::sleep(caps.max_wall).await;
                return Err(SandboxFailure::timed_out(format!(
                    "wall-clock limit of {:?} exceeded",
                    caps.max_wall
                )));
            }
            tokio::time::sleep(nap).await;
        }

        evaluate(&directive, &inputs)
    }
}
