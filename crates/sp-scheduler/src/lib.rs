// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-scheduler
//!
//! Binds an invocation request to a resolved skill version, drives it
//! through the sandbox, and exposes its state. The scheduler owns the
//! execution-records table and the worker-pool admission discipline:
//! synchronous callers are refused when the pool is saturated, asynchronous
//! callers queue FIFO on the pool semaphore.

#![deny(unsafe_code)]

/// Cancellation primitives.
pub mod cancel;
/// The execution-records table.
pub mod tracker;

use serde_json::Value;
use sp_core::{ExecutionId, ExecutionRecord, ExecutionState, SkillManifest};
use sp_error::{ErrorCode, SkillError};
use sp_registry::SkillRegistry;
use sp_sandbox::{FailureKind, KILL_GRACE, SandboxCaps, SandboxHost, normalize_inputs};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

pub use cancel::{CancelReason, CancelToken};
pub use tracker::ExecutionTracker;

/// Default cap on concurrently running executions.
pub const DEFAULT_MAX_CONCURRENT: usize = 100;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunables for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum executions running at once.
    pub max_concurrent: usize,
    /// Cap on queued asynchronous invocations; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Output-size cap handed to the sandbox.
    pub max_output_bytes: u64,
    /// Memory cap handed to the sandbox, when the runtime supports one.
    pub max_memory_bytes: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_capacity: None,
            max_output_bytes: sp_sandbox::DEFAULT_MAX_OUTPUT_BYTES,
            max_memory_bytes: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Prepared {
    manifest: SkillManifest,
    inputs: Value,
    effective_timeout: u64,
}

/// The invocation scheduler.
#[derive(Clone)]
pub struct Scheduler {
    registry: SkillRegistry,
    sandbox: Arc<dyn SandboxHost>,
    tracker: Arc<ExecutionTracker>,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler over a registry and a sandbox host.
    pub fn new(
        registry: SkillRegistry,
        sandbox: Arc<dyn SandboxHost>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            sandbox,
            tracker: Arc::new(ExecutionTracker::new()),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            queued: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// The records table, shared with the orchestrator.
    #[must_use]
    pub fn tracker(&self) -> Arc<ExecutionTracker> {
        Arc::clone(&self.tracker)
    }

    /// The registry this scheduler resolves skills against.
    #[must_use]
    pub fn registry(&self) -> &SkillRegistry {
        &self.registry
    }

    /// Number of executions currently holding a worker slot.
    #[must_use]
    pub fn running(&self) -> usize {
        self.config.max_concurrent - self.permits.available_permits()
    }

    /// Number of asynchronous invocations waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Invoke a skill synchronously: blocks until the execution reaches a
    /// terminal state and returns the final record.
    ///
    /// # Errors
    ///
    /// Pre-flight failures only: `SKILL_INV_001` (unknown skill),
    /// `SKILL_INV_002` (input schema), `SKILL_INV_004 / overloaded` (pool
    /// saturated). Execution failures are reported inside the record.
    pub async fn invoke_sync(
        &self,
        skill_id: &str,
        inputs: Value,
        caller_timeout: Option<u64>,
    ) -> Result<ExecutionRecord, SkillError> {
        let prepared = self.prepare(skill_id, inputs, caller_timeout).await?;

        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            SkillError::new(
                ErrorCode::ExecutionFailed,
                "worker pool is saturated; retry later or invoke asynchronously",
            )
            .with_detail("kind", "overloaded")
            .with_detail("max_concurrent", self.config.max_concurrent as u64)
        })?;

        let record = ExecutionRecord::new(
            prepared.manifest.skill_id.clone(),
            prepared.manifest.version.clone(),
            prepared.inputs.clone(),
        );
        let id = record.execution_id.clone();
        let token = self.tracker.insert(record).await;

        self.execute(prepared, id.clone(), token, permit).await;

        self.tracker.get(&id).await.ok_or_else(|| {
            SkillError::new(ErrorCode::InvocationInternal, "execution record vanished")
        })
    }

    /// Invoke a skill asynchronously: returns the execution id immediately
    /// and runs the execution when a worker slot frees up.
    ///
    /// Execution state is process-local; callers must poll `status` on the
    /// instance that accepted the invocation.
    ///
    /// # Errors
    ///
    /// Pre-flight failures as for [`invoke_sync`](Self::invoke_sync), plus
    /// `SKILL_INV_004 / queue_full` when a bounded queue is configured and
    /// full.
    pub async fn invoke_async(
        &self,
        skill_id: &str,
        inputs: Value,
        caller_timeout: Option<u64>,
    ) -> Result<ExecutionId, SkillError> {
        let prepared = self.prepare(skill_id, inputs, caller_timeout).await?;

        if let Some(capacity) = self.config.queue_capacity {
            if self.queued.load(Ordering::SeqCst) >= capacity {
                return Err(SkillError::new(
                    ErrorCode::ExecutionFailed,
                    "async queue is full",
                )
                .with_detail("kind", "queue_full")
                .with_detail("queue_capacity", capacity as u64));
            }
        }

        let record = ExecutionRecord::new(
            prepared.manifest.skill_id.clone(),
            prepared.manifest.version.clone(),
            prepared.inputs.clone(),
        );
        let id = record.execution_id.clone();
        let token = self.tracker.insert(record).await;

        let scheduler = self.clone();
        let task_id = id.clone();
        self.queued.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            // FIFO admission: the semaphore queues waiters in arrival order.
            let permit = Arc::clone(&scheduler.permits).acquire_owned().await;
            scheduler.queued.fetch_sub(1, Ordering::SeqCst);
            let Ok(permit) = permit else {
                return;
            };

            // The skill may have been deleted while the record sat in the
            // queue; in-flight work runs to completion, but queued work
            // re-checks and fails cleanly when the skill is gone.
            if let Err(err) = scheduler
                .registry
                .get(&prepared.manifest.skill_id, Some(&prepared.manifest.version))
                .await
            {
                scheduler
                    .tracker
                    .update(&task_id, |r| r.fail(ExecutionState::Failed, err))
                    .await;
                return;
            }

            scheduler.execute(prepared, task_id, token, permit).await;
        });

        debug!(target: "skillport.scheduler", execution_id = %id, %skill_id, "async invocation queued");
        Ok(id)
    }

    /// Snapshot an execution record.
    pub async fn status(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        self.tracker.get(id).await
    }

    /// Wait for an execution to reach a terminal state.
    pub async fn wait_terminal(&self, id: &ExecutionId) -> Option<ExecutionRecord> {
        self.tracker.wait_terminal(id).await
    }

    /// Request cancellation of an execution.
    ///
    /// Queued executions are cancelled immediately; running ones are killed
    /// through the sandbox path and settle shortly after. Returns the
    /// current snapshot, or `None` for unknown ids.
    pub async fn cancel(
        &self,
        id: &ExecutionId,
        reason: CancelReason,
    ) -> Option<ExecutionRecord> {
        let token = self.tracker.token(id).await?;
        token.cancel(reason);

        // A queued record has no worker to observe the token; settle it here.
        self.tracker
            .update(id, |record| {
                if record.state == ExecutionState::Pending {
                    record.fail(
                        ExecutionState::Cancelled,
                        SkillError::new(ErrorCode::ExecutionFailed, reason.description())
                            .with_detail("kind", "cancelled"),
                    );
                }
            })
            .await;

        self.tracker.get(id).await
    }

    // -- internals ----------------------------------------------------------

    async fn prepare(
        &self,
        skill_id: &str,
        inputs: Value,
        caller_timeout: Option<u64>,
    ) -> Result<Prepared, SkillError> {
        let manifest = self.registry.get(skill_id, None).await?;

        let normalized = normalize_inputs(&inputs);
        let violations = sp_schema::validate(&normalized, &manifest.input_schema)
            .map_err(SkillError::invocation_internal)?;
        if !violations.is_empty() {
            let rendered: Vec<String> = violations.iter().map(ToString::to_string).collect();
            return Err(SkillError::new(
                ErrorCode::InvalidInputs,
                format!("inputs failed schema validation: {}", rendered.join("; ")),
            )
            .with_detail("violations", serde_json::json!(rendered)));
        }

        let effective_timeout = caller_timeout
            .map_or(manifest.timeout_seconds, |caller| {
                caller.min(manifest.timeout_seconds)
            })
            .max(1);

        Ok(Prepared {
            manifest,
            inputs,
            effective_timeout,
        })
    }

    async fn execute(
        &self,
        prepared: Prepared,
        id: ExecutionId,
        token: CancelToken,
        permit: OwnedSemaphorePermit,
    ) {
        // Holds the worker slot for the whole execution.
        let _permit = permit;

        let claimed = self
            .tracker
            .update(&id, |r| r.transition(ExecutionState::Running))
            .await
            .unwrap_or(false);
        if !claimed {
            // Cancelled while queued; nothing to run.
            return;
        }

        let caps = SandboxCaps {
            max_wall: Duration::from_secs(prepared.effective_timeout),
            max_output_bytes: self.config.max_output_bytes,
            max_memory_bytes: self.config.max_memory_bytes,
            allow_network: false,
        };

        let code = match self.registry.code(&prepared.manifest).await {
            Ok(code) => code,
            Err(err) => {
                self.tracker
                    .update(&id, |r| r.fail(ExecutionState::Failed, err))
                    .await;
                self.finish(&prepared, &id, false).await;
                return;
            }
        };

        // Backstop past the sandbox's own deadline handling, so a stuck
        // host implementation cannot wedge the worker slot.
        let backstop = caps.max_wall + KILL_GRACE + Duration::from_millis(500);
        let run = self.sandbox.run(
            prepared.manifest.language,
            &code,
            &prepared.inputs,
            &caps,
        );

        let outcome = tokio::select! {
            out = tokio::time::timeout(backstop, run) => match out {
                Ok(outcome) => outcome,
                Err(_) => Err(sp_sandbox::SandboxFailure::timed_out(format!(
                    "sandbox exceeded the {}s deadline and the grace window",
                    prepared.effective_timeout
                ))),
            },
            _ = token.cancelled() => {
                // Dropping the sandbox future reaps the guest process.
                let reason = token.reason().unwrap_or(CancelReason::UserRequested);
                let (state, error) = match reason {
                    CancelReason::DeadlineExpired => (
                        ExecutionState::TimedOut,
                        SkillError::new(ErrorCode::ExecutionTimeout, reason.description()),
                    ),
                    _ => (
                        ExecutionState::Cancelled,
                        SkillError::new(ErrorCode::ExecutionFailed, reason.description())
                            .with_detail("kind", "cancelled"),
                    ),
                };
                self.tracker.update(&id, |r| r.fail(state, error)).await;
                self.finish(&prepared, &id, false).await;
                return;
            }
        };

        let success = match outcome {
            Ok(value) => match self.check_output(&prepared.manifest, &value) {
                Ok(()) => {
                    self.tracker.update(&id, |r| r.complete(value)).await;
                    true
                }
                Err(err) => {
                    self.tracker
                        .update(&id, |r| r.fail(ExecutionState::Failed, err))
                        .await;
                    false
                }
            },
            Err(failure) => {
                let (state, error) = classify_failure(&failure);
                self.tracker.update(&id, |r| r.fail(state, error)).await;
                false
            }
        };

        self.finish(&prepared, &id, success).await;
    }

    fn check_output(&self, manifest: &SkillManifest, value: &Value) -> Result<(), SkillError> {
        let violations = sp_schema::validate(value, &manifest.output_schema)
            .map_err(SkillError::invocation_internal)?;
        if violations.is_empty() {
            return Ok(());
        }
        let rendered: Vec<String> = violations.iter().map(ToString::to_string).collect();
        Err(SkillError::new(
            ErrorCode::ExecutionFailed,
            format!(
                "result failed output schema validation: {}",
                rendered.join("; ")
            ),
        )
        .with_detail("kind", "output_schema_violation")
        .with_detail("violations", serde_json::json!(rendered)))
    }

    async fn finish(&self, prepared: &Prepared, id: &ExecutionId, success: bool) {
        if let Err(err) = self
            .registry
            .record_outcome(
                &prepared.manifest.skill_id,
                &prepared.manifest.version,
                success,
            )
            .await
        {
            warn!(target: "skillport.scheduler", %err, "usage stats update failed");
        }

        if let Some(record) = self.tracker.get(id).await {
            info!(
                target: "skillport.scheduler",
                execution_id = %id,
                skill_id = %record.skill_id,
                state = %record.state,
                elapsed = record.elapsed_seconds,
                "execution finished"
            );
        }
    }
}

fn classify_failure(failure: &sp_sandbox::SandboxFailure) -> (ExecutionState, SkillError) {
    match failure.kind {
        FailureKind::TimedOut => (
            ExecutionState::TimedOut,
            SkillError::new(ErrorCode::ExecutionTimeout, failure.detail.clone())
                .with_detail("kind", failure.kind.as_str()),
        ),
        FailureKind::SandboxUnavailable => (
            ExecutionState::Failed,
            SkillError::new(ErrorCode::InvocationInternal, "sandbox unavailable")
                .with_detail("kind", failure.kind.as_str()),
        ),
        _ => (
            ExecutionState::Failed,
            SkillError::new(ErrorCode::ExecutionFailed, failure.detail.clone())
                .with_detail("kind", failure.kind.as_str()),
        ),
    }
}
