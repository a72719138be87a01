// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-workflow
//!
//! The DAG orchestrator. Validates a workflow graph up front, then executes
//! it wave-free: every node whose predecessors are terminally complete is
//! eligible, eligible nodes run concurrently up to a cap, and results are
//! substituted into downstream input templates as they land.
//!
//! Failure policy: the first node failure stops the workflow. In-flight
//! siblings are cancelled through the scheduler's kill path, unstarted nodes
//! are skipped, and the report carries the completed nodes' results next to
//! the failing node's error.

#![deny(unsafe_code)]

/// Graph validation.
pub mod graph;
/// Placeholder parsing and substitution.
pub mod placeholder;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sp_core::{ExecutionId, ExecutionState, WorkflowSpec};
use sp_error::{ErrorCode, SkillError};
use sp_scheduler::{CancelReason, Scheduler};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub use graph::GLOBAL_SCOPE;
pub use placeholder::{Placeholder, ResolveError};

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum workflow nodes in flight at once. Defaults to the
    /// scheduler-wide concurrency cap.
    pub max_parallel_nodes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: sp_scheduler::DEFAULT_MAX_CONCURRENT,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Terminal state of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Every node completed.
    Completed,
    /// A node failed; the rest were cancelled or skipped.
    Failed,
    /// The workflow-wide deadline expired.
    TimedOut,
}

/// The failing node and its error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Node that failed.
    pub node_id: String,
    /// Its error, with the stable invocation code.
    pub error: SkillError,
}

/// The outcome of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    /// Workflow execution identifier (`exec_wf_…`).
    pub execution_id: ExecutionId,
    /// Caller-supplied workflow name.
    pub workflow_id: String,
    /// Terminal state.
    pub state: WorkflowState,
    /// Results of every completed node.
    pub results: BTreeMap<String, Value>,
    /// Child execution ids per launched node.
    pub node_executions: BTreeMap<String, ExecutionId>,
    /// Nodes cancelled while in flight.
    pub cancelled: Vec<String>,
    /// Nodes never launched.
    pub skipped: Vec<String>,
    /// The first failure, when the workflow did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<NodeFailure>,
    /// Wall-clock duration of the whole workflow.
    pub elapsed_seconds: f64,
}

impl WorkflowReport {
    /// Returns `true` when every node completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == WorkflowState::Completed
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Executes validated workflow graphs against the scheduler.
#[derive(Clone)]
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    config: OrchestratorConfig,
}

struct NodeOutcome {
    node_id: String,
    result: Result<Value, SkillError>,
    cancelled: bool,
}

impl Orchestrator {
    /// Create an orchestrator over a scheduler.
    pub fn new(scheduler: Arc<Scheduler>, config: OrchestratorConfig) -> Self {
        Self { scheduler, config }
    }

    /// Validate and execute a workflow.
    ///
    /// # Errors
    ///
    /// `SKILL_ORC_001` / `SKILL_ORC_002` for invalid graphs, before any node
    /// runs. Node-level failures do not error: they surface in the report.
    pub async fn run(&self, spec: WorkflowSpec) -> Result<WorkflowReport, SkillError> {
        let graph = graph::validate(&spec)?;
        let execution_id = ExecutionId::new_workflow();
        let started = Instant::now();
        let deadline = spec
            .timeout_seconds
            .map(|secs| started + Duration::from_secs(secs));

        info!(
            target: "skillport.workflow",
            execution_id = %execution_id,
            workflow_id = %spec.workflow_id,
            nodes = graph.order.len(),
            "workflow started"
        );

        let mut indegree = graph.indegree.clone();
        let mut ready: VecDeque<String> = graph.roots().into();
        let mut results: BTreeMap<String, Value> = BTreeMap::new();
        let mut node_executions: BTreeMap<String, ExecutionId> = BTreeMap::new();
        let mut in_flight: HashMap<String, ExecutionId> = HashMap::new();
        let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
        let mut cancelled: Vec<String> = Vec::new();
        let mut failure: Option<NodeFailure> = None;

        'run: while failure.is_none() && (!ready.is_empty() || !join_set.is_empty()) {
            // Launch everything eligible, up to the cap.
            while in_flight.len() < self.config.max_parallel_nodes {
                let Some(node_id) = ready.pop_front() else { break };
                match self
                    .launch(&spec, &node_id, &results, deadline, &mut join_set)
                    .await
                {
                    Ok(child) => {
                        node_executions.insert(node_id.clone(), child.clone());
                        in_flight.insert(node_id, child);
                    }
                    Err(error) => {
                        failure = Some(NodeFailure { node_id, error });
                        break 'run;
                    }
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    failure = Some(NodeFailure {
                        node_id: "<unknown>".into(),
                        error: SkillError::new(
                            ErrorCode::OrchestrationInternal,
                            "workflow worker task failed",
                        )
                        .with_source(join_err),
                    });
                    break;
                }
            };

            in_flight.remove(&outcome.node_id);
            match outcome.result {
                Ok(value) => {
                    debug!(
                        target: "skillport.workflow",
                        node = %outcome.node_id,
                        "node completed"
                    );
                    results.insert(outcome.node_id.clone(), value);
                    for downstream in &graph.downstream[&outcome.node_id] {
                        let entry = indegree.get_mut(downstream).expect("validated node");
                        *entry -= 1;
                        if *entry == 0 {
                            ready.push_back(downstream.clone());
                        }
                    }
                }
                Err(error) => {
                    warn!(
                        target: "skillport.workflow",
                        node = %outcome.node_id,
                        %error,
                        "node failed; unwinding workflow"
                    );
                    failure = Some(NodeFailure {
                        node_id: outcome.node_id,
                        error,
                    });
                }
            }
        }

        // Unwind: cancel in-flight siblings and collect their final states.
        if failure.is_some() {
            for child in in_flight.values() {
                self.scheduler.cancel(child, CancelReason::WorkflowFailed).await;
            }
            while let Some(joined) = join_set.join_next().await {
                if let Ok(outcome) = joined {
                    in_flight.remove(&outcome.node_id);
                    if outcome.cancelled {
                        cancelled.push(outcome.node_id);
                    } else if let Ok(value) = outcome.result {
                        // Finished before the cancel landed; keep the result.
                        results.insert(outcome.node_id, value);
                    } else {
                        cancelled.push(outcome.node_id);
                    }
                }
            }
        }

        let skipped: Vec<String> = graph
            .order
            .iter()
            .filter(|id| {
                !results.contains_key(*id)
                    && !cancelled.contains(id)
                    && failure.as_ref().map(|f| &f.node_id) != Some(id)
            })
            .cloned()
            .collect();

        let deadline_expired = deadline.is_some_and(|d| Instant::now() >= d);
        let state = match &failure {
            None => WorkflowState::Completed,
            Some(f) if deadline_expired && f.error.code == ErrorCode::ExecutionTimeout => {
                WorkflowState::TimedOut
            }
            Some(_) => WorkflowState::Failed,
        };

        let report = WorkflowReport {
            execution_id,
            workflow_id: spec.workflow_id.clone(),
            state,
            results,
            node_executions,
            cancelled,
            skipped,
            failure,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };

        info!(
            target: "skillport.workflow",
            execution_id = %report.execution_id,
            state = ?report.state,
            completed = report.results.len(),
            cancelled = report.cancelled.len(),
            skipped = report.skipped.len(),
            "workflow finished"
        );
        Ok(report)
    }

    /// Resolve a node's inputs and dispatch it, returning the child
    /// execution id. Errors here count as the node's failure.
    async fn launch(
        &self,
        spec: &WorkflowSpec,
        node_id: &str,
        results: &BTreeMap<String, Value>,
        deadline: Option<Instant>,
        join_set: &mut JoinSet<NodeOutcome>,
    ) -> Result<ExecutionId, SkillError> {
        let node = spec.node(node_id).expect("validated node");

        let globals = spec.global_inputs.clone();
        let lookup = |name: &str| -> Option<Value> {
            if name == GLOBAL_SCOPE {
                Some(globals.clone())
            } else {
                results.get(name).cloned()
            }
        };
        let inputs = placeholder::resolve(&node.inputs, &lookup).map_err(|e| {
            SkillError::new(ErrorCode::ExecutionFailed, e.to_string())
                .with_detail("kind", "reference_missing")
                .with_detail("node_id", node_id)
        })?;

        // The remaining workflow budget caps the child's own timeout.
        let caller_timeout = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(SkillError::new(
                        ErrorCode::ExecutionTimeout,
                        "workflow deadline expired before the node could start",
                    ));
                }
                Some(remaining.as_secs().max(1))
            }
            None => None,
        };

        let child = self
            .scheduler
            .invoke_async(&node.skill_id, inputs, caller_timeout)
            .await?;

        let scheduler = Arc::clone(&self.scheduler);
        let node_id = node_id.to_string();
        let child_for_task = child.clone();
        join_set.spawn(async move {
            let record = scheduler.wait_terminal(&child_for_task).await;
            match record {
                Some(record) => {
                    let cancelled = record.state == ExecutionState::Cancelled;
                    let result = match record.state {
                        ExecutionState::Completed => {
                            Ok(record.result.unwrap_or(Value::Null))
                        }
                        _ => Err(record.error.unwrap_or_else(|| {
                            SkillError::new(
                                ErrorCode::InvocationInternal,
                                "execution ended without an error payload",
                            )
                        })),
                    };
                    NodeOutcome {
                        node_id,
                        result,
                        cancelled,
                    }
                }
                None => NodeOutcome {
                    node_id,
                    result: Err(SkillError::new(
                        ErrorCode::OrchestrationInternal,
                        "child execution record disappeared",
                    )),
                    cancelled: false,
                },
            }
        });

        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sp_core::RegisterRequest;
    use sp_registry::SkillRegistry;
    use sp_sandbox::MockSandbox;
    use sp_scheduler::SchedulerConfig;
    use sp_store::{MemoryBlobStore, MemoryMetadataStore};

    async fn orchestrator() -> Orchestrator {
        let registry = SkillRegistry::new(
            Arc::new(MemoryMetadataStore::new()),
            Arc::new(MemoryBlobStore::new()),
            None,
        );
        for (skill_id, directive) in [
            ("skill_square", r#"{"square": "value"}"#),
            ("skill_add", r#"{"sum": ["a", "b"]}"#),
            ("skill_echo", r#"{"echo": true}"#),
            ("skill_fail", r#"{"raise": "node exploded"}"#),
            ("skill_slow", r#"{"sleep_ms": 5000, "return": 1}"#),
            ("skill_slowish", r#"{"sleep_ms": 150, "return": {"result": 1}}"#),
        ] {
            registry
                .register(
                    RegisterRequest::builder(skill_id, "1.0.0")
                        .name(skill_id)
                        .source(directive)
                        .build(),
                )
                .await
                .unwrap();
        }
        let scheduler = Arc::new(Scheduler::new(
            registry,
            Arc::new(MockSandbox::new()),
            SchedulerConfig::default(),
        ));
        Orchestrator::new(scheduler, OrchestratorConfig::default())
    }

    fn spec(value: serde_json::Value) -> WorkflowSpec {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn diamond_workflow_resolves_references() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "workflow_id": "diamond",
                "nodes": [
                    {"node_id": "node1", "skill_id": "skill_square", "inputs": {"value": 5}},
                    {"node_id": "node2", "skill_id": "skill_square", "inputs": {"value": 3}},
                    {"node_id": "node3", "skill_id": "skill_add",
                     "inputs": {"a": "${node1.result}", "b": "${node2.result}"}}
                ],
                "edges": [
                    {"from": "node1", "to": "node3"},
                    {"from": "node2", "to": "node3"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(report.state, WorkflowState::Completed);
        assert_eq!(report.results["node3"], json!({"result": 34}));
        assert!(report.execution_id.is_workflow());
        assert_eq!(report.node_executions.len(), 3);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn cyclic_workflow_is_rejected_before_execution() {
        let orchestrator = orchestrator().await;
        let err = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "A", "skill_id": "skill_echo"},
                    {"node_id": "B", "skill_id": "skill_echo"}
                ],
                "edges": [
                    {"from": "A", "to": "B"},
                    {"from": "B", "to": "A"}
                ]
            })))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CyclicWorkflow);
    }

    #[tokio::test]
    async fn node_failure_skips_downstream_and_reports_partials() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "ok", "skill_id": "skill_square", "inputs": {"value": 2}},
                    {"node_id": "bad", "skill_id": "skill_fail"},
                    {"node_id": "after", "skill_id": "skill_echo",
                     "inputs": {"x": "${bad}"}}
                ],
                "edges": [
                    {"from": "ok", "to": "bad"},
                    {"from": "bad", "to": "after"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(report.state, WorkflowState::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.node_id, "bad");
        assert!(failure.error.message.contains("node exploded"));
        // Completed results survive as partials.
        assert_eq!(report.results["ok"], json!({"result": 4}));
        assert_eq!(report.skipped, vec!["after"]);
    }

    #[tokio::test]
    async fn sibling_failure_cancels_in_flight_nodes() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "slow", "skill_id": "skill_slow"},
                    {"node_id": "bad", "skill_id": "skill_fail"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(report.state, WorkflowState::Failed);
        assert_eq!(report.failure.unwrap().node_id, "bad");
        assert_eq!(report.cancelled, vec!["slow"]);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn reference_to_missing_field_fails_before_invocation() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "first", "skill_id": "skill_square", "inputs": {"value": 2}},
                    {"node_id": "second", "skill_id": "skill_echo",
                     "inputs": {"x": "${first.no_such_field}"}}
                ],
                "edges": [{"from": "first", "to": "second"}]
            })))
            .await
            .unwrap();

        assert_eq!(report.state, WorkflowState::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.node_id, "second");
        assert_eq!(failure.error.details["kind"], "reference_missing");
        // The failing node never launched a child execution.
        assert!(!report.node_executions.contains_key("second"));
    }

    #[tokio::test]
    async fn global_inputs_are_available_to_every_node() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "global_inputs": {"seed": 6},
                "nodes": [
                    {"node_id": "a", "skill_id": "skill_square",
                     "inputs": {"value": "${global.seed}"}}
                ]
            })))
            .await
            .unwrap();
        assert_eq!(report.state, WorkflowState::Completed);
        assert_eq!(report.results["a"], json!({"result": 36}));
    }

    #[tokio::test]
    async fn workflow_deadline_times_out_slow_nodes() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "timeout_seconds": 1,
                "nodes": [
                    {"node_id": "slow", "skill_id": "skill_slow"}
                ]
            })))
            .await
            .unwrap();

        assert_eq!(report.state, WorkflowState::TimedOut);
        let failure = report.failure.unwrap();
        assert_eq!(failure.node_id, "slow");
        assert_eq!(failure.error.code, ErrorCode::ExecutionTimeout);
    }

    #[tokio::test]
    async fn unknown_skill_fails_the_node_at_launch() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "nodes": [{"node_id": "a", "skill_id": "skill_ghost"}]
            })))
            .await
            .unwrap();
        assert_eq!(report.state, WorkflowState::Failed);
        assert_eq!(report.failure.unwrap().error.code, ErrorCode::SkillNotFound);
    }

    #[tokio::test]
    async fn independent_nodes_run_in_parallel() {
        let orchestrator = orchestrator().await;
        let started = std::time::Instant::now();
        let report = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "a", "skill_id": "skill_slowish"},
                    {"node_id": "b", "skill_id": "skill_slowish"},
                    {"node_id": "c", "skill_id": "skill_slowish"},
                    {"node_id": "d", "skill_id": "skill_slowish"}
                ]
            })))
            .await
            .unwrap();
        assert_eq!(report.state, WorkflowState::Completed);
        // Four 150ms nodes in parallel finish far sooner than serially.
        assert!(started.elapsed() < Duration::from_millis(450));
    }

    #[tokio::test]
    async fn execution_order_respects_edges() {
        let orchestrator = orchestrator().await;
        let report = orchestrator
            .run(spec(json!({
                "nodes": [
                    {"node_id": "first", "skill_id": "skill_slowish"},
                    {"node_id": "second", "skill_id": "skill_echo",
                     "inputs": {"up": "${first.result}"}}
                ],
                "edges": [{"from": "first", "to": "second"}]
            })))
            .await
            .unwrap();
        assert_eq!(report.state, WorkflowState::Completed);

        // The downstream node observed its predecessor's completed result.
        assert_eq!(report.results["second"], json!({"up": 1}));

        // And the records agree: second started after first completed.
        let scheduler = &orchestrator.scheduler;
        let first = scheduler
            .status(&report.node_executions["first"])
            .await
            .unwrap();
        let second = scheduler
            .status(&report.node_executions["second"])
            .await
            .unwrap();
        assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
    }
}
