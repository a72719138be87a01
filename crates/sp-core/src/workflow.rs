// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workflow (DAG) definitions.
//!
//! A workflow is a set of nodes (skill invocations) and directed edges
//! (dependencies). Node inputs may embed placeholders — `${node}` for a
//! predecessor's whole result, `${node.field}` for one field — which the
//! orchestrator substitutes before dispatching the node.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node of a workflow: a skill invocation with templated inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique (within the workflow) node identifier.
    pub node_id: String,
    /// Skill to invoke; latest version is resolved at scheduling time.
    pub skill_id: String,
    /// Inputs template; placeholders are substituted before dispatch.
    #[serde(default)]
    pub inputs: Value,
}

/// A directed dependency edge between two declared nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowEdge {
    /// Upstream node id.
    pub from: String,
    /// Downstream node id.
    pub to: String,
}

/// A complete workflow definition as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    /// Caller-supplied workflow name; informational only.
    #[serde(default)]
    pub workflow_id: String,
    /// The nodes of the graph.
    pub nodes: Vec<WorkflowNode>,
    /// Dependency edges over node ids.
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Inputs available to every node template under the reserved name
    /// `global` (`${global}` / `${global.field}`).
    #[serde(default)]
    pub global_inputs: Value,
    /// Workflow-wide wall-clock budget in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl WorkflowSpec {
    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }
}
