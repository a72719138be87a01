// SPDX-License-Identifier: MIT OR Apache-2.0
//! Workflow graph validation.
//!
//! All structural checks run before any node executes: edge endpoints must
//! name declared nodes, the graph must be acyclic, and every placeholder
//! must reference a transitive predecessor of the node that uses it (or the
//! reserved `global` scope).

use crate::placeholder;
use serde_json::json;
use sp_core::WorkflowSpec;
use sp_error::{ErrorCode, SkillError};
use std::collections::{HashMap, HashSet};

/// Reserved placeholder scope for `global_inputs`.
pub const GLOBAL_SCOPE: &str = "global";

/// A validated workflow graph in execution-ready form.
#[derive(Debug)]
pub struct Graph {
    /// Node ids in declaration order.
    pub order: Vec<String>,
    /// Downstream adjacency (deduplicated).
    pub downstream: HashMap<String, Vec<String>>,
    /// Incoming-edge count per node.
    pub indegree: HashMap<String, usize>,
}

impl Graph {
    /// Node ids with no incoming edges, in declaration order.
    #[must_use]
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.indegree[*id] == 0)
            .cloned()
            .collect()
    }
}

/// Validate a workflow specification into a [`Graph`].
///
/// # Errors
///
/// `SKILL_ORC_001` for structural problems (duplicate/unknown node ids, bad
/// placeholder references), `SKILL_ORC_002` for cycles.
pub fn validate(spec: &WorkflowSpec) -> Result<Graph, SkillError> {
    if spec.nodes.is_empty() {
        return Err(invalid("workflow declares no nodes"));
    }

    let mut order = Vec::with_capacity(spec.nodes.len());
    let mut seen = HashSet::new();
    for node in &spec.nodes {
        if node.node_id.trim().is_empty() {
            return Err(invalid("node_id must not be empty"));
        }
        if node.node_id == GLOBAL_SCOPE {
            return Err(invalid(format!(
                "node_id '{GLOBAL_SCOPE}' is reserved for global inputs"
            )));
        }
        if !seen.insert(node.node_id.clone()) {
            return Err(
                invalid(format!("duplicate node_id '{}'", node.node_id))
                    .with_detail("node_id", node.node_id.clone()),
            );
        }
        order.push(node.node_id.clone());
    }

    let mut downstream: HashMap<String, Vec<String>> =
        order.iter().map(|id| (id.clone(), Vec::new())).collect();
    let mut upstream: HashMap<String, Vec<String>> =
        order.iter().map(|id| (id.clone(), Vec::new())).collect();
    let mut indegree: HashMap<String, usize> =
        order.iter().map(|id| (id.clone(), 0)).collect();

    let mut edge_set = HashSet::new();
    for edge in &spec.edges {
        if !seen.contains(&edge.from) {
            return Err(invalid(format!(
                "edge references undeclared node '{}'",
                edge.from
            ))
            .with_detail("node_id", edge.from.clone()));
        }
        if !seen.contains(&edge.to) {
            return Err(invalid(format!(
                "edge references undeclared node '{}'",
                edge.to
            ))
            .with_detail("node_id", edge.to.clone()));
        }
        if !edge_set.insert((edge.from.clone(), edge.to.clone())) {
            continue;
        }
        downstream
            .get_mut(&edge.from)
            .expect("declared above")
            .push(edge.to.clone());
        upstream
            .get_mut(&edge.to)
            .expect("declared above")
            .push(edge.from.clone());
        *indegree.get_mut(&edge.to).expect("declared above") += 1;
    }

    detect_cycles(&order, &downstream)?;

    // With acyclicity established, ancestor sets are well-defined.
    let ancestors = ancestor_sets(&order, &upstream);
    for node in &spec.nodes {
        for p in placeholder::collect(&node.inputs) {
            if p.node == GLOBAL_SCOPE {
                continue;
            }
            if !seen.contains(&p.node) {
                return Err(invalid(format!(
                    "node '{}' references undeclared node '{}'",
                    node.node_id, p.node
                ))
                .with_detail("node_id", node.node_id.clone())
                .with_detail("reference", p.node.clone()));
            }
            if !ancestors[&node.node_id].contains(&p.node) {
                return Err(invalid(format!(
                    "node '{}' references '{}', which is not upstream of it",
                    node.node_id, p.node
                ))
                .with_detail("node_id", node.node_id.clone())
                .with_detail("reference", p.node.clone()));
            }
        }
    }

    Ok(Graph {
        order,
        downstream,
        indegree,
    })
}

fn invalid(message: impl Into<String>) -> SkillError {
    SkillError::new(ErrorCode::InvalidWorkflow, message)
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

fn detect_cycles(
    order: &[String],
    downstream: &HashMap<String, Vec<String>>,
) -> Result<(), SkillError> {
    let mut colors: HashMap<&str, Color> =
        order.iter().map(|id| (id.as_str(), Color::White)).collect();

    for start in order {
        if colors[start.as_str()] != Color::White {
            continue;
        }
        // Iterative DFS with an explicit stack; grey marks the current path.
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        colors.insert(start.as_str(), Color::Grey);
        while let Some((node, next_child)) = stack.pop() {
            let children = &downstream[node];
            if next_child < children.len() {
                stack.push((node, next_child + 1));
                let child = children[next_child].as_str();
                match colors[child] {
                    Color::Grey => {
                        let mut cycle: Vec<String> =
                            stack.iter().map(|(id, _)| (*id).to_string()).collect();
                        cycle.push(child.to_string());
                        return Err(SkillError::new(
                            ErrorCode::CyclicWorkflow,
                            format!("workflow graph contains a cycle through '{child}'"),
                        )
                        .with_detail("cycle", json!(cycle)));
                    }
                    Color::White => {
                        colors.insert(child, Color::Grey);
                        stack.push((child, 0));
                    }
                    Color::Black => {}
                }
            } else {
                colors.insert(node, Color::Black);
            }
        }
    }
    Ok(())
}

fn ancestor_sets(
    order: &[String],
    upstream: &HashMap<String, Vec<String>>,
) -> HashMap<String, HashSet<String>> {
    let mut sets: HashMap<String, HashSet<String>> = HashMap::new();
    for id in order {
        let mut ancestors = HashSet::new();
        let mut stack: Vec<&String> = upstream[id].iter().collect();
        while let Some(parent) = stack.pop() {
            if ancestors.insert(parent.clone()) {
                stack.extend(upstream[parent].iter());
            }
        }
        sets.insert(id.clone(), ancestors);
    }
    sets
}
