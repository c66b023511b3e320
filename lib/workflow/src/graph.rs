//! Workflow graph implementation using petgraph.
//!
//! A graph is loaded from the persisted node and edge arrays, either already
//! parsed or still JSON-encoded. Loading assigns ids to nodes that lack one,
//! merges legacy top-level `config` objects into `data.config`, parses each
//! node's typed configuration and drops edges whose endpoints do not exist.
//!
//! Structural problems are reported by [`WorkflowGraph::validate`] as a list
//! of coded problems rather than as errors, so a half-built graph can still
//! be loaded and edited.

use crate::definition::{PersistedEdge, PersistedNode};
use crate::edge::{Edge, EdgeRef, Handle};
use crate::error::GraphError;
use crate::node::{Node, NodeConfig, NodeId, NodeKind};
use cardflow_core::Result;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

/// Stable code identifying the cause of a validation problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemCode {
    /// No start node. Only reported when validating for execution.
    MissingStartNode,
    DuplicateStartNode,
    /// An edge referenced a node that does not exist and was dropped.
    DanglingEdge,
    /// A loop node has an edge without a `yes`/`no` handle.
    UnlabelledBranchEdge,
    /// A loop node has more than one `yes` or more than one `no` edge.
    DuplicateBranchEdge,
    /// A non-loop node has more than one outgoing edge.
    MultipleOutgoingEdges,
}

impl ProblemCode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MissingStartNode => "missing_start_node",
            Self::DuplicateStartNode => "duplicate_start_node",
            Self::DanglingEdge => "dangling_edge",
            Self::UnlabelledBranchEdge => "unlabelled_branch_edge",
            Self::DuplicateBranchEdge => "duplicate_branch_edge",
            Self::MultipleOutgoingEdges => "multiple_outgoing_edges",
        }
    }
}

impl fmt::Display for ProblemCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structural problem found in a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationProblem {
    pub code: ProblemCode,
    /// The node the problem is attached to, if any.
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl ValidationProblem {
    #[must_use]
    pub fn new(code: ProblemCode, node_id: Option<NodeId>, message: impl Into<String>) -> Self {
        Self {
            code,
            node_id,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Result of validating a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub problems: Vec<ValidationProblem>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }

    /// Returns true if any problem has the given code.
    #[must_use]
    pub fn has(&self, code: ProblemCode) -> bool {
        self.problems.iter().any(|p| p.code == code)
    }

    /// Codes of all problems, in report order.
    #[must_use]
    pub fn codes(&self) -> Vec<ProblemCode> {
        self.problems.iter().map(|p| p.code).collect()
    }
}

/// Node or edge payload as handed over by the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphPayload {
    /// A JSON-encoded array.
    Encoded(String),
    /// An already-parsed array (or a JSON string holding an encoded array).
    Parsed(JsonValue),
}

impl From<&str> for GraphPayload {
    fn from(json: &str) -> Self {
        Self::Encoded(json.to_string())
    }
}

impl From<String> for GraphPayload {
    fn from(json: String) -> Self {
        Self::Encoded(json)
    }
}

impl From<JsonValue> for GraphPayload {
    fn from(value: JsonValue) -> Self {
        Self::Parsed(value)
    }
}

impl GraphPayload {
    fn into_items<T: serde::de::DeserializeOwned>(self, what: &'static str) -> Result<Vec<T>, GraphError> {
        let invalid = |e: serde_json::Error| GraphError::InvalidJson {
            what,
            reason: e.to_string(),
        };
        let value = match self {
            Self::Encoded(text) if text.trim().is_empty() => JsonValue::Null,
            Self::Encoded(text) => serde_json::from_str(&text).map_err(invalid)?,
            Self::Parsed(JsonValue::String(text)) if text.trim().is_empty() => JsonValue::Null,
            Self::Parsed(JsonValue::String(text)) => serde_json::from_str(&text).map_err(invalid)?,
            Self::Parsed(value) => value,
        };
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value).map_err(invalid)?)
    }
}

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    /// Problems found while loading, such as dropped dangling edges.
    load_problems: Vec<ValidationProblem>,
}

impl WorkflowGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a graph from persisted node and edge arrays.
    ///
    /// # Errors
    ///
    /// Returns an error if a payload is not valid JSON, a node id repeats, a
    /// node has an unknown type, or a node's config does not fit its type.
    pub fn load(nodes: impl Into<GraphPayload>, edges: impl Into<GraphPayload>) -> Result<Self, GraphError> {
        let nodes: Vec<PersistedNode> = nodes.into().into_items("nodes")?;
        let edges: Vec<PersistedEdge> = edges.into().into_items("edges")?;

        let mut graph = Self::new();
        for persisted in nodes {
            let node = persisted.into_node()?;
            graph.add_node(node)?;
        }

        for persisted in edges {
            let handle = Handle::from(&persisted);
            let id = persisted
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("edge_{}", Ulid::new()));
            let source = NodeId::new(persisted.source);
            let target = NodeId::new(persisted.target);
            if let Err(missing) = graph.add_edge(&source, &target, Edge::new(id.clone(), handle)) {
                tracing::warn!(edge_id = %id, %source, %target, "dropping edge with missing endpoint");
                let node_id = match missing {
                    GraphError::NodeNotFound { node_id } => node_id,
                    _ => target,
                };
                graph.load_problems.push(ValidationProblem::new(
                    ProblemCode::DanglingEdge,
                    None,
                    format!("edge {id} references missing node {node_id}"),
                ));
            }
        }

        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            dropped_edges = graph.load_problems.len(),
            "loaded workflow graph"
        );
        Ok(graph)
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same id already exists.
    pub fn add_node(&mut self, node: Node) -> Result<(), GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNodeId { node_id: node.id }.into());
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id, index);
        Ok(())
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or target node doesn't exist.
    pub fn add_edge(&mut self, source: &NodeId, target: &NodeId, edge: Edge) -> std::result::Result<(), GraphError> {
        let source_index = *self
            .node_index_map
            .get(source)
            .ok_or_else(|| GraphError::NodeNotFound { node_id: source.clone() })?;
        let target_index = *self
            .node_index_map
            .get(target)
            .ok_or_else(|| GraphError::NodeNotFound { node_id: target.clone() })?;
        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeRef<'_>> {
        self.graph.edge_references().filter_map(|e| {
            Some(EdgeRef {
                edge: e.weight(),
                source: &self.graph.node_weight(e.source())?.id,
                target: &self.graph.node_weight(e.target())?.id,
            })
        })
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns every node of type `start`.
    pub fn start_nodes(&self) -> Vec<&Node> {
        self.nodes().filter(|n| n.kind() == NodeKind::Start).collect()
    }

    /// Returns the outgoing edges of a node with their targets, in insertion
    /// order.
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<(&Edge, &NodeId)> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        // petgraph walks a node's edges newest first.
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .filter_map(|edge| {
                let target = self.graph.node_weight(edge.target())?;
                Some((edge.id(), edge.weight(), &target.id))
            })
            .collect();
        edges.sort_by_key(|(id, _, _)| *id);
        edges.into_iter().map(|(_, edge, target)| (edge, target)).collect()
    }

    /// Returns the node reached by following `handle` from `node_id`.
    ///
    /// Branch nodes follow the edge with exactly that handle. Other nodes
    /// follow their single outgoing edge whatever its handle.
    #[must_use]
    pub fn next(&self, node_id: &NodeId, handle: Handle) -> Option<&NodeId> {
        let is_branch = self.node(node_id)?.kind().is_branch();
        self.outgoing(node_id)
            .into_iter()
            .find(|(edge, _)| !is_branch || edge.handle == handle)
            .map(|(_, target)| target)
    }

    /// Checks structural invariants that hold at design time.
    #[must_use]
    pub fn validate(&self) -> ValidationReport {
        let mut problems = self.load_problems.clone();

        for extra in self.start_nodes().iter().skip(1) {
            problems.push(ValidationProblem::new(
                ProblemCode::DuplicateStartNode,
                Some(extra.id.clone()),
                format!("node {} is a second start node", extra.id),
            ));
        }

        for node in self.nodes() {
            let outgoing = self.outgoing(&node.id);
            if node.kind().is_branch() {
                let count = |handle| outgoing.iter().filter(|(e, _)| e.handle == handle).count();
                if count(Handle::Default) > 0 {
                    problems.push(ValidationProblem::new(
                        ProblemCode::UnlabelledBranchEdge,
                        Some(node.id.clone()),
                        format!("loop node {} has an edge without a yes/no handle", node.id),
                    ));
                }
                for handle in [Handle::Yes, Handle::No] {
                    if count(handle) > 1 {
                        problems.push(ValidationProblem::new(
                            ProblemCode::DuplicateBranchEdge,
                            Some(node.id.clone()),
                            format!("loop node {} has more than one '{handle}' edge", node.id),
                        ));
                    }
                }
            } else if outgoing.len() > 1 {
                problems.push(ValidationProblem::new(
                    ProblemCode::MultipleOutgoingEdges,
                    Some(node.id.clone()),
                    format!("{} node {} has {} outgoing edges", node.kind(), node.id, outgoing.len()),
                ));
            }
        }

        ValidationReport { problems }
    }

    /// Checks structural invariants plus the ones execution needs.
    #[must_use]
    pub fn validate_for_run(&self) -> ValidationReport {
        let mut report = self.validate();
        if self.start_nodes().is_empty() {
            report.problems.insert(
                0,
                ValidationProblem::new(ProblemCode::MissingStartNode, None, "graph has no start node"),
            );
        }
        report
    }
}

impl PersistedNode {
    fn into_node(self) -> Result<Node, GraphError> {
        let id = match self.id {
            Some(id) if !id.is_empty() => NodeId::new(id),
            _ => NodeId::generate(),
        };
        let kind: NodeKind = self.node_type.parse().map_err(|node_type| GraphError::UnknownNodeType {
            node_id: id.clone(),
            node_type,
        })?;

        let mut data = match self.data {
            JsonValue::Null => serde_json::Map::new(),
            JsonValue::Object(map) => map,
            other => {
                return Err(GraphError::InvalidNodeConfig {
                    node_id: id,
                    reason: format!("data must be an object, got {other}"),
                }
                .into());
            }
        };
        if let Some(JsonValue::Object(legacy)) = self.config {
            merge_legacy_config(&mut data, legacy);
        }

        let config = data.get("config").cloned().unwrap_or(JsonValue::Null);
        let config = NodeConfig::parse(kind, &config).map_err(|e| GraphError::InvalidNodeConfig {
            node_id: id.clone(),
            reason: e.to_string(),
        })?;

        Ok(Node {
            id,
            position: self.position.unwrap_or_default(),
            config,
            data: JsonValue::Object(data),
        })
    }
}

/// Merges a legacy top-level config into `data.config`. Keys already present
/// in `data.config` win.
fn merge_legacy_config(data: &mut serde_json::Map<String, JsonValue>, legacy: serde_json::Map<String, JsonValue>) {
    let entry = data
        .entry("config")
        .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
    if !entry.is_object() {
        *entry = JsonValue::Object(serde_json::Map::new());
    }
    if let JsonValue::Object(config) = entry {
        for (key, value) in legacy {
            config.entry(key).or_insert(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{AssignConfig, DisplayConfig};
    use serde_json::json;

    fn load(nodes: JsonValue, edges: JsonValue) -> WorkflowGraph {
        WorkflowGraph::load(nodes, edges).expect("graph loads")
    }

    #[test]
    fn loads_parsed_and_encoded_payloads() {
        let nodes = json!([
            {"id": "s1", "type": "start"},
            {"id": "d1", "type": "display", "data": {"config": {"template": "Hi"}}}
        ]);
        let edges = json!([{"source": "s1", "target": "d1"}]);

        let parsed = load(nodes.clone(), edges.clone());
        let encoded = WorkflowGraph::load(nodes.to_string(), edges.to_string()).unwrap();
        let double = WorkflowGraph::load(json!(nodes.to_string()), json!(edges.to_string())).unwrap();

        for graph in [&parsed, &encoded, &double] {
            assert_eq!(graph.node_count(), 2);
            assert_eq!(graph.edge_count(), 1);
            assert_eq!(graph.next(&"s1".into(), Handle::Default), Some(&NodeId::from("d1")));
        }
        assert_eq!(
            parsed.node(&"d1".into()).unwrap().config,
            NodeConfig::Display(DisplayConfig {
                template: "Hi".into()
            })
        );
    }

    #[test]
    fn empty_payloads_load_an_empty_graph() {
        let graph = WorkflowGraph::load("", JsonValue::Null).unwrap();
        assert_eq!(graph.node_count(), 0);
        assert!(graph.validate().is_valid());
        assert_eq!(graph.validate_for_run().codes(), vec![ProblemCode::MissingStartNode]);
    }

    #[test]
    fn generates_missing_ids() {
        let graph = load(json!([{"type": "start"}, {"id": "", "type": "display"}]), json!([]));
        let ids: Vec<_> = graph.nodes().map(|n| n.id.clone()).collect();
        assert!(ids.iter().all(|id| id.as_str().starts_with("node_")));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn merges_legacy_top_level_config() {
        let graph = load(
            json!([{
                "id": "a1",
                "type": "assign",
                "config": {"sourceKey": "startinput", "targetKey": "legacy"},
                "data": {"config": {"targetKey": "Hero.name"}}
            }]),
            json!([]),
        );
        assert_eq!(
            graph.node(&"a1".into()).unwrap().config,
            NodeConfig::Assign(AssignConfig {
                source_key: "startinput".into(),
                target_key: "Hero.name".into(),
            })
        );
    }

    #[test]
    fn rejects_unknown_node_types() {
        let err = WorkflowGraph::load(json!([{"id": "x", "type": "teleport"}]), json!([])).unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let result = WorkflowGraph::load(
            json!([{"id": "s1", "type": "start"}, {"id": "s1", "type": "display"}]),
            json!([]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn drops_and_reports_dangling_edges() {
        let graph = load(
            json!([{"id": "s1", "type": "start"}]),
            json!([{"id": "e1", "source": "s1", "target": "ghost"}]),
        );
        assert_eq!(graph.edge_count(), 0);
        let report = graph.validate();
        assert_eq!(report.codes(), vec![ProblemCode::DanglingEdge]);
        assert!(report.problems[0].message.contains("ghost"));
    }

    #[test]
    fn two_start_nodes_and_two_yes_edges_have_distinct_codes() {
        let two_starts = load(json!([{"id": "s1", "type": "start"}, {"id": "s2", "type": "start"}]), json!([]));
        assert_eq!(two_starts.validate().codes(), vec![ProblemCode::DuplicateStartNode]);

        let two_yes = load(
            json!([
                {"id": "s1", "type": "start"},
                {"id": "l1", "type": "loop", "data": {"config": {"condition": "startinput not_empty"}}},
                {"id": "d1", "type": "display"},
                {"id": "d2", "type": "display"}
            ]),
            json!([
                {"source": "s1", "target": "l1"},
                {"source": "l1", "target": "d1", "sourceHandle": "yes"},
                {"source": "l1", "target": "d2", "sourceHandle": "yes"}
            ]),
        );
        assert_eq!(two_yes.validate().codes(), vec![ProblemCode::DuplicateBranchEdge]);
    }

    #[test]
    fn branch_and_linear_edge_rules() {
        let graph = load(
            json!([
                {"id": "s1", "type": "start"},
                {"id": "l1", "type": "loop"},
                {"id": "d1", "type": "display"},
                {"id": "d2", "type": "display"}
            ]),
            json!([
                {"source": "s1", "target": "l1"},
                {"source": "s1", "target": "d2"},
                {"source": "l1", "target": "d1"}
            ]),
        );
        let report = graph.validate();
        assert!(report.has(ProblemCode::MultipleOutgoingEdges));
        assert!(report.has(ProblemCode::UnlabelledBranchEdge));
        assert!(!report.has(ProblemCode::MissingStartNode));
    }

    #[test]
    fn loop_nodes_follow_matching_handle_only() {
        let graph = load(
            json!([
                {"id": "l1", "type": "loop"},
                {"id": "d1", "type": "display"},
                {"id": "d2", "type": "display"}
            ]),
            json!([
                {"source": "l1", "target": "d2", "sourceHandle": "no"},
                {"source": "l1", "target": "d1", "sourceHandle": "yes"},
                {"source": "d2", "target": "l1"}
            ]),
        );
        let l1 = NodeId::from("l1");
        assert_eq!(graph.next(&l1, Handle::Yes), Some(&NodeId::from("d1")));
        assert_eq!(graph.next(&l1, Handle::No), Some(&NodeId::from("d2")));
        assert_eq!(graph.next(&l1, Handle::Default), None);
        assert_eq!(graph.next(&"d2".into(), Handle::Default), Some(&l1));
        assert_eq!(graph.next(&"d1".into(), Handle::Default), None);
    }
}
