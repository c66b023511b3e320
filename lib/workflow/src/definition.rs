//! Persisted workflow definitions.
//!
//! A workflow is stored as two independently JSON-encoded arrays, `nodes` and
//! `edges`, next to a metadata blob carrying a `version` counter and an
//! `updatedAt` timestamp.

use crate::edge::Handle;
use crate::error::GraphError;
use crate::graph::WorkflowGraph;
use crate::node::{NodeConfig, Position};
use cardflow_core::{Result, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A node as written by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub data: JsonValue,
    /// Legacy producers put the config here instead of in `data.config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonValue>,
}

/// An edge as written by the editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEdge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// Metadata stored alongside the graph arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// A workflow graph in its persisted form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedGraph {
    pub workflow_id: WorkflowId,
    /// JSON-encoded node array.
    pub nodes: String,
    /// JSON-encoded edge array.
    pub edges: String,
    pub metadata: GraphMetadata,
}

impl PersistedGraph {
    /// An empty workflow at version 0.
    #[must_use]
    pub fn new(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            nodes: "[]".to_string(),
            edges: "[]".to_string(),
            metadata: GraphMetadata {
                version: 0,
                updated_at: Utc::now(),
            },
        }
    }

    /// Loads the stored arrays into a graph.
    ///
    /// # Errors
    ///
    /// Returns an error under the same conditions as [`WorkflowGraph::load`].
    pub fn load(&self) -> Result<WorkflowGraph, GraphError> {
        WorkflowGraph::load(self.nodes.as_str(), self.edges.as_str())
    }

    /// Replaces the stored arrays with `graph`, bumping the version.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be encoded.
    pub fn save(&mut self, graph: &WorkflowGraph) -> Result<(), GraphError> {
        let (nodes, edges) = encode(graph)?;
        self.nodes = nodes;
        self.edges = edges;
        self.metadata.version += 1;
        self.metadata.updated_at = Utc::now();
        tracing::debug!(
            workflow_id = %self.workflow_id,
            version = self.metadata.version,
            "saved workflow graph"
        );
        Ok(())
    }
}

fn encode(graph: &WorkflowGraph) -> Result<(String, String), GraphError> {
    let invalid = |what| {
        move |e: serde_json::Error| GraphError::InvalidJson {
            what,
            reason: e.to_string(),
        }
    };

    let mut nodes = Vec::with_capacity(graph.node_count());
    for node in graph.nodes() {
        let mut data = match &node.data {
            JsonValue::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let typed = config_to_json(&node.config).map_err(invalid("nodes"))?;
        match data.get_mut("config") {
            Some(JsonValue::Object(existing)) => {
                if let JsonValue::Object(typed) = typed {
                    existing.extend(typed);
                }
            }
            _ => {
                data.insert("config".to_string(), typed);
            }
        }
        nodes.push(PersistedNode {
            id: Some(node.id.to_string()),
            node_type: node.kind().to_string(),
            position: Some(node.position),
            data: JsonValue::Object(data),
            config: None,
        });
    }

    let edges: Vec<PersistedEdge> = graph
        .edges()
        .map(|e| PersistedEdge {
            id: Some(e.edge.id.clone()),
            source: e.source.to_string(),
            target: e.target.to_string(),
            source_handle: e.edge.handle.as_source_handle().map(str::to_string),
        })
        .collect();

    Ok((
        serde_json::to_string(&nodes).map_err(invalid("nodes"))?,
        serde_json::to_string(&edges).map_err(invalid("edges"))?,
    ))
}

fn config_to_json(config: &NodeConfig) -> serde_json::Result<JsonValue> {
    match config {
        NodeConfig::Start => Ok(JsonValue::Object(serde_json::Map::new())),
        NodeConfig::Assign(c) => serde_json::to_value(c),
        NodeConfig::Loop(c) => serde_json::to_value(c),
        NodeConfig::Display(c) => serde_json::to_value(c),
        NodeConfig::Worktask(c) => serde_json::to_value(c),
    }
}

impl From<&PersistedEdge> for Handle {
    fn from(edge: &PersistedEdge) -> Self {
        Handle::from_source_handle(edge.source_handle.as_deref())
    }
}
