//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `GraphError`: loading a persisted graph (JSON shape, node types, configs)
//! - `NodeFailure`: why a single node step failed during a run
//! - `EngineError`: engine entry points (run creation, resumption, config)
//!
//! Validation problems are not errors; see [`crate::graph::ValidationReport`].

use crate::graph::ValidationProblem;
use crate::node::NodeId;
use cardflow_core::WorkflowRunId;
use std::fmt;

/// Errors from loading a persisted graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The nodes or edges payload is not valid JSON of the expected shape.
    InvalidJson { what: &'static str, reason: String },
    /// A node declares a type the engine does not know.
    UnknownNodeType { node_id: NodeId, node_type: String },
    /// A node's config could not be parsed for its type.
    InvalidNodeConfig { node_id: NodeId, reason: String },
    /// Two nodes share an id.
    DuplicateNodeId { node_id: NodeId },
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson { what, reason } => write!(f, "invalid {what} payload: {reason}"),
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "node {node_id} has unknown type '{node_type}'")
            }
            Self::InvalidNodeConfig { node_id, reason } => {
                write!(f, "invalid config for node {node_id}: {reason}")
            }
            Self::DuplicateNodeId { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Why a node step failed. Recorded on the node and on the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFailure {
    /// The node's configuration is unusable (empty keys, missing condition).
    Configuration { reason: String },
    /// An assign node's source key is absent from the run store.
    MissingSourceKey { key: String },
    /// A loop node has no edge for the branch its condition selected.
    MissingBranch { branch: &'static str },
    /// The task collaborator failed; the message is passed through verbatim.
    TaskFailed { message: String },
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => write!(f, "node configuration error: {reason}"),
            Self::MissingSourceKey { key } => {
                write!(f, "source key '{key}' is not set in the variable store")
            }
            Self::MissingBranch { branch } => write!(f, "loop node has no '{branch}' edge"),
            Self::TaskFailed { message } => write!(f, "task failed: {message}"),
        }
    }
}

impl std::error::Error for NodeFailure {}

/// Errors from engine entry points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The graph has structural problems that block execution.
    InvalidGraph { problems: Vec<ValidationProblem> },
    /// The run is not in a state that allows the requested action.
    InvalidRunState { run_id: WorkflowRunId, status: String },
    /// The run's resume point does not exist in the graph.
    ResumeNodeMissing { run_id: WorkflowRunId, node_id: NodeId },
    /// The variable snapshot could not be fetched before the run.
    VariablesUnavailable { reason: String },
    /// Configuration could not be loaded.
    Config { reason: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGraph { problems } => {
                write!(f, "graph cannot run: ")?;
                for (i, problem) in problems.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{problem}")?;
                }
                Ok(())
            }
            Self::InvalidRunState { run_id, status } => {
                write!(f, "run {run_id} is {status}")
            }
            Self::ResumeNodeMissing { run_id, node_id } => {
                write!(f, "run {run_id} cannot resume: node {node_id} is not in the graph")
            }
            Self::VariablesUnavailable { reason } => {
                write!(f, "could not load variables for the run: {reason}")
            }
            Self::Config { reason } => write!(f, "invalid engine configuration: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}
