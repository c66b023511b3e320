//! Workflow execution state machine.
//!
//! The state machine tracks:
//! - Overall run state: `idle → running → completed | stopped | error`
//! - Per-node state: `pending → executing → completed | error`
//! - The path taken through the graph, one record per executed step
//!
//! A [`Run`] owns its variable store. Nothing in it is shared with other runs.

use crate::node::{NodeId, NodeKind};
use crate::graph::WorkflowGraph;
use cardflow_core::WorkflowRunId;
use cardflow_variable::VariableStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;

/// The overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not started.
    Idle,
    Running,
    /// No further edge to follow.
    Completed,
    /// Halted by a stop request; may be continued.
    Stopped,
    /// Halted by a node error.
    Error,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state of a single node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Executing,
    Completed,
    Error,
}

/// Runtime projection of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    /// Output of the latest execution.
    pub output: Option<String>,
    /// Node the run moved to after the latest execution.
    pub next_node_id: Option<NodeId>,
    pub error: Option<String>,
    /// Tokens that did not resolve during the latest execution.
    pub misses: Vec<String>,
    /// How many times the node ran; loop cycles can revisit a node.
    pub visits: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionNode {
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            status: NodeStatus::Pending,
            output: None,
            next_node_id: None,
            error: None,
            misses: Vec::new(),
            visits: 0,
            started_at: None,
            finished_at: None,
        }
    }

    /// Starts execution of this node.
    pub fn begin(&mut self) {
        self.status = NodeStatus::Executing;
        self.visits += 1;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.error = None;
        self.misses.clear();
    }

    /// Marks the node as completed.
    pub fn complete(&mut self, output: Option<String>, next: Option<NodeId>, misses: Vec<String>) {
        self.status = NodeStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.output = output;
        self.next_node_id = next;
        self.misses = misses;
    }

    /// Marks the node as failed.
    pub fn fail(&mut self, error: String) {
        self.status = NodeStatus::Error;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub at: DateTime<Utc>,
}

/// Why a run halted with an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// The failing node, if the failure is attached to one.
    pub node_id: Option<NodeId>,
    pub message: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "node {node_id}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Cooperative stop signal for a run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Requests a stop. Observed before the next node step.
    pub fn stop(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// One execution of a graph against its own variable store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: WorkflowRunId,
    pub status: RunStatus,
    pub start_input: String,
    /// One entry per graph node, in graph order.
    pub nodes: Vec<ExecutionNode>,
    /// Steps in execution order.
    pub path: Vec<StepRecord>,
    pub store: VariableStore,
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Next node to execute.
    pub(crate) cursor: Option<NodeId>,
    #[serde(skip)]
    pub(crate) stop: StopHandle,
}

impl Run {
    /// Creates an idle run positioned at `entry`.
    #[must_use]
    pub fn new(graph: &WorkflowGraph, entry: NodeId, store: VariableStore) -> Self {
        Self {
            id: WorkflowRunId::new(),
            status: RunStatus::Idle,
            start_input: store.start_input().to_string(),
            nodes: graph
                .nodes()
                .map(|n| ExecutionNode::new(n.id.clone(), n.kind()))
                .collect(),
            path: Vec::new(),
            store,
            failure: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            cursor: Some(entry),
            stop: StopHandle::default(),
        }
    }

    /// Returns the execution state of a node.
    #[must_use]
    pub fn node(&self, node_id: &NodeId) -> Option<&ExecutionNode> {
        self.nodes.iter().find(|n| &n.id == node_id)
    }

    pub(crate) fn node_mut(&mut self, node_id: &NodeId) -> Option<&mut ExecutionNode> {
        self.nodes.iter_mut().find(|n| &n.id == node_id)
    }

    /// Returns the latest output of a node.
    #[must_use]
    pub fn output(&self, node_id: &NodeId) -> Option<&str> {
        self.node(node_id)?.output.as_deref()
    }

    /// Node ids in execution order.
    #[must_use]
    pub fn visited(&self) -> Vec<&NodeId> {
        self.path.iter().map(|s| &s.node_id).collect()
    }

    /// The node a continue would resume from.
    #[must_use]
    pub fn resume_point(&self) -> Option<&NodeId> {
        self.cursor.as_ref()
    }

    /// Handle that stops this run from another task.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Returns the duration of the run, if it has started.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some(end - start)
    }

    pub(crate) fn record_step(&mut self, node_id: NodeId, status: NodeStatus) {
        self.path.push(StepRecord {
            node_id,
            status,
            at: Utc::now(),
        });
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Progress notifications emitted during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: WorkflowRunId,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: WorkflowRunId,
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: WorkflowRunId,
        node_id: NodeId,
        output: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: WorkflowRunId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// A node wrote to the run store.
    VariableChanged {
        run_id: WorkflowRunId,
        key: String,
        value: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: WorkflowRunId,
        timestamp: DateTime<Utc>,
    },
    RunStopped {
        run_id: WorkflowRunId,
        next_node_id: Option<NodeId>,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: WorkflowRunId,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    /// Returns the run ID associated with this event.
    #[must_use]
    pub fn run_id(&self) -> WorkflowRunId {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::NodeStarted { run_id, .. }
            | Self::NodeCompleted { run_id, .. }
            | Self::NodeFailed { run_id, .. }
            | Self::VariableChanged { run_id, .. }
            | Self::RunCompleted { run_id, .. }
            | Self::RunStopped { run_id, .. }
            | Self::RunFailed { run_id, .. } => *run_id,
        }
    }

    /// Returns the timestamp of this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RunStarted { timestamp, .. }
            | Self::NodeStarted { timestamp, .. }
            | Self::NodeCompleted { timestamp, .. }
            | Self::NodeFailed { timestamp, .. }
            | Self::VariableChanged { timestamp, .. }
            | Self::RunCompleted { timestamp, .. }
            | Self::RunStopped { timestamp, .. }
            | Self::RunFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Receiver for execution events, registered once by the host.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ExecutionEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardflow_variable::VariableSnapshot;
    use serde_json::json;

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Stopped.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }

    #[test]
    fn execution_node_lifecycle() {
        let mut node = ExecutionNode::new(NodeId::from("d1"), NodeKind::Display);
        assert_eq!(node.status, NodeStatus::Pending);

        node.begin();
        assert_eq!(node.status, NodeStatus::Executing);
        assert_eq!(node.visits, 1);

        node.complete(Some("Hello".into()), None, vec!["@x.y".into()]);
        assert_eq!(node.status, NodeStatus::Completed);
        assert_eq!(node.output.as_deref(), Some("Hello"));

        node.begin();
        assert!(node.misses.is_empty());
        node.fail("boom".into());
        assert_eq!(node.status, NodeStatus::Error);
        assert_eq!(node.visits, 2);
    }

    #[test]
    fn new_run_projects_every_node() {
        let graph = WorkflowGraph::load(
            json!([{"id": "s1", "type": "start"}, {"id": "d1", "type": "display"}]),
            json!([]),
        )
        .unwrap();
        let store = VariableStore::seed(VariableSnapshot::default(), "hi");
        let run = Run::new(&graph, NodeId::from("s1"), store);

        assert_eq!(run.status, RunStatus::Idle);
        assert_eq!(run.start_input, "hi");
        assert_eq!(run.nodes.len(), 2);
        assert!(run.nodes.iter().all(|n| n.status == NodeStatus::Pending));
        assert_eq!(run.resume_point(), Some(&NodeId::from("s1")));
    }

    #[test]
    fn stop_handles_share_state() {
        let graph = WorkflowGraph::new();
        let run = Run::new(&graph, NodeId::from("s1"), VariableStore::default());
        let handle = run.stop_handle();
        handle.stop();
        assert!(run.stop_handle().is_stopped());
    }

    #[test]
    fn execution_event_serde_roundtrip() {
        let event = ExecutionEvent::VariableChanged {
            run_id: WorkflowRunId::new(),
            key: "Hero.name".to_string(),
            value: "World".to_string(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "variable_changed");
        let parsed: ExecutionEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(event, parsed);
    }
}
