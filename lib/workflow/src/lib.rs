//! Workflow graphs for cardflow.
//!
//! This crate provides the graph model and the engine that runs it:
//!
//! - **Graph Model**: Directed graphs using petgraph, loaded from persisted
//!   node and edge JSON, with structural validation
//! - **Node Types**: Start, Assign, Loop, Display and Worktask
//! - **Conditions**: Comparisons that pick a loop node's `yes` or `no` branch
//! - **Execution**: Per-run state machine, stop and continue, progress events
//! - **Tasks**: The collaborator seam worktask nodes call out through

pub mod condition;
pub mod config;
pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod task;

pub use condition::{Comparison, Condition, ConditionError, Operator};
pub use config::EngineConfig;
pub use definition::{GraphMetadata, PersistedEdge, PersistedGraph, PersistedNode};
pub use edge::{Edge, EdgeRef, Handle};
pub use engine::Engine;
pub use error::{EngineError, GraphError, NodeFailure};
pub use execution::{
    EventSink, ExecutionEvent, ExecutionNode, NodeStatus, NoopEventSink, Run, RunFailure, RunStatus, StepRecord,
    StopHandle,
};
pub use graph::{GraphPayload, ProblemCode, ValidationProblem, ValidationReport, WorkflowGraph};
pub use node::{
    AssignConfig, DisplayConfig, LoopConfig, Node, NodeConfig, NodeId, NodeKind, Position, WorktaskConfig,
};
pub use task::{NoTasks, TaskError, TaskInvoker, TaskOutput, TaskRequest};
