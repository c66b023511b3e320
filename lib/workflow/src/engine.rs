//! Workflow execution engine.
//!
//! The engine walks a validated graph one node at a time, starting at the
//! single start node and following exactly one outgoing edge per step. Each
//! run owns its variable store, so runs of the same graph never share state.
//!
//! Between steps the engine checks for a stop request, enforces the step
//! ceiling and applies the configured pacing delay. A stopped run keeps its
//! resume point and can be continued with [`Engine::continue_run`]. A node
//! failure halts the run in the error state with the failing node recorded.

use crate::config::EngineConfig;
use crate::edge::Handle;
use crate::error::{EngineError, GraphError, NodeFailure};
use crate::execution::{
    EventSink, ExecutionEvent, NodeStatus, NoopEventSink, Run, RunFailure, RunStatus, StopHandle,
};
use crate::graph::{GraphPayload, WorkflowGraph};
use crate::node::{Node, NodeConfig, NodeId};
use crate::task::{NoTasks, TaskInvoker, TaskRequest};
use cardflow_core::{Result, WorkflowRunId};
use cardflow_variable::{Resolver, VariableRepository, VariableSnapshot, VariableStore};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// What a successful node step produced.
#[derive(Debug, Default)]
struct StepOutcome {
    output: Option<String>,
    next: Option<NodeId>,
    misses: Vec<String>,
}

/// Executes workflow graphs.
///
/// `T` answers worktask nodes and `S` receives progress events. Both are
/// registered once when the engine is built.
pub struct Engine<T = NoTasks, S = NoopEventSink> {
    config: EngineConfig,
    resolver: Resolver,
    tasks: T,
    events: S,
    active: Mutex<HashMap<WorkflowRunId, StopHandle>>,
}

impl Engine {
    /// Creates an engine without a task invoker or event sink.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self::with_collaborators(config, NoTasks, NoopEventSink)
    }
}

impl<T: TaskInvoker, S: EventSink> Engine<T, S> {
    #[must_use]
    pub fn with_collaborators(config: EngineConfig, tasks: T, events: S) -> Self {
        Self {
            resolver: config.resolver(),
            config,
            tasks,
            events,
            active: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads a graph from its persisted nodes and edges payloads.
    ///
    /// # Errors
    ///
    /// See [`WorkflowGraph::load`].
    pub fn load_graph(
        &self,
        nodes: impl Into<GraphPayload>,
        edges: impl Into<GraphPayload>,
    ) -> Result<WorkflowGraph, GraphError> {
        WorkflowGraph::load(nodes, edges)
    }

    /// Creates an idle run positioned at the start node, with a store seeded
    /// from `snapshot` and `start_input`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidGraph`] if validation finds any problem,
    /// including a missing start node.
    pub fn create_run(
        &self,
        graph: &WorkflowGraph,
        snapshot: VariableSnapshot,
        start_input: impl Into<String>,
    ) -> Result<Run, EngineError> {
        let report = graph.validate_for_run();
        let Some(start) = graph.start_nodes().first().map(|n| n.id.clone()) else {
            return Err(EngineError::InvalidGraph {
                problems: report.problems,
            }
            .into());
        };
        if !report.is_valid() {
            warn!(problems = ?report.codes(), "refusing to run invalid graph");
            return Err(EngineError::InvalidGraph {
                problems: report.problems,
            }
            .into());
        }

        let store = VariableStore::seed(snapshot, start_input);
        let run = Run::new(graph, start, store);
        debug!(run_id = %run.id, nodes = run.nodes.len(), "created run");
        Ok(run)
    }

    /// Creates a run and executes it until it completes, stops or fails.
    ///
    /// Every call starts from scratch with a freshly seeded store.
    ///
    /// # Errors
    ///
    /// See [`Engine::create_run`]. Node failures are not errors; they are
    /// recorded on the returned run.
    pub async fn start_run(
        &self,
        graph: &WorkflowGraph,
        snapshot: VariableSnapshot,
        start_input: impl Into<String>,
    ) -> Result<Run, EngineError> {
        let mut run = self.create_run(graph, snapshot, start_input)?;
        self.execute(graph, &mut run).await?;
        Ok(run)
    }

    /// Like [`Engine::start_run`], fetching the snapshot from a repository.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::VariablesUnavailable`] if the repository fails.
    pub async fn start_run_from<R: VariableRepository + ?Sized>(
        &self,
        graph: &WorkflowGraph,
        variables: &R,
        start_input: impl Into<String>,
    ) -> Result<Run, EngineError> {
        let snapshot = variables
            .snapshot()
            .await
            .map_err(|e| EngineError::VariablesUnavailable { reason: e.to_string() })?;
        self.start_run(graph, snapshot, start_input).await
    }

    /// Executes an idle run.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRunState`] if the run is not idle, or
    /// [`EngineError::ResumeNodeMissing`] if its entry node is not in `graph`.
    pub async fn execute(&self, graph: &WorkflowGraph, run: &mut Run) -> Result<RunStatus, EngineError> {
        if run.status != RunStatus::Idle {
            return Err(invalid_state(run));
        }
        self.check_cursor(graph, run)?;
        run.started_at = Some(Utc::now());
        Ok(self.drive(graph, run, false).await)
    }

    /// Continues a stopped run from its resume point.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRunState`] unless the run is stopped, or
    /// [`EngineError::ResumeNodeMissing`] if the resume point is gone.
    pub async fn continue_run(&self, graph: &WorkflowGraph, run: &mut Run) -> Result<RunStatus, EngineError> {
        if run.status != RunStatus::Stopped {
            return Err(invalid_state(run));
        }
        self.check_cursor(graph, run)?;
        run.stop = StopHandle::default();
        run.finished_at = None;
        Ok(self.drive(graph, run, true).await)
    }

    /// Requests a stop for an executing run. Returns false if the run is not
    /// executing on this engine.
    pub fn stop_run(&self, run_id: &WorkflowRunId) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.get(run_id) {
            Some(handle) => {
                info!(run_id = %run_id, "stop requested");
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Ids of runs currently executing on this engine.
    #[must_use]
    pub fn active_runs(&self) -> Vec<WorkflowRunId> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.keys().copied().collect()
    }

    fn check_cursor(&self, graph: &WorkflowGraph, run: &Run) -> Result<(), EngineError> {
        match &run.cursor {
            Some(node_id) if graph.node(node_id).is_none() => Err(EngineError::ResumeNodeMissing {
                run_id: run.id,
                node_id: node_id.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, fields(run_id = %run.id, resumed = resumed))]
    async fn drive(&self, graph: &WorkflowGraph, run: &mut Run, resumed: bool) -> RunStatus {
        let _registration = Registration::new(&self.active, run.id, run.stop.clone());
        let token = run.stop.token().clone();

        run.status = RunStatus::Running;
        info!(from = ?run.cursor.as_ref().map(NodeId::as_str), "run started");
        self.emit(ExecutionEvent::RunStarted {
            run_id: run.id,
            resumed,
            timestamp: Utc::now(),
        });

        let mut stepped = false;
        loop {
            let Some(node_id) = run.cursor.clone() else {
                self.complete(run);
                break;
            };
            if token.is_cancelled() {
                self.stopped(run, node_id);
                break;
            }
            if let Some(limit) = self.config.max_steps
                && run.path.len() as u64 >= limit
            {
                let message = format!("step limit of {limit} exceeded");
                self.halt(run, None, message);
                break;
            }
            if stepped && !self.pace(&token).await {
                self.stopped(run, node_id);
                break;
            }
            stepped = true;

            let Some(node) = graph.node(&node_id) else {
                let message = format!("node {node_id} is not in the graph");
                self.halt(run, None, message);
                break;
            };
            if !self.step(graph, node, run).await {
                break;
            }
        }

        run.status
    }

    /// Waits out the pacing delay. Returns false if a stop arrives first.
    async fn pace(&self, token: &CancellationToken) -> bool {
        let Some(delay) = self.config.step_delay() else {
            return true;
        };
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = token.cancelled() => false,
        }
    }

    /// Executes one node. Returns false if the run halted.
    async fn step(&self, graph: &WorkflowGraph, node: &Node, run: &mut Run) -> bool {
        let node_id = node.id.clone();
        if let Some(state) = run.node_mut(&node_id) {
            state.begin();
        }
        debug!(node_id = %node_id, kind = %node.kind(), "executing node");
        self.emit(ExecutionEvent::NodeStarted {
            run_id: run.id,
            node_id: node_id.clone(),
            timestamp: Utc::now(),
        });

        match self.execute_node(graph, node, run).await {
            Ok(outcome) => {
                if let Some(state) = run.node_mut(&node_id) {
                    state.complete(outcome.output.clone(), outcome.next.clone(), outcome.misses);
                }
                run.record_step(node_id.clone(), NodeStatus::Completed);
                self.emit(ExecutionEvent::NodeCompleted {
                    run_id: run.id,
                    node_id,
                    output: outcome.output,
                    timestamp: Utc::now(),
                });
                run.cursor = outcome.next;
                true
            }
            Err(failure) => {
                let message = failure.to_string();
                if let Some(state) = run.node_mut(&node_id) {
                    state.fail(message.clone());
                }
                run.record_step(node_id.clone(), NodeStatus::Error);
                self.emit(ExecutionEvent::NodeFailed {
                    run_id: run.id,
                    node_id: node_id.clone(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                self.halt(run, Some(node_id), message);
                false
            }
        }
    }

    async fn execute_node(
        &self,
        graph: &WorkflowGraph,
        node: &Node,
        run: &mut Run,
    ) -> std::result::Result<StepOutcome, NodeFailure> {
        let next_default = || graph.next(&node.id, Handle::Default).cloned();

        match &node.config {
            NodeConfig::Start => Ok(StepOutcome {
                output: Some(run.store.start_input().to_string()),
                next: next_default(),
                misses: Vec::new(),
            }),

            NodeConfig::Assign(config) => {
                if config.source_key.is_empty() || config.target_key.is_empty() {
                    return Err(NodeFailure::Configuration {
                        reason: "assign node needs both sourceKey and targetKey".to_string(),
                    });
                }
                let value = run
                    .store
                    .get(&config.source_key)
                    .ok_or_else(|| NodeFailure::MissingSourceKey {
                        key: config.source_key.clone(),
                    })?
                    .to_string();
                self.write(run, &config.target_key, &value);
                Ok(StepOutcome {
                    output: Some(value),
                    next: next_default(),
                    misses: Vec::new(),
                })
            }

            NodeConfig::Loop(config) => {
                let condition = config.condition.as_ref().ok_or_else(|| NodeFailure::Configuration {
                    reason: "loop node has no condition".to_string(),
                })?;
                let result = condition
                    .evaluate(&run.store, &self.resolver)
                    .map_err(|e| NodeFailure::Configuration { reason: e.to_string() })?;
                let handle = Handle::branch(result);
                debug!(node_id = %node.id, branch = %handle, "condition evaluated");
                let next = graph
                    .next(&node.id, handle)
                    .cloned()
                    .ok_or(NodeFailure::MissingBranch {
                        branch: handle.as_str(),
                    })?;
                Ok(StepOutcome {
                    output: Some(handle.as_str().to_string()),
                    next: Some(next),
                    misses: Vec::new(),
                })
            }

            NodeConfig::Display(config) => {
                let resolution = self.resolver.resolve(&config.template, &run.store);
                let misses: Vec<String> = resolution.misses.into_iter().map(|m| m.token).collect();
                if !misses.is_empty() {
                    debug!(node_id = %node.id, ?misses, "display left tokens unresolved");
                }
                Ok(StepOutcome {
                    output: Some(resolution.text),
                    next: next_default(),
                    misses,
                })
            }

            NodeConfig::Worktask(config) => {
                if config.task_id.is_empty() {
                    return Err(NodeFailure::Configuration {
                        reason: "worktask node has no taskId".to_string(),
                    });
                }
                let resolution = self.resolver.resolve(&config.prompt, &run.store);
                let misses: Vec<String> = resolution.misses.into_iter().map(|m| m.token).collect();
                let request = TaskRequest {
                    task_id: config.task_id.clone(),
                    task_name: config.task_name.clone(),
                    prompt: resolution.text,
                };
                debug!(node_id = %node.id, task_id = %request.task_id, "invoking task");
                let output = self
                    .tasks
                    .invoke(request)
                    .await
                    .map_err(|e| NodeFailure::TaskFailed { message: e.to_string() })?;
                self.write(run, &config.output_key(), &output.text);
                Ok(StepOutcome {
                    output: Some(output.text),
                    next: next_default(),
                    misses,
                })
            }
        }
    }

    fn write(&self, run: &mut Run, key: &str, value: &str) {
        run.store.set(key, value);
        self.emit(ExecutionEvent::VariableChanged {
            run_id: run.id,
            key: key.to_string(),
            value: value.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn complete(&self, run: &mut Run) {
        run.finish(RunStatus::Completed);
        info!(steps = run.path.len(), "run completed");
        self.emit(ExecutionEvent::RunCompleted {
            run_id: run.id,
            timestamp: Utc::now(),
        });
    }

    fn stopped(&self, run: &mut Run, next: NodeId) {
        run.cursor = Some(next.clone());
        run.finish(RunStatus::Stopped);
        info!(next_node_id = %next, "run stopped");
        self.emit(ExecutionEvent::RunStopped {
            run_id: run.id,
            next_node_id: Some(next),
            timestamp: Utc::now(),
        });
    }

    fn halt(&self, run: &mut Run, node_id: Option<NodeId>, message: String) {
        let failure = RunFailure { node_id, message };
        warn!(error = %failure, "run failed");
        run.cursor = None;
        run.finish(RunStatus::Error);
        self.emit(ExecutionEvent::RunFailed {
            run_id: run.id,
            error: failure.to_string(),
            timestamp: Utc::now(),
        });
        run.failure = Some(failure);
    }

    fn emit(&self, event: ExecutionEvent) {
        self.events.emit(event);
    }
}

fn invalid_state(run: &Run) -> rootcause::Report<EngineError> {
    EngineError::InvalidRunState {
        run_id: run.id,
        status: run.status.to_string(),
    }
    .into()
}

/// Keeps a run in the active registry while it executes.
struct Registration<'a> {
    active: &'a Mutex<HashMap<WorkflowRunId, StopHandle>>,
    run_id: WorkflowRunId,
}

impl<'a> Registration<'a> {
    fn new(active: &'a Mutex<HashMap<WorkflowRunId, StopHandle>>, run_id: WorkflowRunId, handle: StopHandle) -> Self {
        active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, handle);
        Self { active, run_id }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.run_id);
    }
}
