//! External task invocation.
//!
//! A worktask node hands a resolved prompt to an external, possibly slow
//! collaborator and gets text back. The engine does not retry and applies no
//! timeout; both belong to the collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a worktask node sends to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: String,
    pub task_name: String,
    /// Prompt with every resolvable token substituted.
    pub prompt: String,
}

/// What the collaborator returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub text: String,
}

impl TaskOutput {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Errors from task invocation. The engine reports them verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task could not be reached.
    Unavailable { message: String },
    /// The task ran and failed.
    Failed { message: String },
    /// The task answered with something unusable.
    MalformedResponse { message: String },
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "task unavailable: {message}"),
            Self::Failed { message } => write!(f, "{message}"),
            Self::MalformedResponse { message } => write!(f, "malformed task response: {message}"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Trait for invoking external tasks.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput, TaskError>;
}

/// Invoker for graphs without worktask nodes; every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTasks;

#[async_trait]
impl TaskInvoker for NoTasks {
    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput, TaskError> {
        Err(TaskError::Unavailable {
            message: format!("no task invoker configured for task {}", request.task_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_tasks_always_fails() {
        let request = TaskRequest {
            task_id: "t1".into(),
            task_name: "Summarize".into(),
            prompt: "hi".into(),
        };
        let err = NoTasks.invoke(request).await.unwrap_err();
        assert!(err.to_string().contains("t1"));
    }

    #[test]
    fn failure_message_is_verbatim() {
        let err = TaskError::Failed {
            message: "quota exceeded".into(),
        };
        assert_eq!(err.to_string(), "quota exceeded");
    }
}
