//! Workflow node types and configurations.
//!
//! Each node has:
//! - An id, either taken from the persisted graph or generated on load
//! - A type (`start`, `assign`, `loop`, `display`, `worktask`)
//! - A canvas position, kept only so the graph can be saved back unchanged
//! - A typed configuration parsed from `data.config`

use crate::condition::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a node within a graph.
///
/// Persisted graphs use arbitrary strings, so this wraps a `String`. Ids
/// generated on load take the form `node_<ulid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh random node id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("node_{}", Ulid::new()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The type of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Entry point; seeds the start input.
    Start,
    /// Copies one store key to another.
    Assign,
    /// Two-way branch on a condition.
    Loop,
    /// Renders a token-bearing template.
    Display,
    /// Invokes an external task.
    Worktask,
}

impl NodeKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Assign => "assign",
            Self::Loop => "loop",
            Self::Display => "display",
            Self::Worktask => "worktask",
        }
    }

    /// Whether outgoing edges of this kind are keyed by `yes`/`no`.
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(self, Self::Loop)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "assign" => Ok(Self::Assign),
            "loop" => Ok(Self::Loop),
            "display" => Ok(Self::Display),
            "worktask" => Ok(Self::Worktask),
            other => Err(other.to_string()),
        }
    }
}

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Configuration for assign nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignConfig {
    /// Store key to read.
    #[serde(default)]
    pub source_key: String,
    /// Store key to write.
    #[serde(default)]
    pub target_key: String,
}

/// Configuration for loop (branch) nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default)]
    pub condition: Option<Condition>,
}

/// Configuration for display nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub template: String,
}

/// Configuration for worktask nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktaskConfig {
    #[serde(default)]
    pub task_id: String,
    /// Name the result is stored under; falls back to the task id.
    #[serde(default)]
    pub task_name: String,
    /// Token-bearing prompt sent to the task.
    #[serde(default)]
    pub prompt: String,
}

impl WorktaskConfig {
    /// Store key the task result is written to: `<taskName>.output`.
    #[must_use]
    pub fn output_key(&self) -> String {
        let name = if self.task_name.is_empty() {
            &self.task_id
        } else {
            &self.task_name
        };
        format!("{name}.output")
    }
}

/// Type-specific node configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeConfig {
    Start,
    Assign(AssignConfig),
    Loop(LoopConfig),
    Display(DisplayConfig),
    Worktask(WorktaskConfig),
}

impl NodeConfig {
    /// Parses the config object for a node of the given kind.
    ///
    /// A missing or `null` config yields the defaults for that kind.
    pub fn parse(kind: NodeKind, config: &JsonValue) -> Result<Self, serde_json::Error> {
        let config = if config.is_null() {
            JsonValue::Object(serde_json::Map::new())
        } else {
            config.clone()
        };
        Ok(match kind {
            NodeKind::Start => Self::Start,
            NodeKind::Assign => Self::Assign(serde_json::from_value(config)?),
            NodeKind::Loop => Self::Loop(serde_json::from_value(config)?),
            NodeKind::Display => Self::Display(serde_json::from_value(config)?),
            NodeKind::Worktask => Self::Worktask(serde_json::from_value(config)?),
        })
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        match self {
            Self::Start => NodeKind::Start,
            Self::Assign(_) => NodeKind::Assign,
            Self::Loop(_) => NodeKind::Loop,
            Self::Display(_) => NodeKind::Display,
            Self::Worktask(_) => NodeKind::Worktask,
        }
    }
}

/// A node in a loaded workflow graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub config: NodeConfig,
    /// The persisted `data` object, with any legacy top-level config merged
    /// into `data.config`.
    pub data: JsonValue,
}

impl Node {
    /// Creates a node with an empty `data` object.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            config,
            data: JsonValue::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Optional human label from `data.label`.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.data.get("label").and_then(JsonValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_kind_parses_wire_names() {
        assert_eq!("worktask".parse::<NodeKind>(), Ok(NodeKind::Worktask));
        assert!("trigger".parse::<NodeKind>().is_err());
        assert!(NodeKind::Loop.is_branch());
        assert!(!NodeKind::Display.is_branch());
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert!(a.as_str().starts_with("node_"));
        assert_ne!(a, b);
    }

    #[test]
    fn parses_camel_case_configs() {
        let assign = NodeConfig::parse(
            NodeKind::Assign,
            &json!({"sourceKey": "startinput", "targetKey": "Hero.name"}),
        )
        .unwrap();
        assert_eq!(
            assign,
            NodeConfig::Assign(AssignConfig {
                source_key: "startinput".into(),
                target_key: "Hero.name".into(),
            })
        );

        let task = NodeConfig::parse(NodeKind::Worktask, &json!({"taskId": "t1", "prompt": "hi"})).unwrap();
        let NodeConfig::Worktask(task) = task else {
            panic!("expected worktask config");
        };
        assert_eq!(task.output_key(), "t1.output");
    }

    #[test]
    fn missing_config_uses_defaults() {
        let display = NodeConfig::parse(NodeKind::Display, &JsonValue::Null).unwrap();
        assert_eq!(display, NodeConfig::Display(DisplayConfig::default()));
    }

    #[test]
    fn wrongly_typed_config_is_rejected() {
        assert!(NodeConfig::parse(NodeKind::Display, &json!({"template": 42})).is_err());
    }
}
