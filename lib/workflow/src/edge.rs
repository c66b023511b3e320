//! Edge types for workflow graphs.
//!
//! An edge connects a source node to a target node. Edges leaving a loop node
//! carry a `yes` or `no` handle; every other edge uses the default handle.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which outgoing slot of the source node an edge leaves from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handle {
    #[default]
    Default,
    Yes,
    No,
}

impl Handle {
    /// Parses a persisted `sourceHandle`; anything but `yes`/`no` is default.
    #[must_use]
    pub fn from_source_handle(handle: Option<&str>) -> Self {
        match handle {
            Some("yes") => Self::Yes,
            Some("no") => Self::No,
            _ => Self::Default,
        }
    }

    /// The persisted `sourceHandle`, `None` for the default handle.
    #[must_use]
    pub const fn as_source_handle(&self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Yes => Some("yes"),
            Self::No => Some("no"),
        }
    }

    /// The branch handle for a condition result.
    #[must_use]
    pub const fn branch(result: bool) -> Self {
        if result { Self::Yes } else { Self::No }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An edge in a loaded graph. Endpoints live in the petgraph structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: String,
    pub handle: Handle,
}

impl Edge {
    #[must_use]
    pub fn new(id: impl Into<String>, handle: Handle) -> Self {
        Self {
            id: id.into(),
            handle,
        }
    }
}

/// A complete edge reference including source and target node IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef<'a> {
    pub edge: &'a Edge,
    pub source: &'a NodeId,
    pub target: &'a NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_handle_parsing() {
        assert_eq!(Handle::from_source_handle(Some("yes")), Handle::Yes);
        assert_eq!(Handle::from_source_handle(Some("no")), Handle::No);
        assert_eq!(Handle::from_source_handle(Some("out")), Handle::Default);
        assert_eq!(Handle::from_source_handle(None), Handle::Default);
    }

    #[test]
    fn branch_handles() {
        assert_eq!(Handle::branch(true), Handle::Yes);
        assert_eq!(Handle::branch(false).to_string(), "no");
        assert_eq!(Handle::Default.as_source_handle(), None);
    }
}
