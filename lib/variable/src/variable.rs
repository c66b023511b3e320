//! Variable model.
//!
//! A variable is a named current value owned by some source (an NPC, a task,
//! a workflow, a user-defined custom value or the system). Its identity is the
//! `(source_type, id, field)` triple; the interchange token and the display
//! label are derived from it and never stored.

use crate::error::VariableError;
use crate::grammar;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who owns a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Npc,
    Task,
    Workflow,
    Custom,
    System,
}

impl SourceType {
    /// All source types, in token-grammar order.
    pub const ALL: [SourceType; 5] = [
        Self::Npc,
        Self::Task,
        Self::Workflow,
        Self::Custom,
        Self::System,
    ];

    /// Returns the lowercase wire name used inside tokens.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Npc => "npc",
            Self::Task => "task",
            Self::Workflow => "workflow",
            Self::Custom => "custom",
            Self::System => "system",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown source type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSourceType(pub String);

impl fmt::Display for UnknownSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variable source type: {}", self.0)
    }
}

impl std::error::Error for UnknownSourceType {}

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSourceType(s.to_string()))
    }
}

/// The identity triple of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableKey {
    pub source_type: SourceType,
    pub entity_id: String,
    pub field: String,
}

impl VariableKey {
    #[must_use]
    pub fn new(source_type: SourceType, entity_id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            source_type,
            entity_id: entity_id.into(),
            field: field.into(),
        }
    }

    /// Checks that this key survives a trip through its interchange token.
    ///
    /// # Errors
    ///
    /// Returns [`VariableError::InvalidIdentity`] when the entity id or field
    /// holds characters the token grammar cannot read back.
    pub fn validate(&self) -> Result<(), VariableError> {
        grammar::check_identity(&self.entity_id, &self.field).map_err(|reason| {
            VariableError::InvalidIdentity {
                key: self.clone(),
                reason: reason.to_string(),
            }
        })
    }

    /// Returns the canonical interchange token for this key.
    #[must_use]
    pub fn token(&self) -> String {
        grammar::canonical_token(self.source_type, &self.entity_id, &self.field)
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source_type, self.entity_id, self.field)
    }
}

/// A named, typed current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Id of the owning entity.
    pub id: String,
    /// Field of the owning entity this variable exposes.
    pub field: String,
    /// Human name of the owning entity.
    pub source_name: String,
    /// Kind of the owning entity.
    pub source_type: SourceType,
    /// Current value, if any.
    #[serde(default)]
    pub value: Option<String>,
}

impl Variable {
    #[must_use]
    pub fn new(
        source_type: SourceType,
        id: impl Into<String>,
        field: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            field: field.into(),
            source_name: source_name.into(),
            source_type,
            value: None,
        }
    }

    /// Sets the current value.
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Returns the identity triple.
    #[must_use]
    pub fn key(&self) -> VariableKey {
        VariableKey::new(self.source_type, self.id.clone(), self.field.clone())
    }

    /// Returns true if this variable has the given identity.
    #[must_use]
    pub fn matches(&self, source_type: SourceType, entity_id: &str, field: &str) -> bool {
        self.source_type == source_type && self.id == entity_id && self.field == field
    }

    /// The canonical interchange token, e.g. `@gv_custom_abcd_name-=`.
    #[must_use]
    pub fn identifier(&self) -> String {
        grammar::canonical_token(self.source_type, &self.id, &self.field)
    }

    /// The human label, e.g. `@Alice.name#abcd`.
    #[must_use]
    pub fn display_identifier(&self) -> String {
        grammar::display_token(&self.source_name, &self.field, &self.id)
    }

    /// The run-scoped store key, `sourceName.field`.
    #[must_use]
    pub fn store_key(&self) -> String {
        format!("{}.{}", self.source_name, self.field)
    }

    /// Returns the value, or the empty string when unset.
    #[must_use]
    pub fn value_or_empty(&self) -> &str {
        self.value.as_deref().unwrap_or_default()
    }
}
