//! Error types for the variable crate.
//!
//! Resolution misses, depth exhaustion and content drift are not errors:
//! they are reported as values by the resolver and the repairer. The
//! failures here come from the persistence collaborator or from identities
//! the token grammar cannot encode.

use crate::variable::VariableKey;
use std::fmt;

/// Errors from variable persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    /// No variable with the given identity exists.
    NotFound { key: VariableKey },
    /// The identity cannot be written as an interchange token.
    InvalidIdentity { key: VariableKey, reason: String },
    /// The backing store rejected or failed the operation.
    StorageFailed { reason: String },
}

impl fmt::Display for VariableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "variable not found: {key}"),
            Self::InvalidIdentity { key, reason } => write!(f, "invalid variable identity {key}: {reason}"),
            Self::StorageFailed { reason } => write!(f, "variable storage failed: {reason}"),
        }
    }
}

impl std::error::Error for VariableError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::SourceType;

    #[test]
    fn not_found_names_the_triple() {
        let err = VariableError::NotFound {
            key: VariableKey::new(SourceType::Npc, "n1", "mood"),
        };
        assert_eq!(err.to_string(), "variable not found: npc:n1:mood");
    }
}
