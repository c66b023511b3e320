//! Already-fetched variable snapshots and the lookup seam the resolver uses.

use crate::grammar::TokenRef;
use crate::variable::{Variable, VariableKey};
use std::collections::HashMap;

/// Source of values for token resolution.
///
/// Canonical tokens are looked up by identity; display and legacy tokens by
/// exact source name and field. Implementations never fetch: everything they
/// answer from is already in memory.
pub trait VariableLookup {
    /// Returns the value for a canonical token's identity triple.
    fn lookup_key(&self, key: &VariableKey) -> Option<String>;

    /// Returns the value for a display or legacy token.
    fn lookup_named(&self, source_name: &str, field: &str, short_id: Option<&str>) -> Option<String>;

    /// Returns the value a token refers to, if any.
    fn lookup(&self, reference: &TokenRef) -> Option<String> {
        match reference {
            TokenRef::Canonical { key, .. } => self.lookup_key(key),
            TokenRef::Named {
                source_name,
                field,
                short_id,
            } => self.lookup_named(source_name, field, short_id.as_deref()),
        }
    }
}

/// An in-memory set of variables, unique by identity triple.
#[derive(Debug, Clone, Default)]
pub struct VariableSnapshot {
    variables: Vec<Variable>,
    index: HashMap<VariableKey, usize>,
}

impl VariableSnapshot {
    /// Builds a snapshot. A later variable replaces an earlier one with the
    /// same identity.
    #[must_use]
    pub fn new(variables: impl IntoIterator<Item = Variable>) -> Self {
        let mut snapshot = Self::default();
        for variable in variables {
            snapshot.upsert(variable);
        }
        snapshot
    }

    /// Inserts or replaces a variable.
    pub fn upsert(&mut self, variable: Variable) {
        let key = variable.key();
        match self.index.get(&key) {
            Some(&position) => self.variables[position] = variable,
            None => {
                self.index.insert(key, self.variables.len());
                self.variables.push(variable);
            }
        }
    }

    /// Returns the variable with the given identity.
    #[must_use]
    pub fn get(&self, key: &VariableKey) -> Option<&Variable> {
        self.index.get(key).map(|&position| &self.variables[position])
    }

    /// Finds a variable by source name and field.
    ///
    /// With a short id, a variable whose id starts with it is preferred.
    /// Among equally good candidates the first in snapshot order wins.
    #[must_use]
    pub fn find_named(&self, source_name: &str, field: &str, short_id: Option<&str>) -> Option<&Variable> {
        let mut candidates = self.named(source_name, field);

        let first = candidates.next()?;
        let Some(short_id) = short_id else {
            return Some(first);
        };
        if first.id.starts_with(short_id) {
            return Some(first);
        }
        Some(
            candidates
                .find(|v| v.id.starts_with(short_id))
                .unwrap_or(first),
        )
    }

    /// Variables with the given source name and field, in snapshot order.
    pub fn named<'a, 'b>(&'a self, source_name: &'b str, field: &'b str) -> impl Iterator<Item = &'a Variable> + use<'a, 'b> {
        self.variables
            .iter()
            .filter(move |v| v.source_name == source_name && v.field == field)
    }

    /// The first variable with this name and field whose id starts with
    /// `short_id`. Unlike [`Self::find_named`] there is no fallback.
    #[must_use]
    pub fn find_by_short_id(&self, source_name: &str, field: &str, short_id: &str) -> Option<&Variable> {
        self.named(source_name, field).find(|v| v.id.starts_with(short_id))
    }

    /// Iterates variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl FromIterator<Variable> for VariableSnapshot {
    fn from_iter<I: IntoIterator<Item = Variable>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl VariableLookup for VariableSnapshot {
    fn lookup_key(&self, key: &VariableKey) -> Option<String> {
        self.get(key).map(|v| v.value_or_empty().to_string())
    }

    fn lookup_named(&self, source_name: &str, field: &str, short_id: Option<&str>) -> Option<String> {
        self.find_named(source_name, field, short_id)
            .map(|v| v.value_or_empty().to_string())
    }
}
