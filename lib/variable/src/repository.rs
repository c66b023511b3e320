//! Persistence seam for variables.

use crate::error::VariableError;
use crate::snapshot::VariableSnapshot;
use crate::variable::{SourceType, Variable, VariableKey};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for variable persistence.
///
/// The engine reads one snapshot at run creation and never fetches during
/// resolution. Writes made by a run stay in its run-scoped store.
#[async_trait]
pub trait VariableRepository: Send + Sync {
    /// Returns every persisted variable.
    async fn get_variables(&self) -> Result<Vec<Variable>, VariableError>;

    /// Returns one variable by identity.
    async fn get_variable(
        &self,
        source_type: SourceType,
        entity_id: &str,
        field: &str,
    ) -> Result<Variable, VariableError>;

    /// Inserts or replaces a variable and returns the stored value.
    ///
    /// Identities the token grammar cannot encode are rejected with
    /// [`VariableError::InvalidIdentity`].
    async fn upsert_variable(&self, variable: Variable) -> Result<Variable, VariableError>;

    /// Deletes the variables of an entity, or only one field of it.
    ///
    /// Returns how many were removed.
    async fn delete_variables(&self, entity_id: &str, field: Option<&str>) -> Result<usize, VariableError>;

    /// Loads every variable into a snapshot.
    async fn snapshot(&self) -> Result<VariableSnapshot, VariableError> {
        Ok(VariableSnapshot::new(self.get_variables().await?))
    }
}

/// Variable repository kept in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVariableRepository {
    variables: Arc<RwLock<Vec<Variable>>>,
}

impl InMemoryVariableRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository pre-filled with variables.
    #[must_use]
    pub fn with_variables(variables: impl IntoIterator<Item = Variable>) -> Self {
        let snapshot = VariableSnapshot::new(variables);
        Self {
            variables: Arc::new(RwLock::new(snapshot.iter().cloned().collect())),
        }
    }
}

#[async_trait]
impl VariableRepository for InMemoryVariableRepository {
    async fn get_variables(&self) -> Result<Vec<Variable>, VariableError> {
        Ok(self.variables.read().await.clone())
    }

    async fn get_variable(
        &self,
        source_type: SourceType,
        entity_id: &str,
        field: &str,
    ) -> Result<Variable, VariableError> {
        self.variables
            .read()
            .await
            .iter()
            .find(|v| v.matches(source_type, entity_id, field))
            .cloned()
            .ok_or_else(|| VariableError::NotFound {
                key: VariableKey::new(source_type, entity_id, field),
            })
    }

    async fn upsert_variable(&self, variable: Variable) -> Result<Variable, VariableError> {
        variable.key().validate()?;
        let mut variables = self.variables.write().await;
        match variables
            .iter_mut()
            .find(|v| v.matches(variable.source_type, &variable.id, &variable.field))
        {
            Some(existing) => *existing = variable.clone(),
            None => variables.push(variable.clone()),
        }
        Ok(variable)
    }

    async fn delete_variables(&self, entity_id: &str, field: Option<&str>) -> Result<usize, VariableError> {
        let mut variables = self.variables.write().await;
        let before = variables.len();
        variables.retain(|v| !(v.id == entity_id && field.is_none_or(|f| v.field == f)));
        let removed = before - variables.len();
        tracing::debug!(entity_id, ?field, removed, "deleted variables");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> InMemoryVariableRepository {
        InMemoryVariableRepository::with_variables([
            Variable::new(SourceType::Npc, "n1", "mood", "Alice").with_value("calm"),
            Variable::new(SourceType::Npc, "n1", "age", "Alice").with_value("30"),
            Variable::new(SourceType::Custom, "c1", "title", "Story"),
        ])
    }

    #[tokio::test]
    async fn upsert_replaces_by_identity() {
        let repo = repo();
        let stored = repo
            .upsert_variable(Variable::new(SourceType::Npc, "n1", "mood", "Alice").with_value("angry"))
            .await
            .unwrap();
        assert_eq!(stored.value.as_deref(), Some("angry"));
        let mood = repo.get_variable(SourceType::Npc, "n1", "mood").await.unwrap();
        assert_eq!(mood.value.as_deref(), Some("angry"));
        assert_eq!(repo.get_variables().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn upsert_rejects_identities_tokens_cannot_carry() {
        let repo = repo();
        let err = repo
            .upsert_variable(Variable::new(SourceType::Custom, "my_id", "name", "Odd"))
            .await
            .unwrap_err();
        assert!(matches!(err, VariableError::InvalidIdentity { .. }));
        assert_eq!(repo.get_variables().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_variable_is_not_found() {
        let err = repo()
            .get_variable(SourceType::Task, "t9", "output")
            .await
            .unwrap_err();
        assert!(matches!(err, VariableError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_by_entity_or_field() {
        let repo = repo();
        assert_eq!(repo.delete_variables("n1", Some("age")).await.unwrap(), 1);
        assert_eq!(repo.delete_variables("n1", None).await.unwrap(), 1);
        assert_eq!(repo.delete_variables("n1", None).await.unwrap(), 0);
        assert_eq!(repo.snapshot().await.unwrap().len(), 1);
    }
}
