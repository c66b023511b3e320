//! Drift detection and repair for editor documents.
//!
//! The editor tracks the references it inserted in a separate list. When the
//! document tree and that list disagree, or a reference leaf lost its
//! attributes, the tree is repaired: patched in place when the counts still
//! line up, otherwise rebuilt as plain text. Repairs are throttled so a
//! misbehaving editor cannot loop.

use crate::content::{Document, Inline, Paragraph, ReferenceLeaf};
use crate::snapshot::VariableSnapshot;
use crate::variable::VariableKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

fn default_max_attempts() -> u32 {
    3
}

fn default_cooldown_ms() -> u64 {
    5000
}

/// Repair throttling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Repairs allowed per cooldown window.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Cooldown window length in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

/// A disagreement between the document and the tracked reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    CountMismatch { leaves: usize, tracked: usize },
    IncompleteLeaf { index: usize },
    StaleLeaf { index: usize },
}

/// What a repair did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairAction {
    /// Leaf attributes were rewritten from the tracked list.
    Patched,
    /// The tree was rebuilt as plain text.
    RebuiltAsText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// No drift.
    Clean,
    Repaired {
        document: Document,
        drift: Drift,
        action: RepairAction,
    },
    /// Drift found but the attempt budget is spent; the tree is left as is.
    Throttled { drift: Drift, retry_after: Duration },
}

/// Compares a document against the tracked reference list.
#[must_use]
pub fn detect_drift(document: &Document, tracked: &[VariableKey]) -> Option<Drift> {
    let leaves: Vec<&ReferenceLeaf> = document.references().collect();
    if leaves.len() != tracked.len() {
        return Some(Drift::CountMismatch {
            leaves: leaves.len(),
            tracked: tracked.len(),
        });
    }
    for (index, (leaf, expected)) in leaves.iter().zip(tracked).enumerate() {
        match leaf.key() {
            None => return Some(Drift::IncompleteLeaf { index }),
            Some(key) if &key != expected => return Some(Drift::StaleLeaf { index }),
            Some(_) => {}
        }
    }
    None
}

/// Repairs a document without throttling.
#[must_use]
pub fn repair(document: &Document, tracked: &[VariableKey], snapshot: &VariableSnapshot) -> (Document, RepairAction) {
    if document.references().count() != tracked.len() {
        return (rebuild_as_text(document), RepairAction::RebuiltAsText);
    }

    let mut patched = document.clone();
    for (leaf, key) in patched.references_mut().zip(tracked) {
        let label = match snapshot.get(key) {
            Some(variable) => {
                *leaf = ReferenceLeaf::from_variable(variable);
                continue;
            }
            None if leaf.label.is_empty() => key.token(),
            None => std::mem::take(&mut leaf.label),
        };
        *leaf = ReferenceLeaf {
            source_type: Some(key.source_type),
            entity_id: key.entity_id.clone(),
            field: key.field.clone(),
            label,
            value: leaf.value.take(),
        };
    }
    (patched, RepairAction::Patched)
}

fn rebuild_as_text(document: &Document) -> Document {
    Document {
        paragraphs: document
            .visible_text()
            .split('\n')
            .map(|line| Paragraph {
                children: if line.is_empty() {
                    Vec::new()
                } else {
                    vec![Inline::Text { text: line.to_string() }]
                },
            })
            .collect(),
    }
}

#[derive(Debug, Clone)]
struct AttemptWindow {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Detects drift and repairs it within an attempt budget.
#[derive(Debug, Clone)]
pub struct ContentRepairer {
    config: RepairConfig,
    window: Option<AttemptWindow>,
}

impl ContentRepairer {
    #[must_use]
    pub fn new(config: RepairConfig) -> Self {
        Self { config, window: None }
    }

    #[must_use]
    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    pub fn check(&mut self, document: &Document, tracked: &[VariableKey], snapshot: &VariableSnapshot) -> RepairOutcome {
        self.check_at(Utc::now(), document, tracked, snapshot)
    }

    /// Like [`Self::check`] with an explicit clock.
    pub fn check_at(
        &mut self,
        now: DateTime<Utc>,
        document: &Document,
        tracked: &[VariableKey],
        snapshot: &VariableSnapshot,
    ) -> RepairOutcome {
        let Some(drift) = detect_drift(document, tracked) else {
            return RepairOutcome::Clean;
        };

        let cooldown = Duration::milliseconds(i64::try_from(self.config.cooldown_ms).unwrap_or(i64::MAX));
        let window = self.window.get_or_insert(AttemptWindow {
            count: 0,
            window_start: now,
        });
        if now - window.window_start >= cooldown {
            window.count = 0;
            window.window_start = now;
        }

        if window.count >= self.config.max_attempts {
            let retry_after = cooldown - (now - window.window_start);
            tracing::warn!(?drift, attempts = window.count, "content repair throttled");
            return RepairOutcome::Throttled { drift, retry_after };
        }
        window.count += 1;

        let (document, action) = repair(document, tracked, snapshot);
        tracing::info!(?drift, ?action, attempt = window.count, "content repaired");
        RepairOutcome::Repaired {
            document,
            drift,
            action,
        }
    }

    /// Forgets previous attempts.
    pub fn reset(&mut self) {
        self.window = None;
    }
}

impl Default for ContentRepairer {
    fn default() -> Self {
        Self::new(RepairConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentConverter;
    use crate::variable::{SourceType, Variable};

    fn snapshot() -> VariableSnapshot {
        VariableSnapshot::new([Variable::new(SourceType::Custom, "abcd", "name", "Hero").with_value("World")])
    }

    fn hero_key() -> VariableKey {
        VariableKey::new(SourceType::Custom, "abcd", "name")
    }

    fn document() -> Document {
        ContentConverter::default().to_presentation("Hi @gv_custom_abcd_name-=!", &snapshot())
    }

    #[test]
    fn matching_document_is_clean() {
        let mut repairer = ContentRepairer::default();
        assert_eq!(repairer.check(&document(), &[hero_key()], &snapshot()), RepairOutcome::Clean);
    }

    #[test]
    fn incomplete_leaf_is_patched_from_tracked_list() {
        let mut doc = document();
        if let Some(leaf) = doc.references_mut().next() {
            leaf.entity_id.clear();
        }
        assert_eq!(detect_drift(&doc, &[hero_key()]), Some(Drift::IncompleteLeaf { index: 0 }));

        let (fixed, action) = repair(&doc, &[hero_key()], &snapshot());
        assert_eq!(action, RepairAction::Patched);
        assert_eq!(fixed, document());
    }

    #[test]
    fn count_mismatch_rebuilds_as_text() {
        let doc = document();
        let (fixed, action) = repair(&doc, &[], &snapshot());
        assert_eq!(action, RepairAction::RebuiltAsText);
        assert_eq!(fixed.references().count(), 0);
        assert_eq!(fixed.visible_text(), "Hi @Hero.name#abcd!");
    }

    #[test]
    fn repairs_are_throttled_within_cooldown() {
        let mut repairer = ContentRepairer::new(RepairConfig {
            max_attempts: 2,
            cooldown_ms: 1000,
        });
        let doc = document();
        let start = Utc::now();

        for _ in 0..2 {
            assert!(matches!(
                repairer.check_at(start, &doc, &[], &snapshot()),
                RepairOutcome::Repaired { .. }
            ));
        }
        let throttled = repairer.check_at(start + Duration::milliseconds(400), &doc, &[], &snapshot());
        match throttled {
            RepairOutcome::Throttled { retry_after, .. } => {
                assert_eq!(retry_after, Duration::milliseconds(600));
            }
            other => panic!("expected throttling, got {other:?}"),
        }

        assert!(matches!(
            repairer.check_at(start + Duration::milliseconds(1000), &doc, &[], &snapshot()),
            RepairOutcome::Repaired { .. }
        ));
    }

    #[test]
    fn config_defaults_apply_to_missing_fields() {
        let config: RepairConfig = serde_json::from_str(r#"{"max_attempts": 1}"#).expect("parse");
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.cooldown_ms, 5000);
    }
}
