//! Variables and inline variable tokens for cardflow.
//!
//! This crate provides:
//! - The variable model and identity triple
//! - The token grammar (interchange, display and legacy forms)
//! - Recursive resolution against a snapshot or a run-scoped store
//! - Conversion between stored text, editor documents and output text
//! - Drift detection and throttled repair for editor documents
//! - A persistence trait with an in-memory implementation

pub mod content;
pub mod error;
pub mod grammar;
pub mod repair;
pub mod repository;
pub mod resolver;
pub mod snapshot;
pub mod store;
pub mod variable;

pub use content::{ContentConverter, Document, Inline, OutputMode, Paragraph, ReferenceLeaf};
pub use error::VariableError;
pub use grammar::{TokenMatch, TokenRef};
pub use repair::{ContentRepairer, Drift, RepairAction, RepairConfig, RepairOutcome};
pub use repository::{InMemoryVariableRepository, VariableRepository};
pub use resolver::{DEFAULT_MAX_DEPTH, Resolution, ResolutionMiss, Resolver};
pub use snapshot::{VariableLookup, VariableSnapshot};
pub use store::{START_INPUT_KEY, VariableStore};
pub use variable::{SourceType, Variable, VariableKey};
