//! Core domain types shared by the cardflow crates.
//!
//! Provides the strongly-typed identifiers for workflows and runs and the
//! rootcause-based `Result` alias every crate builds its errors on.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ParseIdError, WorkflowId, WorkflowRunId};
