// src/config/mod.rs

//! Workflow configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a workflow file from disk (`loader.rs`).
//! - Resolve it into typed definitions and reject bad graphs (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{QueueDef, RawWorkflowConfig, RunaheadLimit, SchedulerSettings, WorkflowConfig};
