// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkflowConfig, WorkflowConfig};
use crate::errors::Result;

/// Read a workflow file and decode it into a `RawWorkflowConfig`.
///
/// This only performs TOML deserialization; it does **not** resolve
/// recurrences or triggers. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkflowConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawWorkflowConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// blake3 fingerprint of a workflow file's text.
pub fn fingerprint(contents: &str) -> String {
    blake3::hash(contents.as_bytes()).to_hex().to_string()
}

/// Load, validate and fingerprint a workflow file.
///
/// Validation is complete before this returns, so a caller holding the
/// previous configuration can keep it untouched on error.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkflowConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let raw: RawWorkflowConfig = toml::from_str(&contents)?;
    let config = WorkflowConfig::try_from(raw)?;
    Ok(config.with_fingerprint(fingerprint(&contents)))
}

/// Default workflow file: `flow.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("flow.toml")
}

/// Default database path: `cyclerun.db` beside the workflow file.
pub fn default_db_path(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("cyclerun.db"),
        _ => PathBuf::from("cyclerun.db"),
    }
}
