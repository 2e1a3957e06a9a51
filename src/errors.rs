// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CyclerunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid cycling expression: {0}")]
    Cycling(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Circular dependency detected: {0}")]
    DependencyCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Incompatible database schema: found version {found}, expected {expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    #[error("Workflow aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CyclerunError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CyclerunError::ConfigError(msg.into())
    }

    pub(crate) fn cycling(msg: impl Into<String>) -> Self {
        CyclerunError::Cycling(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CyclerunError>;
