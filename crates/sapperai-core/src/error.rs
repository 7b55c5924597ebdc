//! Error types for sapperai-core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single policy validation error with a stable field path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFieldError {
    pub path: String,
    pub message: String,
}

impl PolicyFieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A collection of validation errors for a single policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValidationError {
    pub errors: Vec<PolicyFieldError>,
}

impl PolicyValidationError {
    pub fn new(errors: Vec<PolicyFieldError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for PolicyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "Policy validation failed (no details)");
        }

        writeln!(
            f,
            "Policy validation failed with {} error(s):",
            self.errors.len()
        )?;
        for err in &self.errors {
            writeln!(f, "- {}: {}", err.path, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyValidationError {}

/// Errors that can occur during detection and enforcement operations
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    PolicyValidation(#[from] PolicyValidationError),

    #[error("Policy file {path} is a symlink escaping its trust root {root}")]
    PolicySymlinkEscape { path: PathBuf, root: PathBuf },

    #[error("Quarantine record not found: {0}")]
    QuarantineRecordNotFound(String),

    #[error("Refusing to restore over existing path: {0}")]
    RestoreWouldOverwrite(PathBuf),

    #[error("Refusing to restore over a directory: {0}")]
    RestoreTargetIsDirectory(PathBuf),

    #[error("Threat feed sync failed for {source_url}: {message}")]
    FeedSync { source_url: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),
}

/// Result type for sapperai-core operations
pub type Result<T> = std::result::Result<T, Error>;
