//! Error types for the watcher and campaign services.

use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Watcher already started")]
    AlreadyStarted,

    #[error("Invalid repro file: {0}")]
    InvalidRepro(String),

    #[error("Core error: {0}")]
    Core(#[from] sapperai_core::Error),

    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
