use std::path::PathBuf;

use thiserror::Error;
use tokio::task::JoinError;

use kretslab_config::ConfigError;
use kretslab_core::CatalogError;
use kretslab_simulator::{BoardError, SessionError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Board error: {0}")]
    Board(#[from] BoardError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("No script given and layout '{0}' has no board with example code")]
    NoScript(String),

    #[error("Script failed to compile with {0} diagnostic(s)")]
    CompileFailed(usize),

    #[error("State digest mismatch: expected {expected}, got {actual} (report: {})", report.display())]
    DigestMismatch {
        expected: String,
        actual: String,
        report: PathBuf,
    },

    #[error("Report serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Simulation worker failed: {0}")]
    Worker(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Worker(err.to_string())
    }
}
