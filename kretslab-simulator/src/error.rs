use std::path::PathBuf;

use thiserror::Error;

use kretslab_core::{CatalogError, GraphError, RegistryError};

/// Errors returned synchronously by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A simulation run is active; stop it before changing the workbench")]
    RunActive,

    #[error("Board not found or not a controller: {0}")]
    UnknownBoard(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Errors raised while loading a board layout.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Board file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Board parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Board validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Board I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint: {0}")]
    Endpoint(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}
