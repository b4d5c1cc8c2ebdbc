use std::path::PathBuf;

use thiserror::Error;

use crate::devices::SignalKind;

/// Errors raised while building or querying the device catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Device template not found: {0}")]
    NotFound(String),

    #[error("Duplicate device template id: {0}")]
    DuplicateTemplate(String),

    #[error("Duplicate port id '{port}' on template '{template}'")]
    DuplicatePort { template: String, port: String },

    #[error("Catalog file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Catalog parsing error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the device instance registry.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Instance id already used in this session: {0}")]
    DuplicateId(String),

    #[error("Device instance not found: {0}")]
    NotFound(String),

    #[error("Invalid instance id: {0:?}")]
    InvalidId(String),
}

/// Errors returned by the connection graph.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Endpoint not found: {instance}.{port}")]
    NotFound { instance: String, port: String },

    #[error("Cannot connect {instance}.{port} to itself")]
    SelfLoop { instance: String, port: String },

    #[error("Incompatible ports: {a} ({a_kind}) and {b} ({b_kind})")]
    IncompatiblePorts {
        a: String,
        a_kind: SignalKind,
        b: String,
        b_kind: SignalKind,
    },

    #[error("Connection already exists between {a} and {b}")]
    DuplicateConnection { a: String, b: String },

    #[error("Input port {instance}.{port} is already connected")]
    PortOccupied { instance: String, port: String },

    #[error("Connection not found: {0}")]
    ConnectionNotFound(u64),
}
