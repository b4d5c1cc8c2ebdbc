use std::fmt;

use thiserror::Error;

/// A compile-time finding with a 1-indexed source position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

/// Failure reported by the embedding host for a call it was asked to serve.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum HostError {
    #[error("{0} is not a function")]
    UnknownFunction(String),

    #[error("{function}: {message}")]
    InvalidArgument { function: String, message: String },
}

/// An uncaught fault raised while executing script code.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub line: usize,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}
