//! # kretslab-script
//!
//! Sandboxed interpreter for device control scripts written in a small
//! JavaScript/Arduino dialect.
//!
//! ### Key Submodules:
//! - `lexer`: `logos` tokenizer with 1-indexed spans
//! - `parser`: recursive-descent parser producing the `ast`
//! - `compile`: static validation, never executes user code
//! - `interpreter`: bounded execution against a [`Host`]
//!
//! Scripts have no ambient authority. Everything outside pure computation is
//! a [`Host`] call, and the embedder decides what those calls do.

pub mod ast;
pub mod builtins;
pub mod compile;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

pub use compile::{compile, CompileResult};
pub use error::{Diagnostic, HostError, RuntimeError};
pub use interpreter::{CallTarget, ExecLimits, Host, Interpreter, MAX_CALL_DEPTH};
pub use value::Value;
