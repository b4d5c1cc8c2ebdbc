//! # kretslab-core
//!
//! Foundation layer of the Kretslab device simulator: the device catalog,
//! live instances, the connection graph between their ports, the console
//! sink and the virtual clock.
//!
//! ### Key Submodules:
//! - `devices`: templates, catalog and the instance registry
//! - `graph`: validated port-to-port topology
//! - `console`: bounded, sequenced output record
//! - `time`: `VirtualClock` in milliseconds
//! - `value`: untyped property values shared by catalog and state maps

pub mod console;
pub mod devices;
pub mod error;
pub mod graph;
pub mod time;
pub mod value;

pub mod prelude {
    pub use crate::console::{ConsoleEntry, ConsoleKind, ConsoleSink};
    pub use crate::devices::*;
    pub use crate::error::*;
    pub use crate::graph::{Connection, ConnectionGraph, ConnectionId, Endpoint, FanInPolicy};
    pub use crate::time::VirtualClock;
    pub use crate::value::PropertyValue;
}

pub use error::{CatalogError, GraphError, RegistryError};
