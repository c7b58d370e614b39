//! Backend abstraction consumed by the graph core.
//!
//! The core never executes kernels itself; it describes closures and graphs
//! through the wire types in [`spec`] and hands them to a [`spec::ScriptBackend`]
//! implementation for resource creation and execution.

pub mod spec;

pub use spec::{BackendError, BackendResult, ScriptBackend};
