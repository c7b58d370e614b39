//! Error taxonomy for graph construction and execution.
//!
//! Construction failures abort the offending builder call and never produce
//! a graph; execution failures abort a single `execute` call and leave the
//! group reusable. Supplying more inputs than declared is deliberately *not*
//! an error: it is surfaced as a log notice and the excess is ignored.

use thiserror::Error;

use crate::backend::spec::BackendError;

/// Fatal failure while building closures or freezing a graph.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Graph names must match `^[A-Za-z0-9-]{1,100}$`.
    #[error("invalid graph name `{0}`: expected 1-100 characters from [A-Za-z0-9-]")]
    InvalidName(String),

    /// A positional argument appeared after the first global binding in a
    /// flattened call sequence.
    #[error("positional argument at position {index} follows a global binding")]
    MisplacedArgument { index: usize },

    /// Invoke arguments are packed ahead of time and must be concrete.
    #[error("invoke argument {index} is a {kind}, expected a concrete value")]
    NonConcreteInvokeArg { index: usize, kind: SlotKind },

    /// A future referenced a closure this builder never created.
    #[error("future references unknown closure {0}")]
    UnknownClosure(usize),

    /// An unbound value belongs to a different builder.
    #[error("unbound value {0} was not created by this builder")]
    UnknownInput(usize),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Fatal failure of a single `execute` call; the graph itself stays valid.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// Fewer inputs were supplied than the graph declares. Nothing is bound
    /// and nothing runs.
    #[error("graph expects {expected} inputs, received {actual}")]
    NotEnoughInputs { expected: usize, actual: usize },

    /// Only already-resolved values may flow in from outside the graph.
    #[error("input {index} is a {kind}, expected a concrete value")]
    NonConcreteInput { index: usize, kind: SlotKind },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What actually occupied a slot that required a concrete value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Unbound,
    Future,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::Unbound => f.write_str("unbound value"),
            SlotKind::Future => f.write_str("future"),
        }
    }
}
