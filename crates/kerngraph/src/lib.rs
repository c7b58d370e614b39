//! Deferred-execution dataflow graphs of compute-kernel invocations.
//!
//! A [`GraphBuilder`] wires kernel and procedure closures together: each
//! argument or global slot holds a concrete [`Value`], a free input declared
//! with [`GraphBuilder::add_input`], or a [`Future`] referencing another
//! closure's output. [`GraphBuilder::create`] freezes the wiring into a
//! [`ScriptGroup`] that can be executed repeatedly with different inputs
//! without rebuilding.
//!
//! The core never runs kernels itself. It describes closures and graphs to a
//! [`ScriptBackend`](backend::spec::ScriptBackend), which owns buffer
//! allocation, dependency ordering, and execution.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use kerngraph::backend::spec::{BufferSpec, KernelId, ScalarKind, ScriptBackend};
//! # use kerngraph::{Arg, GraphBuilder, Value};
//! # fn demo<B: ScriptBackend>(backend: Arc<B>, double: KernelId) -> anyhow::Result<()> {
//! let mut builder = GraphBuilder::new(backend);
//! let x = builder.add_input();
//! let closure = builder.add_kernel(
//!     double,
//!     BufferSpec::new(ScalarKind::I32, 1),
//!     &[Arg::Unbound(x)],
//!     &[],
//! )?;
//! let out = builder.return_future(closure);
//! let mut group = builder.create("double", &[out])?;
//! let first = group.execute(&[Value::I32(5).into()])?;
//! let second = group.execute(&[Value::I32(7).into()])?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
mod builder;
mod closure;
mod error;
mod group;
mod unbound;
mod value;

pub use builder::{Binding, CallItem, GraphBuilder};
pub use closure::{Arg, ClosureId, Future};
pub use error::{BuildError, ExecuteError, SlotKind};
pub use group::ScriptGroup;
pub use unbound::UnboundValue;
pub use value::{pack_args, Value, ValueKind};
