//! Placeholder inputs declared at build time and bound at each execution.

use crate::backend::spec::{BackendResult, FieldId, ScriptBackend};
use crate::closure::{ClosureId, ClosureRecord};
use crate::value::Value;

/// Handle to a free input slot of a graph.
///
/// Created by [`GraphBuilder::add_input`](crate::builder::GraphBuilder::add_input)
/// and passed into closure construction wherever the value should flow. The
/// actual fan-out bookkeeping lives in the owning builder/group; the handle
/// itself is a cheap index, which keeps closures and placeholders free of
/// reference cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnboundValue(pub(crate) usize);

/// A slot of a closure that an unbound value must fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target {
    Arg(ClosureId, usize),
    Global(ClosureId, FieldId),
}

/// Backing record for one [`UnboundValue`]: every closure location the value
/// fans out to once bound.
#[derive(Debug, Default)]
pub(crate) struct InputRecord {
    targets: Vec<Target>,
}

impl InputRecord {
    pub(crate) fn new() -> Self {
        InputRecord::default()
    }

    pub(crate) fn add_target(&mut self, target: Target) {
        self.targets.push(target);
    }

    /// Fans `value` out to every recorded target, overwriting whatever the
    /// slot held before. Each target pushes to its backend resource
    /// independently; fan-out order across targets is unspecified, and a
    /// backend failure mid-way leaves earlier targets bound.
    pub(crate) fn bind<B: ScriptBackend>(
        &self,
        backend: &B,
        closures: &mut [ClosureRecord],
        value: Value,
    ) -> BackendResult<()> {
        for target in &self.targets {
            match *target {
                Target::Arg(closure, index) => {
                    closures[closure.0].set_arg(backend, index, value)?;
                }
                Target::Global(closure, field) => {
                    closures[closure.0].set_global(backend, field, value)?;
                }
            }
        }
        Ok(())
    }
}
