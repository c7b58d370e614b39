//! Closure nodes: deferred kernel/procedure invocations and their outputs.

use std::collections::BTreeMap;

use crate::backend::spec::{
    BackendResult, BufferId, ClosureHandle, FieldId, InvokeId, KernelId, ScriptBackend,
};
use crate::unbound::UnboundValue;
use crate::value::Value;

/// Index of a closure inside its owning builder/group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureId(pub(crate) usize);

/// Handle to a closure output: the default return value when `field` is
/// absent, or one of the closure's global outputs otherwise.
///
/// Futures are plain (producer, field) pairs; asking for the same global of
/// the same closure twice yields an equal handle, so callers may compare and
/// cache them freely. The value a future refers to lives in the owning
/// [`ScriptGroup`](crate::group::ScriptGroup) and only becomes observable
/// once the group has executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Future {
    pub(crate) closure: ClosureId,
    pub(crate) field: Option<FieldId>,
}

impl Future {
    /// The closure producing this value.
    pub fn closure(&self) -> ClosureId {
        self.closure
    }

    /// The global field this future reads, or `None` for the default return.
    pub fn field(&self) -> Option<FieldId> {
        self.field
    }
}

/// What a closure slot holds at build time, and what `execute` accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
    /// An already-resolved concrete value.
    Value(Value),
    /// A free input filled in at each execution.
    Unbound(UnboundValue),
    /// The output of another closure in the same graph.
    Future(Future),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Value(Value::Bool(v))
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Value(Value::I32(v))
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Value(Value::I64(v))
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Value(Value::F32(v))
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Value(Value::F64(v))
    }
}

impl From<UnboundValue> for Arg {
    fn from(u: UnboundValue) -> Self {
        Arg::Unbound(u)
    }
}

impl From<Future> for Arg {
    fn from(f: Future) -> Self {
        Arg::Future(f)
    }
}

/// Flavour of a closure: a kernel launch with a declared return buffer, or a
/// procedure invocation whose arguments were packed ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClosureKind {
    Kernel {
        kernel: KernelId,
        return_buffer: BufferId,
    },
    Invoke {
        invoke: InvokeId,
    },
}

/// One closure node. Shape (slot count, binding keys) is fixed at
/// construction; slot contents change only when an unbound value is bound or
/// re-bound for a new execution.
#[derive(Debug)]
pub(crate) struct ClosureRecord {
    pub(crate) handle: ClosureHandle,
    pub(crate) kind: ClosureKind,
    pub(crate) args: Vec<Arg>,
    pub(crate) globals: BTreeMap<FieldId, Arg>,
}

impl ClosureRecord {
    /// The buffer this closure's default return lands in, if it has one.
    pub(crate) fn return_buffer(&self) -> Option<BufferId> {
        match self.kind {
            ClosureKind::Kernel { return_buffer, .. } => Some(return_buffer),
            ClosureKind::Invoke { .. } => None,
        }
    }

    /// The value a consumer can wire in at construction time for `field`:
    /// the return buffer handle for the default return, or the field's
    /// current binding when it is already concrete.
    pub(crate) fn construction_value(&self, field: Option<FieldId>) -> Option<Value> {
        match field {
            None => self.return_buffer().map(Value::Buffer),
            Some(field) => match self.globals.get(&field) {
                Some(Arg::Value(v)) => Some(*v),
                _ => None,
            },
        }
    }

    /// Overwrites positional slot `index` and pushes the new value to the
    /// backend resource.
    pub(crate) fn set_arg<B: ScriptBackend>(
        &mut self,
        backend: &B,
        index: usize,
        value: Value,
    ) -> BackendResult<()> {
        self.args[index] = Arg::Value(value);
        backend.set_closure_arg(self.handle, index, value.to_wire())
    }

    /// Overwrites the binding for `field` and pushes it to the backend.
    pub(crate) fn set_global<B: ScriptBackend>(
        &mut self,
        backend: &B,
        field: FieldId,
        value: Value,
    ) -> BackendResult<()> {
        self.globals.insert(field, Arg::Value(value));
        backend.set_closure_global(self.handle, field, value.to_wire())
    }
}
