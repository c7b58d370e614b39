//! Staged construction of closures, free inputs, and the finished graph.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::backend::spec::{
    BufferSpec, FieldId, GraphDesc, InvokeClosureDesc, InvokeId, KernelClosureDesc, KernelId,
    ScriptBackend,
};
use crate::closure::{Arg, ClosureId, ClosureKind, ClosureRecord, Future};
use crate::error::{BuildError, SlotKind};
use crate::group::ScriptGroup;
use crate::unbound::{InputRecord, Target, UnboundValue};
use crate::value::{pack_args, Value};

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9-]{1,100}$").expect("invalid graph name pattern"));

/// Named global binding used in the flattened call form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub field: FieldId,
    pub value: Arg,
}

impl Binding {
    pub fn new(field: FieldId, value: impl Into<Arg>) -> Self {
        Binding {
            field,
            value: value.into(),
        }
    }
}

/// One element of a flattened call sequence: positional arguments first,
/// then global bindings. The first [`Binding`] switches interpretation for
/// good — a later positional argument is a shape error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallItem {
    Arg(Arg),
    Binding(Binding),
}

impl From<Arg> for CallItem {
    fn from(arg: Arg) -> Self {
        CallItem::Arg(arg)
    }
}

impl From<Value> for CallItem {
    fn from(value: Value) -> Self {
        CallItem::Arg(Arg::Value(value))
    }
}

impl From<UnboundValue> for CallItem {
    fn from(unbound: UnboundValue) -> Self {
        CallItem::Arg(Arg::Unbound(unbound))
    }
}

impl From<Future> for CallItem {
    fn from(future: Future) -> Self {
        CallItem::Arg(Arg::Future(future))
    }
}

impl From<Binding> for CallItem {
    fn from(binding: Binding) -> Self {
        CallItem::Binding(binding)
    }
}

/// Wire row for one descriptor slot.
struct SlotWire {
    field_id: u64,
    value: u64,
    size: i32,
    dep_closure: u64,
    dep_field: u64,
}

/// Accumulates closures and declared inputs, then freezes them into a
/// [`ScriptGroup`] with `create`.
///
/// Backend resources are requested only after a closure's full descriptor is
/// assembled, and placeholder fan-out targets are recorded only after the
/// backend accepts the closure, so a failed call leaves no half-registered
/// state behind.
pub struct GraphBuilder<B: ScriptBackend> {
    backend: Arc<B>,
    closures: Vec<ClosureRecord>,
    inputs: Vec<InputRecord>,
    cache_dir: Option<PathBuf>,
}

impl<B: ScriptBackend> GraphBuilder<B> {
    pub fn new(backend: Arc<B>) -> Self {
        GraphBuilder {
            backend,
            closures: Vec::new(),
            inputs: Vec::new(),
            cache_dir: None,
        }
    }

    /// Sets the directory the backend may use for compiled-kernel caching.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Declares a free input of the graph under construction. The returned
    /// handle can occupy any number of argument and global slots; the caller
    /// supplies its value at each execution.
    pub fn add_input(&mut self) -> UnboundValue {
        let unbound = UnboundValue(self.inputs.len());
        self.inputs.push(InputRecord::new());
        unbound
    }

    /// Adds a kernel closure with explicit positional arguments and global
    /// bindings. The return buffer is allocated from `return_type` before the
    /// closure resource is requested.
    pub fn add_kernel(
        &mut self,
        kernel: KernelId,
        return_type: BufferSpec,
        args: &[Arg],
        globals: &[(FieldId, Arg)],
    ) -> Result<ClosureId, BuildError> {
        let owner = ClosureId(self.closures.len());
        let bindings: BTreeMap<FieldId, Arg> = globals.iter().copied().collect();

        let capacity = args.len() + bindings.len();
        let mut field_ids = Vec::with_capacity(capacity);
        let mut values = Vec::with_capacity(capacity);
        let mut sizes = Vec::with_capacity(capacity);
        let mut dep_closures = Vec::with_capacity(capacity);
        let mut dep_fields = Vec::with_capacity(capacity);
        let mut pending = Vec::new();

        for (index, arg) in args.iter().enumerate() {
            let slot = self.resolve_slot(owner, arg, None, index, &mut pending)?;
            field_ids.push(slot.field_id);
            values.push(slot.value);
            sizes.push(slot.size);
            dep_closures.push(slot.dep_closure);
            dep_fields.push(slot.dep_field);
        }
        for (field, arg) in &bindings {
            let slot = self.resolve_slot(owner, arg, Some(*field), 0, &mut pending)?;
            field_ids.push(slot.field_id);
            values.push(slot.value);
            sizes.push(slot.size);
            dep_closures.push(slot.dep_closure);
            dep_fields.push(slot.dep_field);
        }

        let return_buffer = self.backend.create_buffer(&return_type)?;
        let desc = KernelClosureDesc {
            kernel,
            return_buffer,
            field_ids,
            values,
            sizes,
            dep_closures,
            dep_fields,
        };
        let handle = self.backend.create_closure(&desc)?;

        self.closures.push(ClosureRecord {
            handle,
            kind: ClosureKind::Kernel {
                kernel,
                return_buffer,
            },
            args: args.to_vec(),
            globals: bindings,
        });
        self.register_pending(pending);
        Ok(owner)
    }

    /// Adds an invoke closure. Positional arguments are serialised into a
    /// flat byte buffer up front, so they must all be concrete values;
    /// globals may still reference unbound values or futures.
    pub fn add_invoke(
        &mut self,
        invoke: InvokeId,
        args: &[Arg],
        globals: &[(FieldId, Arg)],
    ) -> Result<ClosureId, BuildError> {
        let owner = ClosureId(self.closures.len());
        let mut concrete = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            match arg {
                Arg::Value(value) => concrete.push(*value),
                Arg::Unbound(_) => {
                    return Err(BuildError::NonConcreteInvokeArg {
                        index,
                        kind: SlotKind::Unbound,
                    })
                }
                Arg::Future(_) => {
                    return Err(BuildError::NonConcreteInvokeArg {
                        index,
                        kind: SlotKind::Future,
                    })
                }
            }
        }
        let packed_args = pack_args(&concrete);
        let bindings: BTreeMap<FieldId, Arg> = globals.iter().copied().collect();

        let mut field_ids = Vec::with_capacity(bindings.len());
        let mut values = Vec::with_capacity(bindings.len());
        let mut sizes = Vec::with_capacity(bindings.len());
        let mut pending = Vec::new();

        // Dependency pairs are resolved for validation but not carried on the
        // wire: the invoke descriptor has no dependency arrays.
        for (field, arg) in &bindings {
            let slot = self.resolve_slot(owner, arg, Some(*field), 0, &mut pending)?;
            field_ids.push(slot.field_id);
            values.push(slot.value);
            sizes.push(slot.size);
        }

        let desc = InvokeClosureDesc {
            invoke,
            packed_args,
            field_ids,
            values,
            sizes,
        };
        let handle = self.backend.create_invoke_closure(&desc)?;

        self.closures.push(ClosureRecord {
            handle,
            kind: ClosureKind::Invoke { invoke },
            args: args.to_vec(),
            globals: bindings,
        });
        self.register_pending(pending);
        Ok(owner)
    }

    /// Flattened form of [`add_kernel`](Self::add_kernel): positional
    /// arguments followed by [`Binding`]s in a single sequence.
    pub fn add_kernel_call(
        &mut self,
        kernel: KernelId,
        return_type: BufferSpec,
        items: &[CallItem],
    ) -> Result<ClosureId, BuildError> {
        let (args, globals) = split_call(items)?;
        self.add_kernel(kernel, return_type, &args, &globals)
    }

    /// Flattened form of [`add_invoke`](Self::add_invoke).
    pub fn add_invoke_call(
        &mut self,
        invoke: InvokeId,
        items: &[CallItem],
    ) -> Result<ClosureId, BuildError> {
        let (args, globals) = split_call(items)?;
        self.add_invoke(invoke, &args, &globals)
    }

    /// Future for a closure's default return value.
    pub fn return_future(&self, closure: ClosureId) -> Future {
        Future {
            closure,
            field: None,
        }
    }

    /// Future for one of a closure's global outputs. Futures are value
    /// handles keyed by (closure, field), so repeated calls with the same
    /// field yield an equal future.
    pub fn global_future(&self, closure: ClosureId, field: FieldId) -> Future {
        Future {
            closure,
            field: Some(field),
        }
    }

    /// Validates the graph name, requests the backend graph resource, and
    /// freezes the builder into an executable [`ScriptGroup`].
    pub fn create(self, name: &str, outputs: &[Future]) -> Result<ScriptGroup<B>, BuildError> {
        if !NAME_PATTERN.is_match(name) {
            return Err(BuildError::InvalidName(name.to_string()));
        }
        for future in outputs {
            if future.closure().0 >= self.closures.len() {
                return Err(BuildError::UnknownClosure(future.closure().0));
            }
        }

        let desc = GraphDesc {
            name: name.to_string(),
            cache_dir: self.cache_dir.clone(),
            closures: self.closures.iter().map(|c| c.handle).collect(),
        };
        let handle = self.backend.create_graph(&desc)?;
        debug!(
            graph = name,
            closures = self.closures.len(),
            inputs = self.inputs.len(),
            outputs = outputs.len(),
            "graph created"
        );
        Ok(ScriptGroup::new(
            self.backend,
            handle,
            name.to_string(),
            self.closures,
            self.inputs,
            outputs.to_vec(),
        ))
    }

    fn resolve_slot(
        &self,
        owner: ClosureId,
        arg: &Arg,
        field: Option<FieldId>,
        index: usize,
        pending: &mut Vec<(usize, Target)>,
    ) -> Result<SlotWire, BuildError> {
        let mut slot = SlotWire {
            field_id: field.map(FieldId::to_raw).unwrap_or(0),
            value: 0,
            size: 0,
            dep_closure: 0,
            dep_field: 0,
        };
        match arg {
            Arg::Unbound(unbound) => {
                if unbound.0 >= self.inputs.len() {
                    return Err(BuildError::UnknownInput(unbound.0));
                }
                let target = match field {
                    None => Target::Arg(owner, index),
                    Some(field) => Target::Global(owner, field),
                };
                pending.push((unbound.0, target));
            }
            Arg::Future(future) => {
                let producer = self
                    .closures
                    .get(future.closure().0)
                    .ok_or(BuildError::UnknownClosure(future.closure().0))?;
                slot.dep_closure = producer.handle.to_raw();
                slot.dep_field = future.field().map(FieldId::to_raw).unwrap_or(0);
                // A future that already has a construction-time value (the
                // producer's return buffer, or a concrete binding) resolves
                // its wire pair immediately; otherwise the slot stays
                // unresolved and the dependency edge supplies it.
                if let Some(value) = producer.construction_value(future.field()) {
                    let wire = value.to_wire();
                    slot.value = wire.value;
                    slot.size = wire.size;
                }
            }
            Arg::Value(value) => {
                let wire = value.to_wire();
                slot.value = wire.value;
                slot.size = wire.size;
            }
        }
        Ok(slot)
    }

    fn register_pending(&mut self, pending: Vec<(usize, Target)>) {
        for (input, target) in pending {
            self.inputs[input].add_target(target);
        }
    }
}

/// Splits a flattened call sequence into positional arguments and global
/// bindings, rejecting any positional argument after the first binding.
fn split_call(items: &[CallItem]) -> Result<(Vec<Arg>, Vec<(FieldId, Arg)>), BuildError> {
    let mut args = Vec::new();
    let mut bindings = Vec::new();
    let mut seen_binding = false;
    for (index, item) in items.iter().enumerate() {
        match item {
            CallItem::Arg(arg) => {
                if seen_binding {
                    return Err(BuildError::MisplacedArgument { index });
                }
                args.push(*arg);
            }
            CallItem::Binding(binding) => {
                seen_binding = true;
                bindings.push((binding.field, binding.value));
            }
        }
    }
    Ok((args, bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::spec::FieldId;

    #[test]
    fn split_call_separates_args_from_bindings() {
        let field = FieldId(3);
        let items = [
            CallItem::from(Value::I32(1)),
            CallItem::from(Value::F32(2.0)),
            CallItem::from(Binding::new(field, Value::I32(9))),
        ];
        let (args, bindings) = split_call(&items).unwrap();
        assert_eq!(args, vec![Arg::Value(Value::I32(1)), Arg::Value(Value::F32(2.0))]);
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].0, field);
    }

    #[test]
    fn split_call_rejects_arg_after_binding() {
        let items = [
            CallItem::from(Binding::new(FieldId(1), Value::I32(9))),
            CallItem::from(Value::I32(1)),
        ];
        let err = split_call(&items).unwrap_err();
        assert!(matches!(err, BuildError::MisplacedArgument { index: 1 }));
    }

    #[test]
    fn split_call_accepts_all_positional() {
        let items = [CallItem::from(Value::Bool(true))];
        let (args, bindings) = split_call(&items).unwrap();
        assert_eq!(args.len(), 1);
        assert!(bindings.is_empty());
    }

    #[test]
    fn name_pattern_bounds() {
        assert!(NAME_PATTERN.is_match("graph-01"));
        assert!(NAME_PATTERN.is_match(&"a".repeat(100)));
        assert!(!NAME_PATTERN.is_match(""));
        assert!(!NAME_PATTERN.is_match(&"a".repeat(101)));
        assert!(!NAME_PATTERN.is_match("bad name"));
        assert!(!NAME_PATTERN.is_match("under_score"));
    }
}
