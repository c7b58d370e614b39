//! Interpreter state and the `ScriptBackend` implementation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use kerngraph::backend::spec::{
    BackendError, BackendResult, BufferId, BufferSpec, ClosureHandle, FieldId, GraphDesc,
    GraphHandle, InvokeClosureDesc, InvokeId, KernelClosureDesc, KernelId, ScalarKind,
    ScriptBackend, WireValue,
};
use kerngraph::Value;

/// Declared type of a kernel argument or script field, used to decode the
/// untyped wire pairs the core sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Bool,
    I32,
    I64,
    F32,
    F64,
    Buffer,
}

/// Per-element view a kernel function receives.
///
/// Kernels run once per element of their return buffer. Buffer-typed
/// arguments and globals are resolved to the element at the current index;
/// scalars are broadcast unchanged.
pub struct KernelCtx<'a> {
    index: usize,
    args: &'a [Value],
    globals: &'a BTreeMap<FieldId, Value>,
}

impl KernelCtx<'_> {
    /// Index of the return-buffer element being computed.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Positional argument `i`, element-resolved for buffers.
    pub fn arg(&self, i: usize) -> Value {
        self.args[i]
    }

    /// Global field binding, element-resolved for buffers.
    pub fn global(&self, field: FieldId) -> Option<Value> {
        self.globals.get(&field).copied()
    }
}

type KernelFn = dyn Fn(&KernelCtx<'_>) -> Value + Send + Sync;
type InvokeFn = dyn Fn(&[u8]) + Send + Sync;

struct KernelEntry {
    params: Vec<ParamKind>,
    f: Arc<KernelFn>,
}

#[derive(Clone, Copy)]
struct Slot {
    wire: WireValue,
    dep_closure: u64,
    dep_field: u64,
}

enum ClosureKind {
    Kernel {
        kernel: KernelId,
        return_buffer: BufferId,
    },
    Invoke {
        invoke: InvokeId,
        packed: Vec<u8>,
    },
}

struct ClosureState {
    kind: ClosureKind,
    slots: Vec<Slot>,
    globals: BTreeMap<FieldId, Slot>,
}

struct BufferData {
    elem: ScalarKind,
    data: Vec<Value>,
}

struct GraphState {
    name: String,
    closures: Vec<ClosureHandle>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    kernels: HashMap<KernelId, KernelEntry>,
    invokes: HashMap<InvokeId, Arc<InvokeFn>>,
    fields: HashMap<FieldId, ParamKind>,
    buffers: HashMap<BufferId, BufferData>,
    closures: HashMap<ClosureHandle, ClosureState>,
    graphs: HashMap<GraphHandle, GraphState>,
}

impl Inner {
    /// Mints a fresh nonzero id. `0` stays reserved as the wire sentinel.
    fn mint(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Single-process backend interpreting graph descriptors over registered
/// Rust kernels. All state sits behind one mutex; kernel functions must not
/// call back into the backend.
pub struct CpuScriptBackend {
    inner: Mutex<Inner>,
}

impl CpuScriptBackend {
    pub fn new() -> Self {
        CpuScriptBackend {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Registers a kernel with its positional parameter declaration. The
    /// function runs once per return-buffer element.
    pub fn register_kernel(
        &self,
        params: Vec<ParamKind>,
        f: impl Fn(&KernelCtx<'_>) -> Value + Send + Sync + 'static,
    ) -> KernelId {
        let mut inner = self.lock();
        let id = KernelId(inner.mint());
        inner.kernels.insert(
            id,
            KernelEntry {
                params,
                f: Arc::new(f),
            },
        );
        id
    }

    /// Registers a procedure invocation. The function receives the packed
    /// argument bytes recorded at closure construction.
    pub fn register_invoke(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> InvokeId {
        let mut inner = self.lock();
        let id = InvokeId(inner.mint());
        inner.invokes.insert(id, Arc::new(f));
        id
    }

    /// Registers a script global field of the given type.
    pub fn register_field(&self, kind: ParamKind) -> FieldId {
        let mut inner = self.lock();
        let id = FieldId(inner.mint());
        inner.fields.insert(id, kind);
        id
    }

    /// Reads back the contents of a buffer (test/debug surface).
    pub fn buffer_values(&self, buffer: BufferId) -> BackendResult<Vec<Value>> {
        let inner = self.lock();
        inner
            .buffers
            .get(&buffer)
            .map(|b| b.data.clone())
            .ok_or_else(|| BackendError::unknown("buffer", buffer.0))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cpu backend state poisoned")
    }

    fn run_closure(&self, handle: ClosureHandle) -> BackendResult<()> {
        let work = self.resolve_work(handle)?;
        match work {
            Work::Invoke { f, packed } => {
                (*f)(&packed);
                Ok(())
            }
            Work::Kernel {
                f,
                args,
                globals,
                return_buffer,
                elem,
                len,
            } => {
                let mut out = Vec::with_capacity(len);
                for index in 0..len {
                    let arg_values = args
                        .iter()
                        .map(|arg| arg.element(index))
                        .collect::<BackendResult<Vec<_>>>()?;
                    let global_values = globals
                        .iter()
                        .map(|(field, arg)| Ok((*field, arg.element(index)?)))
                        .collect::<BackendResult<BTreeMap<_, _>>>()?;
                    let ctx = KernelCtx {
                        index,
                        args: &arg_values,
                        globals: &global_values,
                    };
                    let value = (*f)(&ctx);
                    if !matches_elem(elem, &value) {
                        return Err(BackendError::execution(format!(
                            "kernel produced a {} value for a {elem} buffer",
                            value.kind()
                        )));
                    }
                    out.push(value);
                }

                let mut inner = self.lock();
                let buffer = inner
                    .buffers
                    .get_mut(&return_buffer)
                    .ok_or_else(|| BackendError::unknown("buffer", return_buffer.0))?;
                buffer.data = out;
                Ok(())
            }
        }
    }

    /// Resolves a closure into self-contained work under the lock: kernel
    /// function, decoded scalar values, and snapshots of buffer arguments.
    fn resolve_work(&self, handle: ClosureHandle) -> BackendResult<Work> {
        let inner = self.lock();
        let state = inner
            .closures
            .get(&handle)
            .ok_or_else(|| BackendError::unknown("closure", handle.0))?;

        match &state.kind {
            ClosureKind::Invoke { invoke, packed } => {
                let f = inner
                    .invokes
                    .get(invoke)
                    .cloned()
                    .ok_or_else(|| BackendError::unknown("invoke", invoke.0))?;
                Ok(Work::Invoke {
                    f,
                    packed: packed.clone(),
                })
            }
            ClosureKind::Kernel {
                kernel,
                return_buffer,
            } => {
                let entry = inner
                    .kernels
                    .get(kernel)
                    .ok_or_else(|| BackendError::unknown("kernel", kernel.0))?;

                let mut args = Vec::with_capacity(state.slots.len());
                for (index, slot) in state.slots.iter().enumerate() {
                    let kind = *entry.params.get(index).ok_or_else(|| {
                        BackendError::execution(format!(
                            "closure {} has {} arguments but kernel {} declares {}",
                            handle.0,
                            state.slots.len(),
                            kernel.0,
                            entry.params.len()
                        ))
                    })?;
                    args.push(resolve_slot(&inner, slot, kind).map_err(|err| {
                        annotate(err, format!("argument {index} of closure {}", handle.0))
                    })?);
                }

                let mut globals = BTreeMap::new();
                for (field, slot) in &state.globals {
                    let kind = *inner
                        .fields
                        .get(field)
                        .ok_or_else(|| BackendError::unknown("field", field.0))?;
                    globals.insert(
                        *field,
                        resolve_slot(&inner, slot, kind).map_err(|err| {
                            annotate(err, format!("field {} of closure {}", field.0, handle.0))
                        })?,
                    );
                }

                let out = inner
                    .buffers
                    .get(return_buffer)
                    .ok_or_else(|| BackendError::unknown("buffer", return_buffer.0))?;
                let len = out.data.len();

                for (index, arg) in args.iter().enumerate() {
                    if let Resolved::Buffer(data) = arg {
                        if data.len() != len {
                            return Err(BackendError::execution(format!(
                                "argument {index} buffer has {} elements, return buffer has {len}",
                                data.len()
                            )));
                        }
                    }
                }
                for (field, arg) in &globals {
                    if let Resolved::Buffer(data) = arg {
                        if data.len() != len {
                            return Err(BackendError::execution(format!(
                                "field {} buffer has {} elements, return buffer has {len}",
                                field.0,
                                data.len()
                            )));
                        }
                    }
                }

                Ok(Work::Kernel {
                    f: Arc::clone(&entry.f),
                    args,
                    globals,
                    return_buffer: *return_buffer,
                    elem: out.elem,
                    len,
                })
            }
        }
    }
}

impl Default for CpuScriptBackend {
    fn default() -> Self {
        CpuScriptBackend::new()
    }
}

enum Work {
    Kernel {
        f: Arc<KernelFn>,
        args: Vec<Resolved>,
        globals: BTreeMap<FieldId, Resolved>,
        return_buffer: BufferId,
        elem: ScalarKind,
        len: usize,
    },
    Invoke {
        f: Arc<InvokeFn>,
        packed: Vec<u8>,
    },
}

/// A slot resolved for execution: a scalar, or a snapshot of buffer contents.
enum Resolved {
    Scalar(Value),
    Buffer(Vec<Value>),
}

impl Resolved {
    fn element(&self, index: usize) -> BackendResult<Value> {
        match self {
            Resolved::Scalar(value) => Ok(*value),
            Resolved::Buffer(data) => data
                .get(index)
                .copied()
                .ok_or_else(|| BackendError::execution("buffer element index out of range")),
        }
    }
}

/// Turns a slot's wire pair into a usable value. Unresolved slots fall back
/// to their dependency edge: the producer's return buffer, or the producer's
/// current global binding.
fn resolve_slot(inner: &Inner, slot: &Slot, kind: ParamKind) -> BackendResult<Resolved> {
    let wire = if slot.wire.size != 0 {
        slot.wire
    } else if slot.dep_closure != 0 {
        dep_wire(inner, slot)?
    } else {
        return Err(BackendError::execution("slot was never bound"));
    };

    match kind {
        ParamKind::Buffer => {
            let buffer = BufferId(wire.value);
            let data = inner
                .buffers
                .get(&buffer)
                .ok_or_else(|| BackendError::unknown("buffer", buffer.0))?;
            Ok(Resolved::Buffer(data.data.clone()))
        }
        ParamKind::Bool => Ok(Resolved::Scalar(Value::Bool(wire.value != 0))),
        ParamKind::I32 => Ok(Resolved::Scalar(Value::I32(wire.value as u32 as i32))),
        ParamKind::I64 => Ok(Resolved::Scalar(Value::I64(wire.value as i64))),
        ParamKind::F32 => Ok(Resolved::Scalar(Value::F32(f32::from_bits(
            wire.value as u32,
        )))),
        ParamKind::F64 => Ok(Resolved::Scalar(Value::F64(f64::from_bits(wire.value)))),
    }
}

fn dep_wire(inner: &Inner, slot: &Slot) -> BackendResult<WireValue> {
    let producer = ClosureHandle(slot.dep_closure);
    let state = inner
        .closures
        .get(&producer)
        .ok_or_else(|| BackendError::unknown("closure", producer.0))?;

    if slot.dep_field == 0 {
        match &state.kind {
            ClosureKind::Kernel { return_buffer, .. } => {
                Ok(Value::Buffer(*return_buffer).to_wire())
            }
            ClosureKind::Invoke { .. } => Err(BackendError::execution(format!(
                "closure {} is an invoke and has no return value",
                producer.0
            ))),
        }
    } else {
        let field = FieldId(slot.dep_field);
        let bound = state
            .globals
            .get(&field)
            .ok_or_else(|| BackendError::unknown("field", field.0))?;
        if bound.wire.size == 0 {
            return Err(BackendError::execution(format!(
                "field {} of closure {} is unresolved",
                field.0, producer.0
            )));
        }
        Ok(bound.wire)
    }
}

fn matches_elem(elem: ScalarKind, value: &Value) -> bool {
    matches!(
        (elem, value),
        (ScalarKind::Bool, Value::Bool(_))
            | (ScalarKind::I32, Value::I32(_))
            | (ScalarKind::I64, Value::I64(_))
            | (ScalarKind::F32, Value::F32(_))
            | (ScalarKind::F64, Value::F64(_))
    )
}

fn annotate(err: BackendError, context: String) -> BackendError {
    match err {
        BackendError::Execution(message) => {
            BackendError::Execution(format!("{context}: {message}"))
        }
        other => other,
    }
}

/// Builds slot storage from a descriptor's positionally aligned arrays.
fn build_slots(
    field_ids: &[u64],
    values: &[u64],
    sizes: &[i32],
    dep_closures: Option<&[u64]>,
    dep_fields: Option<&[u64]>,
) -> BackendResult<(Vec<Slot>, BTreeMap<FieldId, Slot>)> {
    let n = field_ids.len();
    let aligned = values.len() == n
        && sizes.len() == n
        && dep_closures.map_or(true, |d| d.len() == n)
        && dep_fields.map_or(true, |d| d.len() == n);
    if !aligned {
        return Err(BackendError::execution("descriptor arrays are misaligned"));
    }

    let mut slots = Vec::new();
    let mut globals = BTreeMap::new();
    for i in 0..n {
        let slot = Slot {
            wire: WireValue {
                value: values[i],
                size: sizes[i],
            },
            dep_closure: dep_closures.map_or(0, |d| d[i]),
            dep_field: dep_fields.map_or(0, |d| d[i]),
        };
        if field_ids[i] == 0 {
            slots.push(slot);
        } else {
            globals.insert(FieldId(field_ids[i]), slot);
        }
    }
    Ok((slots, globals))
}

/// Kahn's topological sort over the dependency edges of one graph, stable in
/// declaration order among independent closures.
fn topo_order(inner: &Inner, graph: GraphHandle) -> BackendResult<Vec<ClosureHandle>> {
    let state = inner
        .graphs
        .get(&graph)
        .ok_or_else(|| BackendError::unknown("graph", graph.0))?;

    let members: HashMap<ClosureHandle, usize> = state
        .closures
        .iter()
        .enumerate()
        .map(|(i, handle)| (*handle, i))
        .collect();

    let n = state.closures.len();
    let mut indegree = vec![0usize; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, handle) in state.closures.iter().enumerate() {
        let closure = inner
            .closures
            .get(handle)
            .ok_or_else(|| BackendError::unknown("closure", handle.0))?;
        let deps = closure
            .slots
            .iter()
            .chain(closure.globals.values())
            .filter(|slot| slot.dep_closure != 0);
        for slot in deps {
            let producer = ClosureHandle(slot.dep_closure);
            match members.get(&producer) {
                Some(&p) => {
                    consumers[p].push(i);
                    indegree[i] += 1;
                }
                None => {
                    return Err(BackendError::execution(format!(
                        "closure {} depends on closure {} outside the graph",
                        handle.0, producer.0
                    )))
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(state.closures[i]);
        for &consumer in &consumers[i] {
            indegree[consumer] -= 1;
            if indegree[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    if order.len() != n {
        let stuck = (0..n)
            .find(|&i| indegree[i] > 0)
            .map(|i| state.closures[i].0)
            .unwrap_or(0);
        return Err(BackendError::DependencyCycle(stuck));
    }
    Ok(order)
}

impl ScriptBackend for CpuScriptBackend {
    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn create_buffer(&self, spec: &BufferSpec) -> BackendResult<BufferId> {
        let mut inner = self.lock();
        let id = BufferId(inner.mint());
        inner.buffers.insert(
            id,
            BufferData {
                elem: spec.elem,
                data: vec![Value::zero(spec.elem); spec.len],
            },
        );
        Ok(id)
    }

    fn create_closure(&self, desc: &KernelClosureDesc) -> BackendResult<ClosureHandle> {
        let mut inner = self.lock();
        let entry = inner
            .kernels
            .get(&desc.kernel)
            .ok_or_else(|| BackendError::unknown("kernel", desc.kernel.0))?;
        let declared = entry.params.len();
        if !inner.buffers.contains_key(&desc.return_buffer) {
            return Err(BackendError::unknown("buffer", desc.return_buffer.0));
        }

        let (slots, globals) = build_slots(
            &desc.field_ids,
            &desc.values,
            &desc.sizes,
            Some(&desc.dep_closures),
            Some(&desc.dep_fields),
        )?;
        if slots.len() != declared {
            return Err(BackendError::execution(format!(
                "kernel {} declares {declared} arguments, descriptor carries {}",
                desc.kernel.0,
                slots.len()
            )));
        }
        for field in globals.keys() {
            if !inner.fields.contains_key(field) {
                return Err(BackendError::unknown("field", field.0));
            }
        }

        let handle = ClosureHandle(inner.mint());
        inner.closures.insert(
            handle,
            ClosureState {
                kind: ClosureKind::Kernel {
                    kernel: desc.kernel,
                    return_buffer: desc.return_buffer,
                },
                slots,
                globals,
            },
        );
        Ok(handle)
    }

    fn create_invoke_closure(&self, desc: &InvokeClosureDesc) -> BackendResult<ClosureHandle> {
        let mut inner = self.lock();
        if !inner.invokes.contains_key(&desc.invoke) {
            return Err(BackendError::unknown("invoke", desc.invoke.0));
        }
        let (slots, globals) = build_slots(&desc.field_ids, &desc.values, &desc.sizes, None, None)?;
        if !slots.is_empty() {
            return Err(BackendError::execution(
                "invoke descriptors carry only global binding slots",
            ));
        }
        for field in globals.keys() {
            if !inner.fields.contains_key(field) {
                return Err(BackendError::unknown("field", field.0));
            }
        }

        let handle = ClosureHandle(inner.mint());
        inner.closures.insert(
            handle,
            ClosureState {
                kind: ClosureKind::Invoke {
                    invoke: desc.invoke,
                    packed: desc.packed_args.clone(),
                },
                slots,
                globals,
            },
        );
        Ok(handle)
    }

    fn set_closure_arg(
        &self,
        closure: ClosureHandle,
        index: usize,
        value: WireValue,
    ) -> BackendResult<()> {
        let mut inner = self.lock();
        let state = inner
            .closures
            .get_mut(&closure)
            .ok_or_else(|| BackendError::unknown("closure", closure.0))?;
        let slot = state.slots.get_mut(index).ok_or_else(|| {
            BackendError::execution(format!(
                "closure {} has no argument slot {index}",
                closure.0
            ))
        })?;
        slot.wire = value;
        Ok(())
    }

    fn set_closure_global(
        &self,
        closure: ClosureHandle,
        field: FieldId,
        value: WireValue,
    ) -> BackendResult<()> {
        let mut inner = self.lock();
        let state = inner
            .closures
            .get_mut(&closure)
            .ok_or_else(|| BackendError::unknown("closure", closure.0))?;
        let slot = state.globals.get_mut(&field).ok_or_else(|| {
            BackendError::execution(format!(
                "closure {} has no binding for field {}",
                closure.0, field.0
            ))
        })?;
        slot.wire = value;
        Ok(())
    }

    fn create_graph(&self, desc: &GraphDesc) -> BackendResult<GraphHandle> {
        let mut inner = self.lock();
        for handle in &desc.closures {
            if !inner.closures.contains_key(handle) {
                return Err(BackendError::unknown("closure", handle.0));
            }
        }
        let handle = GraphHandle(inner.mint());
        inner.graphs.insert(
            handle,
            GraphState {
                name: desc.name.clone(),
                closures: desc.closures.clone(),
            },
        );
        Ok(handle)
    }

    fn execute_graph(&self, graph: GraphHandle) -> BackendResult<()> {
        let (name, order) = {
            let inner = self.lock();
            let order = topo_order(&inner, graph)?;
            let name = inner
                .graphs
                .get(&graph)
                .map(|g| g.name.clone())
                .unwrap_or_default();
            (name, order)
        };
        debug!(graph = %name, closures = order.len(), "executing graph");
        for handle in order {
            self.run_closure(handle)?;
        }
        Ok(())
    }
}
