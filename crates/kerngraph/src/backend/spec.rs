//! Wire-level contract between the graph core and a compute backend.
//!
//! Closure and graph descriptors carry positionally aligned parallel arrays:
//! `field_ids`, `values`, `sizes`, and (for kernel closures) `dep_closures`
//! and `dep_fields` all line up by slot index. A `0` entry in `field_ids`
//! marks a positional argument slot; a `0` entry in a dependency array means
//! "no dependency". Backends use the dependency pairs to order closures among
//! themselves; the core never schedules.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a compiled kernel entry point inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelId(pub u64);

/// Identifies a non-kernel (procedure) entry point inside a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvokeId(pub u64);

/// Identifies a global field of a backend script.
///
/// Backends mint field identifiers starting at `1`; the raw value `0` is
/// reserved as the "positional slot / no field" sentinel in descriptor arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldId(pub u64);

impl FieldId {
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a backend-allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

/// Opaque handle to a backend closure resource.
///
/// Handles are nonzero; `0` is the "no dependency" sentinel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureHandle(pub u64);

impl ClosureHandle {
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a backend graph resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphHandle(pub u64);

/// Scalar element types a buffer can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Shape of a backend buffer: element type plus element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferSpec {
    pub elem: ScalarKind,
    pub len: usize,
}

impl BufferSpec {
    pub fn new(elem: ScalarKind, len: usize) -> Self {
        BufferSpec { elem, len }
    }
}

/// Untyped wire encoding of a slot value: a 64-bit payload plus a size hint.
///
/// Sizes are `4` or `8` for scalars depending on width; `-1` marks a buffer
/// handle whose true size only the backend knows. A size of `0` means the
/// slot is unresolved and will be supplied later, either by an input binding
/// or along a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
    pub value: u64,
    pub size: i32,
}

impl WireValue {
    /// Sentinel for slots whose value arrives after construction.
    pub const UNRESOLVED: WireValue = WireValue { value: 0, size: 0 };

    /// Size hint marking a buffer handle.
    pub const BUFFER_SIZE: i32 = -1;
}

/// Full description of a kernel closure, ready for backend creation.
///
/// The return buffer is created by the core before the closure is requested,
/// so a failed creation never leaves a half-registered resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelClosureDesc {
    pub kernel: KernelId,
    pub return_buffer: BufferId,
    pub field_ids: Vec<u64>,
    pub values: Vec<u64>,
    pub sizes: Vec<i32>,
    pub dep_closures: Vec<u64>,
    pub dep_fields: Vec<u64>,
}

/// Full description of an invoke closure.
///
/// Positional arguments are pre-packed into `packed_args`; only global
/// bindings travel as slots, and no dependency metadata is carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeClosureDesc {
    pub invoke: InvokeId,
    pub packed_args: Vec<u8>,
    pub field_ids: Vec<u64>,
    pub values: Vec<u64>,
    pub sizes: Vec<i32>,
}

/// Description of a finished graph: validated name, optional kernel-cache
/// directory, and the member closures in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDesc {
    pub name: String,
    pub cache_dir: Option<PathBuf>,
    pub closures: Vec<ClosureHandle>,
}

/// Backend failure surfaced to the graph core.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown {kind} id {id}")]
    UnknownResource { kind: &'static str, id: u64 },
    #[error("closure dependency cycle involving closure {0}")]
    DependencyCycle(u64),
    #[error("backend execution failure: {0}")]
    Execution(String),
}

impl BackendError {
    pub fn unknown(kind: &'static str, id: u64) -> Self {
        BackendError::UnknownResource { kind, id }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution(message.into())
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Resource-creation and invocation surface the graph core consumes.
///
/// Implementations own buffer allocation, closure bookkeeping, and the
/// dependency-ordered execution of a graph. All methods are synchronous;
/// any parallelism inside `execute_graph` is invisible to the core.
pub trait ScriptBackend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g. `"ref-cpu"`).
    fn backend_name(&self) -> &str;

    /// Allocates a zero-initialised buffer for a kernel return value.
    fn create_buffer(&self, spec: &BufferSpec) -> BackendResult<BufferId>;

    /// Creates a kernel closure resource from a full descriptor.
    fn create_closure(&self, desc: &KernelClosureDesc) -> BackendResult<ClosureHandle>;

    /// Creates an invoke closure resource from a full descriptor.
    fn create_invoke_closure(&self, desc: &InvokeClosureDesc) -> BackendResult<ClosureHandle>;

    /// Overwrites a positional argument slot of an existing closure.
    fn set_closure_arg(
        &self,
        closure: ClosureHandle,
        index: usize,
        value: WireValue,
    ) -> BackendResult<()>;

    /// Overwrites a global binding slot of an existing closure.
    fn set_closure_global(
        &self,
        closure: ClosureHandle,
        field: FieldId,
        value: WireValue,
    ) -> BackendResult<()>;

    /// Creates a graph resource over previously created closures.
    fn create_graph(&self, desc: &GraphDesc) -> BackendResult<GraphHandle>;

    /// Runs every closure of the graph once, honouring dependency edges.
    fn execute_graph(&self, graph: GraphHandle) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Descriptors are part of the backend wire contract; their serialized
    // shape matters to out-of-process backends.
    #[test]
    fn kernel_descriptor_serializes_with_aligned_arrays() {
        let desc = KernelClosureDesc {
            kernel: KernelId(3),
            return_buffer: BufferId(9),
            field_ids: vec![0, 7],
            values: vec![5, 0],
            sizes: vec![4, 0],
            dep_closures: vec![0, 2],
            dep_fields: vec![0, 0],
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["kernel"], 3);
        assert_eq!(json["return_buffer"], 9);
        assert_eq!(json["field_ids"], serde_json::json!([0, 7]));
        assert_eq!(json["sizes"], serde_json::json!([4, 0]));
        let back: KernelClosureDesc = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }

    #[test]
    fn unresolved_sentinel_is_all_zero() {
        assert_eq!(WireValue::UNRESOLVED, WireValue { value: 0, size: 0 });
        assert_eq!(WireValue::BUFFER_SIZE, -1);
    }
}
