//! Reference CPU backend for `kerngraph`.
//!
//! Kernels and invokes are ordinary Rust closures registered up front; the
//! backend interprets graph descriptors directly, ordering closures by their
//! recorded dependency edges. It exists to exercise the graph core and to
//! document the backend contract, not to be fast.

pub mod cpu;

pub use cpu::{CpuScriptBackend, KernelCtx, ParamKind};
