use anyhow::Result;

use kerngraph::backend::spec::{
    BackendError, BufferSpec, GraphDesc, InvokeClosureDesc, KernelClosureDesc, ScalarKind,
    ScriptBackend,
};
use kerngraph::Value;
use kerngraph_backend_ref_cpu::{CpuScriptBackend, ParamKind};

/// One-argument increment kernel with its slot already bound to `10`.
fn kernel_desc(backend: &CpuScriptBackend) -> KernelClosureDesc {
    let kernel = backend.register_kernel(vec![ParamKind::I32], |ctx| {
        Value::I32(ctx.arg(0).as_i32().unwrap() + 1)
    });
    let return_buffer = backend
        .create_buffer(&BufferSpec::new(ScalarKind::I32, 1))
        .unwrap();
    let wire = Value::I32(10).to_wire();
    KernelClosureDesc {
        kernel,
        return_buffer,
        field_ids: vec![0],
        values: vec![wire.value],
        sizes: vec![wire.size],
        dep_closures: vec![0],
        dep_fields: vec![0],
    }
}

#[test]
fn declaration_order_does_not_constrain_execution_order() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let producer_kernel = backend.register_kernel(vec![], |_| Value::I32(6));
    let consumer_kernel = backend.register_kernel(vec![ParamKind::Buffer], |ctx| {
        Value::I32(ctx.arg(0).as_i32().unwrap() + 1)
    });

    let producer_out = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;
    let producer = backend.create_closure(&KernelClosureDesc {
        kernel: producer_kernel,
        return_buffer: producer_out,
        field_ids: vec![],
        values: vec![],
        sizes: vec![],
        dep_closures: vec![],
        dep_fields: vec![],
    })?;

    let consumer_out = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;
    let consumer = backend.create_closure(&KernelClosureDesc {
        kernel: consumer_kernel,
        return_buffer: consumer_out,
        field_ids: vec![0],
        values: vec![0],
        sizes: vec![0],
        dep_closures: vec![producer.0],
        dep_fields: vec![0],
    })?;

    // Consumer listed ahead of its producer; the topological order must run
    // the producer first anyway.
    let graph = backend.create_graph(&GraphDesc {
        name: "reversed".to_string(),
        cache_dir: None,
        closures: vec![consumer, producer],
    })?;
    backend.execute_graph(graph)?;

    assert_eq!(backend.buffer_values(consumer_out)?, vec![Value::I32(7)]);
    Ok(())
}

#[test]
fn unresolved_slot_without_a_dependency_fails_at_execution() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let mut desc = kernel_desc(&backend);
    desc.values = vec![0];
    desc.sizes = vec![0];
    let closure = backend.create_closure(&desc)?;
    let graph = backend.create_graph(&GraphDesc {
        name: "never-bound".to_string(),
        cache_dir: None,
        closures: vec![closure],
    })?;

    let err = backend.execute_graph(graph).unwrap_err();
    match err {
        BackendError::Execution(message) => {
            assert!(message.contains("never bound"), "got: {message}")
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn dependencies_outside_the_graph_are_rejected() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let producer = backend.create_closure(&kernel_desc(&backend))?;

    let consumer_kernel = backend.register_kernel(vec![ParamKind::Buffer], |ctx| ctx.arg(0));
    let consumer_out = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;
    let consumer = backend.create_closure(&KernelClosureDesc {
        kernel: consumer_kernel,
        return_buffer: consumer_out,
        field_ids: vec![0],
        values: vec![0],
        sizes: vec![0],
        dep_closures: vec![producer.0],
        dep_fields: vec![0],
    })?;

    // Graph omits the producer the consumer depends on.
    let graph = backend.create_graph(&GraphDesc {
        name: "partial".to_string(),
        cache_dir: None,
        closures: vec![consumer],
    })?;
    let err = backend.execute_graph(graph).unwrap_err();
    match err {
        BackendError::Execution(message) => {
            assert!(message.contains("outside the graph"), "got: {message}")
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn dependency_cycles_are_rejected() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let passthrough = backend.register_kernel(vec![ParamKind::Buffer], |ctx| ctx.arg(0));
    let out_a = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;
    let out_b = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;

    // Handles come from one sequential counter, so the next two closure
    // handles are known ahead of creation; that lets the descriptors
    // reference each other.
    let a = backend.create_closure(&KernelClosureDesc {
        kernel: passthrough,
        return_buffer: out_a,
        field_ids: vec![0],
        values: vec![0],
        sizes: vec![0],
        dep_closures: vec![out_b.0 + 2],
        dep_fields: vec![0],
    })?;
    let b = backend.create_closure(&KernelClosureDesc {
        kernel: passthrough,
        return_buffer: out_b,
        field_ids: vec![0],
        values: vec![0],
        sizes: vec![0],
        dep_closures: vec![a.0],
        dep_fields: vec![0],
    })?;
    assert_eq!(b.0, out_b.0 + 2);

    let graph = backend.create_graph(&GraphDesc {
        name: "cyclic".to_string(),
        cache_dir: None,
        closures: vec![a, b],
    })?;
    let err = backend.execute_graph(graph).unwrap_err();
    assert!(matches!(err, BackendError::DependencyCycle(_)));
    Ok(())
}

#[test]
fn descriptor_arity_must_match_the_kernel_declaration() {
    let backend = CpuScriptBackend::new();
    let mut desc = kernel_desc(&backend);
    // Drop the only positional slot; the kernel declares one parameter.
    desc.field_ids.clear();
    desc.values.clear();
    desc.sizes.clear();
    desc.dep_closures.clear();
    desc.dep_fields.clear();
    assert!(backend.create_closure(&desc).is_err());
}

#[test]
fn misaligned_descriptor_arrays_are_rejected() {
    let backend = CpuScriptBackend::new();
    let mut desc = kernel_desc(&backend);
    desc.sizes.push(4);
    assert!(backend.create_closure(&desc).is_err());
}

#[test]
fn invoke_descriptors_carry_no_positional_slots() {
    let backend = CpuScriptBackend::new();
    let invoke = backend.register_invoke(|_| {});
    let err = backend
        .create_invoke_closure(&InvokeClosureDesc {
            invoke,
            packed_args: Vec::new(),
            field_ids: vec![0],
            values: vec![0],
            sizes: vec![4],
        })
        .unwrap_err();
    assert!(matches!(err, BackendError::Execution(_)));
}

#[test]
fn buffer_arguments_must_match_the_return_buffer_length() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let copy_kernel = backend.register_kernel(vec![ParamKind::Buffer], |ctx| ctx.arg(0));

    let long = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 2))?;
    let short = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 1))?;
    let wire = Value::Buffer(long).to_wire();
    let closure = backend.create_closure(&KernelClosureDesc {
        kernel: copy_kernel,
        return_buffer: short,
        field_ids: vec![0],
        values: vec![wire.value],
        sizes: vec![wire.size],
        dep_closures: vec![0],
        dep_fields: vec![0],
    })?;
    let graph = backend.create_graph(&GraphDesc {
        name: "mismatched".to_string(),
        cache_dir: None,
        closures: vec![closure],
    })?;

    let err = backend.execute_graph(graph).unwrap_err();
    assert!(matches!(err, BackendError::Execution(_)));
    Ok(())
}

#[test]
fn kernels_run_once_per_return_element() -> Result<()> {
    let backend = CpuScriptBackend::new();
    let iota = backend.register_kernel(vec![], |ctx| Value::I32(ctx.index() as i32));
    let out = backend.create_buffer(&BufferSpec::new(ScalarKind::I32, 4))?;
    let closure = backend.create_closure(&KernelClosureDesc {
        kernel: iota,
        return_buffer: out,
        field_ids: vec![],
        values: vec![],
        sizes: vec![],
        dep_closures: vec![],
        dep_fields: vec![],
    })?;
    let graph = backend.create_graph(&GraphDesc {
        name: "iota".to_string(),
        cache_dir: None,
        closures: vec![closure],
    })?;
    backend.execute_graph(graph)?;

    assert_eq!(
        backend.buffer_values(out)?,
        vec![Value::I32(0), Value::I32(1), Value::I32(2), Value::I32(3)]
    );
    Ok(())
}
