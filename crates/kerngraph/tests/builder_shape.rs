use std::sync::Arc;

use anyhow::Result;

use kerngraph::backend::spec::{BufferSpec, ScalarKind};
use kerngraph::{Arg, Binding, BuildError, CallItem, GraphBuilder, Value};
use kerngraph_backend_ref_cpu::{CpuScriptBackend, ParamKind};

#[test]
fn graph_names_are_validated_at_create() {
    let backend = Arc::new(CpuScriptBackend::new());

    let longest = "a".repeat(100);
    for name in ["ok", "graph-01", "A-b-3", longest.as_str()] {
        let builder = GraphBuilder::new(Arc::clone(&backend));
        assert!(builder.create(name, &[]).is_ok(), "{name:?} should pass");
    }

    let too_long = "a".repeat(101);
    for name in ["", "has space", "under_score", "dot.name", too_long.as_str()] {
        let builder = GraphBuilder::new(Arc::clone(&backend));
        let err = builder.create(name, &[]).unwrap_err();
        assert!(
            matches!(err, BuildError::InvalidName(ref n) if n.as_str() == name),
            "{name:?} should be rejected"
        );
    }
}

#[test]
fn flattened_calls_reject_arguments_after_bindings() -> Result<()> {
    let backend = Arc::new(CpuScriptBackend::new());
    let field = backend.register_field(ParamKind::I32);
    let kernel = backend.register_kernel(vec![ParamKind::I32], |ctx| ctx.arg(0));

    let mut builder = GraphBuilder::new(Arc::clone(&backend));
    let err = builder
        .add_kernel_call(
            kernel,
            BufferSpec::new(ScalarKind::I32, 1),
            &[
                CallItem::from(Value::I32(1)),
                CallItem::from(Binding::new(field, Value::I32(2))),
                CallItem::from(Value::I32(3)),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, BuildError::MisplacedArgument { index: 2 }));

    // Well-formed order still goes through.
    builder.add_kernel_call(
        kernel,
        BufferSpec::new(ScalarKind::I32, 1),
        &[
            CallItem::from(Value::I32(1)),
            CallItem::from(Binding::new(field, Value::I32(2))),
        ],
    )?;
    Ok(())
}

#[test]
fn invoke_arguments_must_be_concrete() {
    let backend = Arc::new(CpuScriptBackend::new());
    let invoke = backend.register_invoke(|_| {});

    let mut builder = GraphBuilder::new(Arc::clone(&backend));
    let x = builder.add_input();
    let err = builder
        .add_invoke(invoke, &[Arg::Value(Value::I32(1)), Arg::Unbound(x)], &[])
        .unwrap_err();
    assert!(matches!(
        err,
        BuildError::NonConcreteInvokeArg { index: 1, .. }
    ));
}

#[test]
fn futures_are_value_handles() -> Result<()> {
    let backend = Arc::new(CpuScriptBackend::new());
    let field = backend.register_field(ParamKind::I32);
    let other_field = backend.register_field(ParamKind::I32);
    let kernel = backend.register_kernel(vec![], |_| Value::I32(0));

    let mut builder = GraphBuilder::new(Arc::clone(&backend));
    let closure = builder.add_kernel(
        kernel,
        BufferSpec::new(ScalarKind::I32, 1),
        &[],
        &[
            (field, Arg::Value(Value::I32(1))),
            (other_field, Arg::Value(Value::I32(2))),
        ],
    )?;

    assert_eq!(builder.return_future(closure), builder.return_future(closure));
    assert_eq!(
        builder.global_future(closure, field),
        builder.global_future(closure, field)
    );
    assert_ne!(
        builder.global_future(closure, field),
        builder.global_future(closure, other_field)
    );
    assert_ne!(
        builder.return_future(closure),
        builder.global_future(closure, field)
    );
    Ok(())
}

#[test]
fn handles_from_another_builder_are_rejected() -> Result<()> {
    let backend = Arc::new(CpuScriptBackend::new());
    let kernel = backend.register_kernel(vec![ParamKind::I32], |ctx| ctx.arg(0));

    let mut donor = GraphBuilder::new(Arc::clone(&backend));
    let foreign_input = donor.add_input();
    let foreign_closure = donor.add_kernel(
        kernel,
        BufferSpec::new(ScalarKind::I32, 1),
        &[Arg::Unbound(foreign_input)],
        &[],
    )?;
    let foreign_future = donor.return_future(foreign_closure);

    // A builder that declared no inputs cannot wire someone else's.
    let mut builder = GraphBuilder::new(Arc::clone(&backend));
    let err = builder
        .add_kernel(
            kernel,
            BufferSpec::new(ScalarKind::I32, 1),
            &[Arg::Unbound(foreign_input)],
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownInput(0)));

    // Nor wire a future onto a closure it never created.
    let err = builder
        .add_kernel(
            kernel,
            BufferSpec::new(ScalarKind::I32, 1),
            &[Arg::Future(foreign_future)],
            &[],
        )
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownClosure(0)));

    // Same check at create time for output futures.
    let builder = GraphBuilder::new(Arc::clone(&backend));
    let err = builder.create("orphan-output", &[foreign_future]).unwrap_err();
    assert!(matches!(err, BuildError::UnknownClosure(0)));
    Ok(())
}

#[test]
fn invoke_args_pack_to_little_endian_wire_widths() -> Result<()> {
    use std::sync::Mutex;

    let backend = Arc::new(CpuScriptBackend::new());
    let captured: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);
    let invoke = backend.register_invoke(move |bytes| {
        *sink.lock().unwrap() = Some(bytes.to_vec());
    });

    let mut builder = GraphBuilder::new(Arc::clone(&backend));
    let closure = builder.add_invoke(
        invoke,
        &[
            Arg::Value(Value::Bool(true)),
            Arg::Value(Value::I32(-2)),
            Arg::Value(Value::I64(7)),
            Arg::Value(Value::F32(1.5)),
            Arg::Value(Value::F64(-0.25)),
        ],
        &[],
    )?;
    let out = builder.return_future(closure);
    let mut group = builder.create("packer", &[out])?;
    group.execute(&[])?;

    let bytes = captured.lock().unwrap().clone().expect("invoke ran");
    let mut expected = Vec::new();
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&(-2i32).to_le_bytes());
    expected.extend_from_slice(&7i64.to_le_bytes());
    expected.extend_from_slice(&1.5f32.to_le_bytes());
    expected.extend_from_slice(&(-0.25f64).to_le_bytes());
    assert_eq!(bytes, expected);
    Ok(())
}
