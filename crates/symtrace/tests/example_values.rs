mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use symtrace::tensor::Kwargs;
use symtrace::variables::ContainerKind;
use symtrace::{
    Argument, ConstValue, DType, ExampleValue, ExecError, ExecResult, GuardKind, ModuleHandle,
    NodeId, Source, Target, TensorKind, TensorLike, TensorVariable, TraceConfig, TraceError,
    TracedModule, VariableOptions,
};
use symtrace_ref_cpu::{CpuLibrary, CpuTensor, LazyLinear, Linear};

use common::{eager, input, tensor, trace, trace_with};

#[test]
fn add_produces_placeholder_example_with_merged_guards() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::full(&[2, 3], 1.0, DType::F32));
    let y = input(&mut tx, "y", CpuTensor::full(&[2, 3], 2.0, DType::F32));

    let node = tx.output.create_proxy(
        Target::function("add"),
        vec![x.as_proxy()?, y.as_proxy()?],
        BTreeMap::new(),
    )?;
    let out = TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x, &y]))?;

    let out_tensor = tensor(&out);
    assert_eq!(out_tensor.kind(), &TensorKind::Plain);
    assert_eq!(out_tensor.size(), Some(&[2, 3][..]));
    assert_eq!(out_tensor.stride(), Some(&[3, 1][..]));
    assert!(out.source().is_none());

    let example = tx
        .output
        .example_value(node)?
        .and_then(ExampleValue::as_tensor)
        .expect("tensor example attached");
    assert!(example.is_placeholder());

    for name in ["x", "y"] {
        assert!(out
            .guards()
            .iter()
            .any(|g| g.source == Source::local(name) && g.kind == GuardKind::TensorMatch));
    }
    assert_eq!(tx.output.guards.len(), 2);
    Ok(())
}

#[test]
fn elementwise_add_merges_requires_grad() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(
        &mut tx,
        "x",
        CpuTensor::zeros(&[3, 4], DType::F32).with_requires_grad(true),
    );
    let y = input(&mut tx, "y", CpuTensor::zeros(&[3, 4], DType::F32));
    let node = tx.output.create_proxy(
        Target::function("add"),
        vec![x.as_proxy()?, y.as_proxy()?],
        BTreeMap::new(),
    )?;
    let out = TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x, &y]))?;

    let props = tensor(&out).properties().cloned().expect("metadata specialized");
    assert_eq!(props.dtype, DType::F32);
    assert_eq!(props.ndim, 2);
    assert!(props.requires_grad);
    assert_eq!(tensor(&out).size(), Some(&[3, 4][..]));
    Ok(())
}

#[test]
fn eager_propagation_computes_real_values() -> anyhow::Result<()> {
    let mut tx = trace(eager());
    let x = input(&mut tx, "x", CpuTensor::full(&[2, 2], 1.5, DType::F32));
    let node = tx.output.create_proxy(
        Target::function("mul"),
        vec![x.as_proxy()?, Argument::Const(ConstValue::Int(2))],
        BTreeMap::new(),
    )?;
    TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x]))?;

    let example = tx
        .output
        .example_value(node)?
        .and_then(ExampleValue::as_tensor)
        .expect("tensor example attached");
    assert_eq!(example.values(), Some(&[3.0, 3.0, 3.0, 3.0][..]));
    Ok(())
}

#[test]
fn tracing_does_not_advance_the_generator() -> anyhow::Result<()> {
    let library = Arc::new(CpuLibrary::new(5));
    let mut tx = trace_with(Arc::clone(&library), eager());
    let node = tx.output.create_proxy(
        Target::function("rand"),
        vec![
            Argument::Const(ConstValue::Int(4)),
            Argument::Const(ConstValue::Int(4)),
        ],
        BTreeMap::new(),
    )?;
    TensorVariable::create(&mut tx, node, None, VariableOptions::new())?;

    let example = tx.output.example_value(node)?.and_then(ExampleValue::as_tensor);
    assert!(example.map_or(false, |t| t.values().is_some()));
    assert_eq!(library.next_random(), CpuLibrary::new(5).next_random());
    Ok(())
}

#[test]
fn lazy_module_is_initialized_before_placeholder_execution() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let lazy = Arc::new(LazyLinear::new("proj", 3, 11));
    tx.output.register_module("proj", lazy.clone());
    let x = input(&mut tx, "x", CpuTensor::full(&[2, 4], 1.0, DType::F32));
    assert!(lazy.is_lazy());

    let node = tx.output.create_proxy(
        Target::module("proj"),
        vec![x.as_proxy()?],
        BTreeMap::new(),
    )?;
    let out = TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x]))?;

    assert!(!lazy.is_lazy());
    assert_eq!(lazy.in_features(), Some(4));
    let out = tensor(&out);
    assert_eq!(out.size(), Some(&[2, 3][..]));
    assert!(out.properties().map_or(false, |p| p.requires_grad));
    assert!(out.parameter_value().is_none());
    Ok(())
}

/// Lazy module whose initialization hits an operation the library does not provide.
struct RefusingLazy;

impl TracedModule<CpuTensor> for RefusingLazy {
    fn name(&self) -> &str {
        "conv"
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn forward(
        &self,
        _args: &[ExampleValue<CpuTensor>],
        _kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<ExampleValue<CpuTensor>> {
        Err(ExecError::unsupported("conv2d weight init"))
    }

    fn deep_copy(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(RefusingLazy)
    }

    fn to_placeholder(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(RefusingLazy)
    }
}

#[test]
fn lazy_initialization_refusal_breaks_the_graph() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    tx.output.register_module("conv", Arc::new(RefusingLazy));
    let x = input(&mut tx, "x", CpuTensor::zeros(&[1, 3], DType::F32));
    let node = tx
        .output
        .create_proxy(Target::module("conv"), vec![x.as_proxy()?], BTreeMap::new())?;
    let err = TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x]))
        .expect_err("initialization is refused");

    assert!(err.is_graph_break());
    match err {
        TraceError::Unsupported { reason } => assert_eq!(reason, "conv2d weight init"),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(tx.output.example_value(node)?.is_none());
    Ok(())
}

#[test]
fn explicit_module_overrides_the_registered_one() -> anyhow::Result<()> {
    let mut tx = trace(eager());
    let x = input(&mut tx, "x", CpuTensor::full(&[1, 2], 1.0, DType::F32));
    let weight = CpuTensor::from_vec(&[1, 2], vec![2.0, 3.0], DType::F32);
    let module: ModuleHandle<CpuTensor> = Arc::new(Linear::new("fc", weight, None));

    let node = tx
        .output
        .create_proxy(Target::module("fc"), vec![x.as_proxy()?], BTreeMap::new())?;
    TensorVariable::create_with_module(&mut tx, node, module, VariableOptions::propagate([&x]))?;

    let example = tx
        .output
        .example_value(node)?
        .and_then(ExampleValue::as_tensor)
        .expect("tensor example attached");
    assert_eq!(example.values(), Some(&[5.0][..]));
    Ok(())
}

#[test]
fn missing_module_is_an_internal_error() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2], DType::F32));
    let node = tx
        .output
        .create_proxy(Target::module("absent"), vec![x.as_proxy()?], BTreeMap::new())?;
    let err = TensorVariable::create(&mut tx, node, None, VariableOptions::new())
        .expect_err("module lookup fails");
    assert!(matches!(err, TraceError::Internal(_)));
    Ok(())
}

/// Returns `(x, None, x)`, like attention with an empty weights slot, as a tuple or a list.
struct WithEmptySlot {
    as_list: bool,
}

impl TracedModule<CpuTensor> for WithEmptySlot {
    fn name(&self) -> &str {
        "attn"
    }

    fn forward(
        &self,
        args: &[ExampleValue<CpuTensor>],
        _kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<ExampleValue<CpuTensor>> {
        let first = args
            .first()
            .cloned()
            .ok_or_else(|| ExecError::runtime("attn expects an input"))?;
        let slots = vec![first.clone(), ExampleValue::None, first];
        Ok(if self.as_list {
            ExampleValue::List(slots)
        } else {
            ExampleValue::Tuple(slots)
        })
    }

    fn deep_copy(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(WithEmptySlot {
            as_list: self.as_list,
        })
    }

    fn to_placeholder(&self) -> ModuleHandle<CpuTensor> {
        self.deep_copy()
    }
}

fn call_attn(
    tx: &mut symtrace::TraceContext<CpuLibrary>,
    as_list: bool,
) -> anyhow::Result<(NodeId, common::Var)> {
    tx.output.register_module("attn", Arc::new(WithEmptySlot { as_list }));
    let x = input(tx, "x", CpuTensor::zeros(&[2, 2], DType::F32));
    let node = tx
        .output
        .create_proxy(Target::module("attn"), vec![x.as_proxy()?], BTreeMap::new())?;
    let out = TensorVariable::create(tx, node, None, VariableOptions::propagate([&x]))?;
    Ok((node, out))
}

#[test]
fn tuple_output_keeps_none_slots() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let (node, out) = call_attn(&mut tx, false)?;

    let container = out.as_container().expect("tuple output");
    assert_eq!(container.kind, ContainerKind::Tuple);
    assert!(container.options.mutable_local.is_none());
    assert_eq!(container.len(), 3);
    assert_eq!(container.items[1].as_constant(), Some(&ConstValue::None));
    for index in [0, 2] {
        let item = tensor(&container.items[index]);
        let item_node = tx.output.node(item.proxy())?;
        assert_eq!(item_node.target, Target::Builtin(symtrace::Builtin::GetItem));
        assert_eq!(
            item_node.args,
            vec![
                Argument::Node(node),
                Argument::Const(ConstValue::Int(index as i64))
            ]
        );
    }
    assert!(tx.output.example_value(node)?.is_some());
    Ok(())
}

#[test]
fn list_outputs_get_their_own_identity() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let (_, first) = call_attn(&mut tx, true)?;
    let (_, second) = call_attn(&mut tx, true)?;

    let first = first.as_container().expect("list output");
    let second = second.as_container().expect("list output");
    assert_eq!(first.kind, ContainerKind::List);
    assert_eq!(first.len(), 3);
    assert!(first.items[0].as_tensor().is_some());
    assert_eq!(first.items[1].as_constant(), Some(&ConstValue::None));
    assert!(first.items[2].as_tensor().is_some());

    let (a, b) = (first.options.mutable_local, second.options.mutable_local);
    assert!(a.is_some() && b.is_some());
    assert_ne!(a, b);
    Ok(())
}

#[test]
fn named_tuple_results_are_unpacked_per_field() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2, 5], DType::F32));
    let node = tx.output.create_proxy(
        Target::function("max"),
        vec![x.as_proxy()?, Argument::Const(ConstValue::Int(1))],
        BTreeMap::new(),
    )?;
    let out = TensorVariable::create(&mut tx, node, None, VariableOptions::propagate([&x]))?;

    let container = out.as_container().expect("named tuple output");
    assert_eq!(container.kind.type_name(), "torch.return_types.max");
    let values = tensor(&container.items[0]);
    let indices = tensor(&container.items[1]);
    assert_eq!(values.size(), Some(&[2][..]));
    assert_eq!(indices.properties().map(|p| p.dtype), Some(DType::I64));
    Ok(())
}

#[test]
fn shape_mismatch_surfaces_as_runtime_error() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2, 3], DType::F32));
    let y = input(&mut tx, "y", CpuTensor::zeros(&[4], DType::F32));
    let node = tx.output.create_proxy(
        Target::function("add"),
        vec![x.as_proxy()?, y.as_proxy()?],
        BTreeMap::new(),
    )?;
    let err = TensorVariable::create(&mut tx, node, None, VariableOptions::new())
        .expect_err("mismatched shapes");

    assert!(!err.is_graph_break());
    match err {
        TraceError::Runtime { target, source } => {
            assert_eq!(target, "torch.add");
            assert!(matches!(source, ExecError::Runtime { .. }));
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn data_dependent_shape_breaks_the_graph_under_placeholders() -> anyhow::Result<()> {
    let config = TraceConfig::default().with_dynamic_shapes(true);
    let mut tx = trace(config);
    let x = input(&mut tx, "x", CpuTensor::zeros(&[3], DType::F32));
    let err = tensor(&x)
        .call_method(&mut tx, "nonzero", Vec::new(), BTreeMap::new())
        .expect_err("nonzero needs data");
    match err {
        TraceError::Unsupported { reason } => {
            assert_eq!(reason, "dynamic shape operator: aten.nonzero.default")
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn disabled_propagation_only_specializes_supplied_values() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default().with_dynamic_propagation(false));
    let x = input(&mut tx, "x", CpuTensor::zeros(&[4, 2], DType::F64));
    let x_tensor = tensor(&x);
    assert_eq!(x_tensor.size(), Some(&[4, 2][..]));
    assert_eq!(x_tensor.properties().map(|p| p.dtype), Some(DType::F64));
    assert!(tx.output.example_value(x_tensor.proxy())?.is_none());

    let node = tx
        .output
        .create_proxy(Target::function("relu"), vec![x.as_proxy()?], BTreeMap::new())?;
    let out = TensorVariable::create(&mut tx, node, None, VariableOptions::new())?;
    assert!(tensor(&out).properties().is_none());
    Ok(())
}

#[test]
fn placeholder_target_cannot_be_executed() {
    let mut tx = trace(TraceConfig::default());
    let node = tx.output.add_graph_input("x", Source::local("x"));
    let err = TensorVariable::create(&mut tx, node, None, VariableOptions::new())
        .expect_err("placeholders have no implementation");
    assert!(matches!(err, TraceError::Internal(_)));
}

#[test]
fn unsupported_library_operation_breaks_the_graph() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2], DType::F32));
    let node = tx.output.create_proxy(
        Target::function("fft"),
        vec![x.as_proxy()?],
        BTreeMap::new(),
    )?;
    let err = TensorVariable::create(&mut tx, node, None, VariableOptions::new())
        .expect_err("unknown function");
    assert!(err.is_graph_break());
    Ok(())
}
