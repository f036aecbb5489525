mod common;

use std::collections::BTreeMap;

use symtrace::variables::ContainerKind;
use symtrace::{
    Argument, Builtin, ConstValue, DType, ExampleValue, Number, PythonClass, Target, TensorKind,
    TensorLike, TensorVariable, TraceConfig, TraceError, VariableOptions,
};
use symtrace_ref_cpu::CpuTensor;

use common::{eager, input, int, tensor, trace};

fn builtin(
    tx: &mut symtrace::TraceContext<symtrace_ref_cpu::CpuLibrary>,
    builtin: Builtin,
    args: Vec<Argument>,
) -> symtrace::TraceResult<common::Var> {
    let node = tx
        .output
        .create_proxy(Target::Builtin(builtin), args, BTreeMap::new())?;
    TensorVariable::create(tx, node, None, VariableOptions::new())
}

#[test]
fn item_is_refused_without_scalar_capture() {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::full(&[1], 2.5, DType::F32));
    let nodes = tx.output.nodes().len();

    let err = tensor(&x)
        .call_method(&mut tx, "item", Vec::new(), BTreeMap::new())
        .expect_err("item breaks the graph");
    assert_eq!(err.to_string(), "unsupported operator: Tensor.item");
    assert_eq!(tx.output.nodes().len(), nodes);
}

#[test]
fn eager_item_keeps_its_raw_value() -> anyhow::Result<()> {
    let mut tx = trace(eager().with_capture_scalar_outputs(true));
    let x = input(&mut tx, "x", CpuTensor::full(&[1], 2.5, DType::F32));

    let item = tensor(&x).call_method(&mut tx, "item", Vec::new(), BTreeMap::new())?;
    let item = tensor(&item);
    assert_eq!(
        item.kind(),
        &TensorKind::UnspecializedPython {
            raw_value: Some(Number::Float(2.5)),
            need_unwrap: false,
        }
    );
    assert_eq!(item.raw_value(), Some(Number::Float(2.5)));
    assert_eq!(item.size(), Some(&[][..]));
    assert_eq!(tx.output.node(item.proxy())?.target, Target::method("item"));
    Ok(())
}

#[test]
fn placeholder_item_is_opaque() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default().with_capture_scalar_outputs(true));
    let x = input(&mut tx, "x", CpuTensor::full(&[1], 2.5, DType::F32));

    let item = tensor(&x).call_method(&mut tx, "item", Vec::new(), BTreeMap::new())?;
    let item = tensor(&item);
    assert_eq!(item.kind(), &TensorKind::FakeItem { need_unwrap: false });
    assert_eq!(item.raw_value(), None);

    let example = tx
        .output
        .example_value(item.proxy())?
        .and_then(ExampleValue::as_tensor)
        .expect("scalar tensor attached");
    assert!(example.is_placeholder());
    assert_eq!(example.ndim(), 0);
    Ok(())
}

#[test]
fn methods_on_unspecialized_scalars_stay_unspecialized() -> anyhow::Result<()> {
    let mut tx = trace(eager().with_capture_scalar_outputs(true));
    let x = input(&mut tx, "x", CpuTensor::full(&[1], 4.0, DType::F32));
    let item = tensor(&x).call_method(&mut tx, "item", Vec::new(), BTreeMap::new())?;

    let sum = tensor(&item).call_method(&mut tx, "add", vec![int(1)], BTreeMap::new())?;
    assert_eq!(
        tensor(&sum).kind(),
        &TensorKind::UnspecializedPython {
            raw_value: None,
            need_unwrap: true,
        }
    );
    Ok(())
}

#[test]
fn scalar_math_is_captured_as_unspecialized_python() -> anyhow::Result<()> {
    let mut tx = trace(eager().with_capture_scalar_outputs(true));
    let root = builtin(
        &mut tx,
        Builtin::MathSqrt,
        vec![Argument::Const(ConstValue::Float(16.0))],
    )?;
    assert_eq!(tensor(&root).raw_value(), Some(Number::Float(4.0)));
    Ok(())
}

#[test]
fn dynamic_sizes_become_symbolic_ints() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default().with_dynamic_shapes(true));
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2, 3], DType::F32));
    assert!(tensor(&x).size().is_none());

    let size = tensor(&x).call_method(&mut tx, "size", Vec::new(), BTreeMap::new())?;
    let size = size.as_container().expect("size container");
    assert_eq!(size.kind, ContainerKind::Size);
    let size_node = size.proxy.expect("size keeps its node");
    assert_eq!(
        tx.output.example_value(size_node)?,
        Some(&ExampleValue::Size(vec![2, 3]))
    );

    for (item, extent) in size.items.iter().zip([2, 3]) {
        let dim = tensor(item);
        assert_eq!(
            dim.kind(),
            &TensorKind::DynamicShape {
                python_type: PythonClass::Int
            }
        );
        assert_eq!(
            tx.output.example_value(dim.proxy())?,
            Some(&ExampleValue::Int(extent))
        );
    }
    Ok(())
}

#[test]
fn static_sizes_fold_without_recording() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2, 3], DType::F32));
    let nodes = tx.output.nodes().len();

    let size = tensor(&x).call_method(&mut tx, "size", Vec::new(), BTreeMap::new())?;
    assert_eq!(
        size.as_python_constant()?,
        ConstValue::Tuple(vec![ConstValue::Int(2), ConstValue::Int(3)])
    );
    assert_eq!(tx.output.nodes().len(), nodes);
    Ok(())
}

#[test]
fn recorded_size_node_is_specialized_without_dynamic_shapes() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[5], DType::F32));
    let node = tx.output.create_proxy(
        Target::method("size"),
        vec![x.as_proxy()?],
        BTreeMap::new(),
    )?;
    let size = TensorVariable::create(&mut tx, node, None, VariableOptions::new())?;
    assert_eq!(
        size.as_python_constant()?,
        ConstValue::Tuple(vec![ConstValue::Int(5)])
    );
    assert!(tx.output.example_value(node)?.is_some());
    Ok(())
}

#[test]
fn nondeterministic_sources_stay_symbolic() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());

    let seed = builtin(&mut tx, Builtin::Seed, Vec::new())?;
    assert_eq!(
        tensor(&seed).kind(),
        &TensorKind::DynamicShape {
            python_type: PythonClass::Int
        }
    );

    let rem = builtin(
        &mut tx,
        Builtin::Mod,
        vec![
            Argument::Const(ConstValue::Int(7)),
            Argument::Const(ConstValue::Int(-3)),
        ],
    )?;
    let rem = tensor(&rem);
    assert_eq!(
        tx.output.example_value(rem.proxy())?,
        Some(&ExampleValue::Int(-2))
    );

    let rank = builtin(&mut tx, Builtin::GetRank, Vec::new())?;
    assert!(matches!(
        tensor(&rank).kind(),
        TensorKind::DynamicShape { .. }
    ));
    Ok(())
}

#[test]
fn other_integers_fall_through_to_an_internal_error() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[4], DType::F32));
    let err = builtin(&mut tx, Builtin::Len, vec![x.as_proxy()?]).expect_err("len is not allowed");
    match err {
        TraceError::Internal(message) => {
            assert_eq!(
                message,
                "torch.* op returned non-Tensor int call_function builtins.len"
            )
        }
        other => panic!("unexpected error {other:?}"),
    }
    Ok(())
}

#[test]
fn manual_seed_yields_none_without_example() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let none = builtin(
        &mut tx,
        Builtin::ManualSeed,
        vec![Argument::Const(ConstValue::Int(3))],
    )?;
    assert_eq!(none.as_constant(), Some(&ConstValue::None));
    let node = tx.output.nodes().last().map(|n| n.id).expect("node recorded");
    assert!(tx.output.example_value(node)?.is_none());
    Ok(())
}

#[test]
fn element_size_is_a_constant() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let bytes = builtin(
        &mut tx,
        Builtin::ElementSize,
        vec![Argument::Const(ConstValue::Dtype(DType::F16))],
    )?;
    assert_eq!(bytes.as_constant(), Some(&ConstValue::Int(2)));
    Ok(())
}

#[test]
fn nodes_are_classified_once() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let x = input(&mut tx, "x", CpuTensor::zeros(&[2], DType::F32));
    let again = TensorVariable::create(
        &mut tx,
        tensor(&x).proxy(),
        Some(ExampleValue::Tensor(CpuTensor::zeros(&[2], DType::F32))),
        VariableOptions::new(),
    );
    assert!(matches!(again, Err(TraceError::Internal(_))));
    Ok(())
}

#[test]
fn parameters_keep_their_class_and_original_value() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let weight = CpuTensor::full(&[3, 3], 0.5, DType::F32).into_parameter();
    let w = input(&mut tx, "w", weight);
    let w = tensor(&w);

    assert_eq!(w.python_type(), PythonClass::Parameter);
    assert!(w.parameter_value().and_then(CpuTensor::values).is_some());
    assert!(w.properties().map_or(false, |p| p.requires_grad));
    assert!(w.call_isinstance(&[PythonClass::Tensor]));
    Ok(())
}
