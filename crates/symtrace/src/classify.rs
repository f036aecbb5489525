//! Maps a node's representative value onto a symbolic variable.
//!
//! Classification is an ordered table of rules; the first rule whose predicate accepts the
//! value builds the variable. A rule that keeps the value attaches it to the node, so later
//! nodes can resolve it as an operand. Containers and scalar captures recurse through
//! [`create`] on freshly recorded `getitem` nodes or on the same node.

use crate::context::TraceContext;
use crate::engine;
use crate::error::{TraceError, TraceResult};
use crate::graph::{Builtin, NodeId, Target};
use crate::library::{ModuleHandle, TensorLibrary, TensorLike};
use crate::logging::GRAPH_TARGET;
use crate::specialize::specialize;
use crate::tensor::{ConstValue, ExampleValue, PythonClass};
use crate::variables::{
    ConstantVariable, ContainerKind, ContainerVariable, TensorKind, TensorVariable,
    VariableOptions, VariableTracker,
};

type Var<B> = VariableTracker<<B as TensorLibrary>::Tensor>;

/// Everything a rule needs to decide on and build a variable.
pub(crate) struct ClassifyInput<T: TensorLike> {
    proxy: NodeId,
    target: Target,
    example: ExampleValue<T>,
    /// Tensor supplied by the caller before any placeholder conversion.
    supplied_tensor: Option<T>,
    kind: TensorKind,
    options: VariableOptions,
}

type Predicate<B> = fn(&TraceContext<B>, &ClassifyInput<<B as TensorLibrary>::Tensor>) -> bool;
type Builder<B> =
    fn(&mut TraceContext<B>, ClassifyInput<<B as TensorLibrary>::Tensor>) -> TraceResult<Var<B>>;

struct Rule<B: TensorLibrary> {
    name: &'static str,
    matches: Predicate<B>,
    build: Builder<B>,
}

fn rules<B: TensorLibrary>() -> [Rule<B>; 9] {
    [
        Rule {
            name: "tensor",
            matches: is_tensor,
            build: build_tensor,
        },
        Rule {
            name: "dynamic_scalar",
            matches: is_dynamic_scalar,
            build: build_dynamic_scalar,
        },
        Rule {
            name: "dynamic_size",
            matches: is_dynamic_size,
            build: build_dynamic_size,
        },
        Rule {
            name: "nondeterministic_int",
            matches: is_nondeterministic_int,
            build: build_dynamic_scalar,
        },
        Rule {
            name: "static_size",
            matches: is_static_size,
            build: build_static_size,
        },
        Rule {
            name: "sequence",
            matches: is_sequence,
            build: build_sequence,
        },
        Rule {
            name: "none_or_manual_seed",
            matches: is_none_or_manual_seed,
            build: build_none,
        },
        Rule {
            name: "element_size",
            matches: is_element_size,
            build: build_element_size,
        },
        Rule {
            name: "scalar_output",
            matches: is_scalar_output,
            build: build_scalar_output,
        },
    ]
}

/// Produces the example value of `proxy` and classifies it.
///
/// The guards in `options` join the output graph's cumulative set and are carried by every
/// variable built here. `kind` selects the tensor variant built for tensor results.
pub(crate) fn create<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    proxy: NodeId,
    example: Option<ExampleValue<B::Tensor>>,
    module: Option<ModuleHandle<B::Tensor>>,
    kind: TensorKind,
    options: VariableOptions,
) -> TraceResult<Var<B>> {
    tx.output.guards.extend(&options.guards);
    if tx.output.node(proxy)?.meta.has_example_value() {
        return Err(TraceError::internal(format!(
            "node {proxy} was already classified"
        )));
    }

    if !tx.config().dynamic_propagation {
        let properties = example
            .as_ref()
            .and_then(ExampleValue::as_tensor)
            .map(|tensor| specialize(tensor, tx.config()));
        return Ok(VariableTracker::Tensor(TensorVariable::new(
            proxy, properties, kind, options,
        )));
    }

    let supplied_tensor = example.as_ref().and_then(ExampleValue::as_tensor).cloned();
    let example = engine::get_example_value(tx, proxy, example, module)?;
    let target = tx.output.node(proxy)?.target.clone();
    let input = ClassifyInput {
        proxy,
        target,
        example,
        supplied_tensor,
        kind,
        options,
    };

    for rule in rules::<B>() {
        if (rule.matches)(tx, &input) {
            log::trace!(target: GRAPH_TARGET, "{proxy} classified as {}", rule.name);
            return (rule.build)(tx, input);
        }
    }

    Err(TraceError::internal(format!(
        "torch.* op returned non-Tensor {} {} {}",
        input.example.type_name(),
        input.target.op().as_str(),
        input.target
    )))
}

fn is_tensor<B: TensorLibrary>(_: &TraceContext<B>, input: &ClassifyInput<B::Tensor>) -> bool {
    matches!(input.example, ExampleValue::Tensor(_))
}

fn build_tensor<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let ClassifyInput {
        proxy,
        example,
        supplied_tensor,
        kind,
        options,
        ..
    } = input;
    let tensor = example
        .into_tensor()
        .ok_or_else(|| TraceError::internal("tensor rule applied to a non-tensor"))?;

    let is_parameter = tensor.python_class() == PythonClass::Parameter;
    let parameter_value = if is_parameter { supplied_tensor } else { None };
    // Placeholders are never aliased by the library; anything else is copied so later
    // in-place updates by the user program do not leak into the captured metadata.
    let opaque = tx.config().fake_tensor_propagation && tensor.is_placeholder();
    let tensor = if opaque {
        tensor
    } else {
        tensor.clone_preserving_strides()
    };

    let mut properties = specialize(&tensor, tx.config());
    if opaque {
        properties.class_type = if is_parameter {
            PythonClass::Parameter
        } else {
            PythonClass::Tensor
        };
    }
    tx.output
        .set_example_value(proxy, ExampleValue::Tensor(tensor))?;

    Ok(VariableTracker::Tensor(
        TensorVariable::new(proxy, Some(properties), kind, options)
            .with_parameter_value(parameter_value),
    ))
}

fn is_dynamic_scalar<B: TensorLibrary>(
    tx: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    tx.config().dynamic_shapes && input.example.as_number().is_some()
}

fn build_dynamic_scalar<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let number = input
        .example
        .as_number()
        .ok_or_else(|| TraceError::internal("dynamic scalar rule applied to a non-number"))?;
    tx.output.set_example_value(input.proxy, input.example)?;
    Ok(dynamic_shape(input.proxy, number.python_type(), input.options))
}

fn dynamic_shape<T: TensorLike>(
    proxy: NodeId,
    python_type: PythonClass,
    options: VariableOptions,
) -> VariableTracker<T> {
    VariableTracker::Tensor(TensorVariable::new(
        proxy,
        None,
        TensorKind::DynamicShape { python_type },
        options,
    ))
}

fn is_dynamic_size<B: TensorLibrary>(
    tx: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    tx.config().dynamic_shapes && matches!(input.example, ExampleValue::Size(_))
}

fn build_dynamic_size<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let ExampleValue::Size(dims) = &input.example else {
        return Err(TraceError::internal("size rule applied to a non-size"));
    };
    let dims = dims.clone();
    tx.output.set_example_value(input.proxy, input.example)?;

    let mut sizes = Vec::with_capacity(dims.len());
    for (index, dim) in dims.into_iter().enumerate() {
        let item = tx.output.getitem_proxy(input.proxy, index)?;
        let dim = i64::try_from(dim)
            .map_err(|_| TraceError::internal(format!("extent {dim} overflows i64")))?;
        tx.output.set_example_value(item, ExampleValue::Int(dim))?;
        sizes.push(dynamic_shape(item, PythonClass::Int, VariableOptions::new()));
    }
    Ok(VariableTracker::Container(
        ContainerVariable::new(ContainerKind::Size, sizes, input.options).with_proxy(input.proxy),
    ))
}

fn is_nondeterministic_int<B: TensorLibrary>(
    _: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    matches!(input.example, ExampleValue::Int(_))
        && input
            .target
            .builtin()
            .map_or(false, Builtin::is_nondeterministic_source)
}

fn is_static_size<B: TensorLibrary>(_: &TraceContext<B>, input: &ClassifyInput<B::Tensor>) -> bool {
    matches!(input.example, ExampleValue::Size(_))
}

fn build_static_size<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let ExampleValue::Size(dims) = &input.example else {
        return Err(TraceError::internal("size rule applied to a non-size"));
    };
    let size = ContainerVariable::static_size(ContainerKind::Size, dims, input.options);
    tx.output.set_example_value(input.proxy, input.example)?;
    Ok(VariableTracker::Container(size))
}

fn is_sequence<B: TensorLibrary>(_: &TraceContext<B>, input: &ClassifyInput<B::Tensor>) -> bool {
    matches!(
        input.example,
        ExampleValue::Tuple(_) | ExampleValue::List(_) | ExampleValue::NamedTuple(..)
    )
}

fn build_sequence<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let ClassifyInput {
        proxy,
        example,
        kind,
        options,
        ..
    } = input;
    let (container_kind, elements) = match &example {
        ExampleValue::Tuple(items) => (ContainerKind::Tuple, items.clone()),
        ExampleValue::List(items) => (ContainerKind::List, items.clone()),
        ExampleValue::NamedTuple(ty, items) => (ContainerKind::NamedTuple(ty.clone()), items.clone()),
        other => {
            return Err(TraceError::internal(format!(
                "sequence rule applied to {}",
                other.type_name()
            )))
        }
    };
    tx.output.set_example_value(proxy, example)?;

    let mut unpacked = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        // Modules such as multi-head attention may return None in an output slot.
        if element.is_none() {
            unpacked.push(VariableTracker::Constant(ConstantVariable::none(
                options.clone(),
            )));
            continue;
        }
        let item = tx.output.getitem_proxy(proxy, index)?;
        unpacked.push(create(
            tx,
            item,
            Some(element),
            None,
            kind.clone(),
            options.clone(),
        )?);
    }

    let mut options = options;
    if container_kind == ContainerKind::List {
        options.mutable_local = Some(tx.output.new_mutable_local());
    }
    Ok(VariableTracker::Container(ContainerVariable::new(
        container_kind,
        unpacked,
        options,
    )))
}

fn is_none_or_manual_seed<B: TensorLibrary>(
    _: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    input.example.is_none() || input.target.builtin() == Some(Builtin::ManualSeed)
}

fn build_none<B: TensorLibrary>(
    _: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    Ok(VariableTracker::Constant(ConstantVariable::none(
        input.options,
    )))
}

fn is_element_size<B: TensorLibrary>(
    _: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    matches!(input.example, ExampleValue::Int(_) | ExampleValue::Bool(_))
        && input.target.builtin() == Some(Builtin::ElementSize)
}

fn build_element_size<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let value: ConstValue = input
        .example
        .as_number()
        .ok_or_else(|| TraceError::internal("element size rule applied to a non-number"))?
        .into();
    tx.output.set_example_value(input.proxy, input.example)?;
    Ok(VariableTracker::constant(value, input.options))
}

fn is_scalar_output<B: TensorLibrary>(
    tx: &TraceContext<B>,
    input: &ClassifyInput<B::Tensor>,
) -> bool {
    let scalar_target = input.target.is_method("item")
        || input.target.builtin().map_or(false, Builtin::is_scalar_math);
    input.example.as_number().is_some() && scalar_target && tx.config().capture_scalar_outputs
}

fn build_scalar_output<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    input: ClassifyInput<B::Tensor>,
) -> TraceResult<Var<B>> {
    let number = input
        .example
        .as_number()
        .ok_or_else(|| TraceError::internal("scalar rule applied to a non-number"))?;
    let tensor = tx.library().scalar_tensor(number);
    // A placeholder item has no trustworthy raw value.
    let kind = if tx.config().fake_tensor_propagation {
        TensorKind::FakeItem { need_unwrap: false }
    } else {
        TensorKind::UnspecializedPython {
            raw_value: Some(number),
            need_unwrap: false,
        }
    };
    create(
        tx,
        input.proxy,
        Some(ExampleValue::Tensor(tensor)),
        None,
        kind,
        input.options,
    )
}
