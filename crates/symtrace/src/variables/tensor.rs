use std::collections::BTreeMap;

use crate::classify;
use crate::context::TraceContext;
use crate::error::{unimplemented, TraceError, TraceResult};
use crate::graph::{Argument, Builtin, NodeId, Target};
use crate::guards::GuardKind;
use crate::library::{ModuleHandle, TensorLibrary, TensorLike};
use crate::tensor::{
    ConstValue, DType, Device, Dims, ExampleValue, MemoryFormat, Number, PythonClass,
};

use super::{
    ContainerKind, ContainerVariable, TorchObject, TorchVariable, VariableOptions, VariableTracker,
};

/// Size, stride, and contiguity of a tensor whose shape was specialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticLayout {
    pub size: Dims,
    pub stride: Dims,
    pub is_contiguous: bool,
}

/// Metadata extracted once from a representative tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorProperties {
    pub dtype: DType,
    pub device: Device,
    pub ndim: usize,
    pub requires_grad: bool,
    pub is_quantized: bool,
    pub is_sparse: bool,
    pub class_type: PythonClass,
    /// Absent when shapes are traced dynamically.
    pub layout: Option<StaticLayout>,
}

/// Which member of the tensor family a [`TensorVariable`] is.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorKind {
    Plain,
    /// Symbolic int, bool, or float, e.g. the result of `x.size(0)`.
    DynamicShape { python_type: PythonClass },
    /// One-element tensor standing in for a numpy scalar.
    UnspecializedNumpy { raw_value: Option<Number> },
    /// One-element tensor standing in for a Python scalar.
    UnspecializedPython {
        raw_value: Option<Number>,
        need_unwrap: bool,
    },
    /// Result of `.item()` under placeholder execution. There is no raw value to read.
    FakeItem { need_unwrap: bool },
}

impl TensorKind {
    pub fn name(&self) -> &'static str {
        match self {
            TensorKind::Plain => "TensorVariable",
            TensorKind::DynamicShape { .. } => "DynamicShapeVariable",
            TensorKind::UnspecializedNumpy { .. } => "UnspecializedNumpyVariable",
            TensorKind::UnspecializedPython { .. } => "UnspecializedPythonVariable",
            TensorKind::FakeItem { .. } => "FakeItemVariable",
        }
    }

    /// Kind given to the result of a method called on a value of this kind.
    ///
    /// Raw scalars never carry over, since the result is a different value.
    pub fn for_derived_value(&self) -> TensorKind {
        match self {
            TensorKind::Plain | TensorKind::DynamicShape { .. } => TensorKind::Plain,
            TensorKind::UnspecializedNumpy { .. } => {
                TensorKind::UnspecializedNumpy { raw_value: None }
            }
            TensorKind::UnspecializedPython { .. } => TensorKind::UnspecializedPython {
                raw_value: None,
                need_unwrap: true,
            },
            TensorKind::FakeItem { .. } => TensorKind::FakeItem { need_unwrap: false },
        }
    }

    pub fn is_unspecialized(&self) -> bool {
        matches!(
            self,
            TensorKind::UnspecializedNumpy { .. } | TensorKind::UnspecializedPython { .. }
        )
    }
}

/// A tensor graph input or an intermediate tensor value in the captured graph.
#[derive(Debug, Clone)]
pub struct TensorVariable<T: TensorLike> {
    pub(crate) proxy: NodeId,
    pub(crate) properties: Option<TensorProperties>,
    pub(crate) parameter_value: Option<T>,
    pub(crate) kind: TensorKind,
    pub options: VariableOptions,
}

impl<T: TensorLike> TensorVariable<T> {
    pub fn new(
        proxy: NodeId,
        properties: Option<TensorProperties>,
        kind: TensorKind,
        options: VariableOptions,
    ) -> Self {
        TensorVariable {
            proxy,
            properties,
            parameter_value: None,
            kind,
            options,
        }
    }

    pub(crate) fn with_parameter_value(mut self, value: Option<T>) -> Self {
        self.parameter_value = value;
        self
    }

    /// Obtains the example value of `proxy` and classifies it.
    ///
    /// `example` is used as-is when given; otherwise the node is executed against its
    /// operands' example values.
    pub fn create<B>(
        tx: &mut TraceContext<B>,
        proxy: NodeId,
        example: Option<ExampleValue<T>>,
        options: VariableOptions,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        classify::create(tx, proxy, example, None, TensorKind::Plain, options)
    }

    /// Like [`TensorVariable::create`], running `module` for a `call_module` node.
    pub fn create_with_module<B>(
        tx: &mut TraceContext<B>,
        proxy: NodeId,
        module: ModuleHandle<T>,
        options: VariableOptions,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        classify::create(tx, proxy, None, Some(module), TensorKind::Plain, options)
    }

    /// Like [`TensorVariable::create`], building a tensor result of `kind`.
    pub fn create_of_kind<B>(
        tx: &mut TraceContext<B>,
        proxy: NodeId,
        example: Option<ExampleValue<T>>,
        kind: TensorKind,
        options: VariableOptions,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        classify::create(tx, proxy, example, None, kind, options)
    }

    pub fn proxy(&self) -> NodeId {
        self.proxy
    }

    pub fn kind(&self) -> &TensorKind {
        &self.kind
    }

    pub fn properties(&self) -> Option<&TensorProperties> {
        self.properties.as_ref()
    }

    pub fn layout(&self) -> Option<&StaticLayout> {
        self.properties.as_ref().and_then(|props| props.layout.as_ref())
    }

    pub fn size(&self) -> Option<&[usize]> {
        self.layout().map(|layout| layout.size.as_slice())
    }

    pub fn stride(&self) -> Option<&[usize]> {
        self.layout().map(|layout| layout.stride.as_slice())
    }

    /// The originally supplied tensor when this value is a module parameter.
    pub fn parameter_value(&self) -> Option<&T> {
        self.parameter_value.as_ref()
    }

    /// Raw scalar of an unspecialized value, when one was recorded.
    pub fn raw_value(&self) -> Option<Number> {
        match &self.kind {
            TensorKind::UnspecializedNumpy { raw_value }
            | TensorKind::UnspecializedPython { raw_value, .. } => *raw_value,
            _ => None,
        }
    }

    pub fn need_unwrap(&self) -> bool {
        match &self.kind {
            TensorKind::UnspecializedPython { need_unwrap, .. }
            | TensorKind::FakeItem { need_unwrap } => *need_unwrap,
            _ => false,
        }
    }

    /// `type(x)` as user code would observe it.
    pub fn python_type(&self) -> PythonClass {
        match &self.kind {
            TensorKind::DynamicShape { python_type } => python_type.clone(),
            _ => self
                .properties
                .as_ref()
                .map(|props| props.class_type.clone())
                .unwrap_or(PythonClass::Tensor),
        }
    }

    /// `isinstance(x, types)`. Legacy typed classes are answered by dtype.
    pub fn call_isinstance(&self, types: &[PythonClass]) -> bool {
        let dtype = self.properties.as_ref().map(|props| props.dtype);
        types.iter().any(|ty| match ty {
            PythonClass::Legacy(legacy) => dtype.map_or(false, |d| legacy.dtypes().contains(&d)),
            other => self.python_type().is_subclass_of(other),
        })
    }

    pub fn into_unspecialized_python(self, raw_value: Option<Number>, need_unwrap: bool) -> Self {
        TensorVariable {
            kind: TensorKind::UnspecializedPython {
                raw_value,
                need_unwrap,
            },
            ..self
        }
    }

    pub fn into_unspecialized_numpy(self, raw_value: Option<Number>) -> Self {
        TensorVariable {
            kind: TensorKind::UnspecializedNumpy { raw_value },
            ..self
        }
    }

    pub fn into_fake_item(self, need_unwrap: bool) -> Self {
        TensorVariable {
            kind: TensorKind::FakeItem { need_unwrap },
            ..self
        }
    }

    fn propagated(&self) -> VariableOptions {
        VariableOptions::new().with_guards(&self.options.guards)
    }

    fn as_variable(&self) -> VariableTracker<T> {
        VariableTracker::Tensor(self.clone())
    }

    /// Resolves `self.name`.
    pub fn var_getattr<B>(
        &self,
        tx: &mut TraceContext<B>,
        name: &str,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        let options = self.propagated();
        if name == "__class__" {
            return Ok(VariableTracker::Torch(TorchVariable::new(
                TorchObject::Class(self.python_type()),
                options,
            )));
        }

        let props = self.properties.as_ref();
        let layout = self.layout();
        let constant = |value: ConstValue| Some(VariableTracker::constant(value, options.clone()));
        let result = match (name, props) {
            ("ndim", Some(props)) => constant(ConstValue::Int(props.ndim as i64)),
            ("dtype", Some(props)) => Some(VariableTracker::Torch(TorchVariable::new(
                TorchObject::Dtype(props.dtype),
                options.clone(),
            ))),
            ("device", Some(props)) => Some(VariableTracker::Torch(TorchVariable::new(
                TorchObject::Device(props.device),
                options.clone(),
            ))),
            ("is_cuda", Some(props)) => constant(ConstValue::Bool(props.device.is_cuda())),
            ("shape", _) => match layout {
                Some(layout) => Some(VariableTracker::Container(ContainerVariable::static_size(
                    ContainerKind::Shape,
                    &layout.size,
                    options.clone(),
                ))),
                None => Some(self.call_method(tx, "size", Vec::new(), BTreeMap::new())?),
            },
            ("requires_grad", Some(props)) => constant(ConstValue::Bool(props.requires_grad)),
            ("is_quantized", Some(props)) => constant(ConstValue::Bool(props.is_quantized)),
            ("is_sparse", Some(props)) => constant(ConstValue::Bool(props.is_sparse)),
            ("ndim", None) => Some(self.call_method(tx, "dim", Vec::new(), BTreeMap::new())?),
            _ => None,
        };

        let Some(mut result) = result else {
            return Err(TraceError::not_implemented(format!("Tensor.{name}")));
        };
        // Checked ahead of the tensor guards, so `x.attr` never runs against a non-tensor `x`.
        if let Some(guard) = self.options.make_guard(GuardKind::TypeMatch) {
            result = result.add_guard(guard);
        }
        Ok(result)
    }

    /// Traces `self.name(*args, **kwargs)`.
    pub fn call_method<B>(
        &self,
        tx: &mut TraceContext<B>,
        name: &str,
        args: Vec<VariableTracker<T>>,
        mut kwargs: BTreeMap<String, VariableTracker<T>>,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        let this = self.as_variable();
        let options = VariableOptions::propagate(
            std::iter::once(&this)
                .chain(args.iter())
                .chain(kwargs.values()),
        );
        let dynamic_shapes = tx.config().dynamic_shapes;
        let layout = self.layout();
        let props = self.properties.as_ref();

        let constant_result = match name {
            "stride" => layout.map(|layout| {
                VariableTracker::constant(int_tuple(&layout.stride), options.clone())
            }),
            "size" => layout.map(|layout| {
                VariableTracker::Container(ContainerVariable::static_size(
                    ContainerKind::Size,
                    &layout.size,
                    options.clone(),
                ))
            }),
            "numel" => layout.map(|layout| {
                let numel: usize = layout.size.iter().product();
                VariableTracker::constant(ConstValue::Int(numel as i64), options.clone())
            }),
            "ndimension" | "dim" => props.map(|props| {
                VariableTracker::constant(ConstValue::Int(props.ndim as i64), options.clone())
            }),
            "is_floating_point" => props.map(|props| {
                VariableTracker::constant(
                    ConstValue::Bool(props.dtype.is_floating_point()),
                    options.clone(),
                )
            }),
            "is_contiguous" => match layout {
                Some(layout) => {
                    let contiguous_format = kwargs
                        .get("memory_format")
                        .and_then(|format| format.as_python_constant().ok())
                        == Some(ConstValue::MemoryFormat(MemoryFormat::Contiguous));
                    if contiguous_format {
                        kwargs.remove("memory_format");
                    }
                    Some(VariableTracker::constant(
                        ConstValue::Bool(layout.is_contiguous),
                        options.clone(),
                    ))
                }
                None => None,
            },
            _ => None,
        };

        if let Some(constant_result) = constant_result {
            if !kwargs.is_empty() {
                return Err(TraceError::internal(format!(
                    "Tensor.{name}() unhandled kwargs"
                )));
            }
            return match args.as_slice() {
                [] => Ok(constant_result),
                [index] => constant_result.getitem_const(index),
                indices => {
                    let items = indices
                        .iter()
                        .map(|index| constant_result.getitem_const(index))
                        .collect::<TraceResult<Vec<_>>>()?;
                    Ok(VariableTracker::Container(ContainerVariable::tuple(
                        items, options,
                    )))
                }
            };
        }

        match name {
            "repeat"
                if !dynamic_shapes
                    && !args
                        .iter()
                        .chain(kwargs.values())
                        .all(VariableTracker::is_python_constant) =>
            {
                unimplemented("dynamic Tensor.repeat")
            }
            "tolist" | "numpy" | "backward" => unimplemented(format!("Tensor.{name}")),
            "nonzero" if !dynamic_shapes => unimplemented(format!("Tensor.{name}")),
            "item" => {
                if !tx.config().capture_scalar_outputs {
                    return unimplemented("Tensor.item");
                }
                let proxy = tx.output.create_proxy(
                    Target::method("item"),
                    vec![Argument::Node(self.proxy)],
                    BTreeMap::new(),
                )?;
                self.create_derived(tx, proxy, options)
            }
            "__len__" => match self.size() {
                Some(&[first, ..]) => Ok(VariableTracker::constant(
                    ConstValue::Int(first as i64),
                    options,
                )),
                _ => {
                    let proxy = tx.output.create_proxy(
                        Target::Builtin(Builtin::Len),
                        vec![Argument::Node(self.proxy)],
                        BTreeMap::new(),
                    )?;
                    self.create_derived(tx, proxy, options)
                }
            },
            "__setitem__" => {
                tx.output.guards.extend(&options.guards);
                let (args, kwargs) = proxy_args_kwargs(&this, &args, &kwargs)?;
                tx.output
                    .create_proxy(Target::Builtin(Builtin::SetItem), args, kwargs)?;
                Ok(VariableTracker::constant(ConstValue::None, options))
            }
            _ => {
                // `Tensor.new` treats a size differently from a tuple of ints.
                let rewrites_to_new_empty = name == "new"
                    && !dynamic_shapes
                    && matches!(
                        args.as_slice(),
                        [VariableTracker::Container(size)] if size.kind.is_size()
                    );
                let method = if rewrites_to_new_empty { "new_empty" } else { name };
                let (args, kwargs) = proxy_args_kwargs(&this, &args, &kwargs)?;
                let proxy = tx.output.create_proxy(Target::method(method), args, kwargs)?;
                self.create_derived(tx, proxy, options)
            }
        }
    }

    /// Elements of `self` along its first dimension, one `getitem` node each.
    pub fn unpack_var_sequence<B>(
        &self,
        tx: &mut TraceContext<B>,
    ) -> TraceResult<Vec<VariableTracker<T>>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        if matches!(self.kind, TensorKind::DynamicShape { .. }) {
            return Err(TraceError::not_implemented(format!(
                "unpack {}",
                self.kind.name()
            )));
        }
        let Some(&[first, ..]) = self.size() else {
            return Err(TraceError::not_implemented("unpack tensor of unknown size"));
        };
        (0..first)
            .map(|index| {
                let proxy = tx.output.getitem_proxy(self.proxy, index)?;
                TensorVariable::create(tx, proxy, None, self.propagated())
            })
            .collect()
    }

    fn create_derived<B>(
        &self,
        tx: &mut TraceContext<B>,
        proxy: NodeId,
        options: VariableOptions,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        classify::create(tx, proxy, None, None, self.kind.for_derived_value(), options)
    }
}

fn int_tuple(values: &[usize]) -> ConstValue {
    ConstValue::Tuple(values.iter().map(|&v| ConstValue::Int(v as i64)).collect())
}

fn proxy_args_kwargs<T: TensorLike>(
    this: &VariableTracker<T>,
    args: &[VariableTracker<T>],
    kwargs: &BTreeMap<String, VariableTracker<T>>,
) -> TraceResult<(Vec<Argument>, BTreeMap<String, Argument>)> {
    let args = std::iter::once(this)
        .chain(args.iter())
        .map(VariableTracker::as_proxy)
        .collect::<TraceResult<Vec<_>>>()?;
    let kwargs = kwargs
        .iter()
        .map(|(key, value)| Ok((key.clone(), value.as_proxy()?)))
        .collect::<TraceResult<BTreeMap<_, _>>>()?;
    Ok((args, kwargs))
}
