//! Produces the representative value of one recorded node.
//!
//! The node is run against its operands' stored example values, either eagerly or, when
//! `fake_tensor_propagation` is on, on shape-only placeholders inside the library's placeholder
//! mode. The library generator state is restored afterwards on every path, so tracing never
//! perturbs the random stream the user program observes.

use std::sync::Arc;

use crate::context::TraceContext;
use crate::error::{TraceError, TraceResult};
use crate::graph::{Argument, Node, NodeId, OutputGraph, Target};
use crate::library::{ExecError, ExecResult, ModuleHandle, TensorLibrary, TensorLike};
use crate::logging::GRAPH_TARGET;
use crate::tensor::{ExampleValue, Kwargs};

/// Restores the library generator state when dropped.
pub struct RngStateGuard<B: TensorLibrary> {
    library: Arc<B>,
    state: Option<B::RngState>,
}

impl<B: TensorLibrary> RngStateGuard<B> {
    pub fn new(library: Arc<B>) -> Self {
        let state = library.rng_state();
        RngStateGuard {
            library,
            state: Some(state),
        }
    }
}

impl<B: TensorLibrary> Drop for RngStateGuard<B> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            self.library.set_rng_state(state);
        }
    }
}

/// Keeps the library in placeholder mode until dropped.
pub struct PlaceholderModeGuard<B: TensorLibrary> {
    library: Arc<B>,
}

impl<B: TensorLibrary> PlaceholderModeGuard<B> {
    pub fn new(library: Arc<B>) -> Self {
        library.enter_placeholder_mode();
        PlaceholderModeGuard { library }
    }
}

impl<B: TensorLibrary> Drop for PlaceholderModeGuard<B> {
    fn drop(&mut self) {
        self.library.exit_placeholder_mode();
    }
}

/// How a node is run, resolved before anything executes.
enum Invocation<T: TensorLike> {
    Function(Target),
    Method(String),
    Module(ModuleHandle<T>),
}

impl<T: TensorLike> Invocation<T> {
    fn run<B>(
        &self,
        library: &B,
        args: &[ExampleValue<T>],
        kwargs: &Kwargs<T>,
    ) -> ExecResult<ExampleValue<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        match self {
            Invocation::Function(target) => library.call_function(target, args, kwargs),
            Invocation::Method(name) => match args.split_first() {
                Some((receiver, rest)) => library.call_method(name, receiver, rest, kwargs),
                None => Err(ExecError::runtime(format!("method {name} called without self"))),
            },
            Invocation::Module(module) => module.forward(args, kwargs),
        }
    }
}

/// Resolves every operand of `node` to the example value stored on its producer.
pub fn propagate_args_kwargs<T: TensorLike>(
    output: &OutputGraph<T>,
    node: &Node<T>,
) -> TraceResult<(Vec<ExampleValue<T>>, Kwargs<T>)> {
    let args = node
        .args
        .iter()
        .map(|arg| resolve_argument(output, arg))
        .collect::<TraceResult<Vec<_>>>()?;
    let kwargs = node
        .kwargs
        .iter()
        .map(|(key, arg)| Ok((key.clone(), resolve_argument(output, arg)?)))
        .collect::<TraceResult<Kwargs<T>>>()?;
    Ok((args, kwargs))
}

fn resolve_argument<T: TensorLike>(
    output: &OutputGraph<T>,
    arg: &Argument,
) -> TraceResult<ExampleValue<T>> {
    match arg {
        Argument::Node(id) => output.example_value(*id)?.cloned().ok_or_else(|| {
            TraceError::internal(format!("operand {id} has no example value"))
        }),
        Argument::Const(value) => Ok(ExampleValue::from(value)),
        Argument::Tuple(items) => items
            .iter()
            .map(|item| resolve_argument(output, item))
            .collect::<TraceResult<Vec<_>>>()
            .map(ExampleValue::Tuple),
        Argument::List(items) => items
            .iter()
            .map(|item| resolve_argument(output, item))
            .collect::<TraceResult<Vec<_>>>()
            .map(ExampleValue::List),
    }
}

fn to_placeholders<B: TensorLibrary>(
    library: &B,
    value: ExampleValue<B::Tensor>,
) -> ExampleValue<B::Tensor> {
    value.map_tensors(&mut |tensor| library.to_placeholder(&tensor))
}

/// Returns the representative output of `proxy`.
///
/// A supplied `example` is used as-is (converted to placeholders in placeholder mode).
/// Otherwise the node is executed. `module` overrides the module registered under a
/// `call_module` target.
pub fn get_example_value<B: TensorLibrary>(
    tx: &mut TraceContext<B>,
    proxy: NodeId,
    example: Option<ExampleValue<B::Tensor>>,
    module: Option<ModuleHandle<B::Tensor>>,
) -> TraceResult<ExampleValue<B::Tensor>> {
    let library = Arc::clone(tx.library());
    let use_placeholders = tx.config().fake_tensor_propagation;
    let _rng = RngStateGuard::new(Arc::clone(&library));

    if let Some(example) = example {
        return Ok(if use_placeholders {
            to_placeholders(&*library, example)
        } else {
            example
        });
    }

    let node = tx.output.node(proxy)?;
    let target = node.target.clone();
    let (mut args, mut kwargs) = propagate_args_kwargs(&tx.output, node)?;
    if use_placeholders {
        args = args
            .into_iter()
            .map(|arg| to_placeholders(&*library, arg))
            .collect();
        kwargs = kwargs
            .into_iter()
            .map(|(key, value)| (key, to_placeholders(&*library, value)))
            .collect();
    }

    let invocation = match &target {
        Target::Placeholder(name) => {
            return Err(TraceError::internal(format!(
                "placeholder {name} cannot be executed"
            )))
        }
        Target::Builtin(_) | Target::Function(_) => Invocation::Function(target.clone()),
        Target::Method(name) => Invocation::Method(name.clone()),
        Target::Module(path) => {
            let module = module.or_else(|| tx.output.module(path)).ok_or_else(|| {
                TraceError::internal(format!("no module registered under {path}"))
            })?;
            if module.is_lazy() {
                // Deferred parameters are materialized by this first call.
                log::debug!(target: GRAPH_TARGET, "initializing lazy module {}", module.name());
                if let Err(err) = module.forward(&args, &kwargs) {
                    translate_exec_error(tx, &library, &target, &args, use_placeholders, err)?;
                }
                Invocation::Module(module)
            } else if use_placeholders {
                Invocation::Module(module.to_placeholder())
            } else {
                Invocation::Module(module.deep_copy())
            }
        }
    };

    let result = {
        let _mode = use_placeholders.then(|| PlaceholderModeGuard::new(Arc::clone(&library)));
        invocation.run(&*library, &args, &kwargs)
    };

    match result {
        Ok(value) => Ok(value),
        Err(err) => translate_exec_error(tx, &library, &target, &args, use_placeholders, err),
    }
}

fn translate_exec_error<B: TensorLibrary>(
    tx: &TraceContext<B>,
    library: &B,
    target: &Target,
    args: &[ExampleValue<B::Tensor>],
    use_placeholders: bool,
    err: ExecError,
) -> TraceResult<ExampleValue<B::Tensor>> {
    match err {
        ExecError::Unsupported { reason } => Err(TraceError::Unsupported { reason }),
        ExecError::UnsupportedPlaceholder { reason } if use_placeholders => {
            Err(TraceError::unsupported(reason))
        }
        ExecError::DataDependentOutput { func } if use_placeholders => {
            if tx.config().capture_scalar_outputs && target.is_method("item") {
                let dtype = args
                    .first()
                    .and_then(ExampleValue::as_tensor)
                    .map(|tensor| tensor.dtype())
                    .ok_or_else(|| TraceError::internal("item called on a non-tensor"))?;
                Ok(ExampleValue::from(library.zero_item(dtype)))
            } else {
                Err(TraceError::unsupported(format!(
                    "data dependent operator: {func}"
                )))
            }
        }
        ExecError::DynamicOutputShape { func } if use_placeholders => Err(
            TraceError::unsupported(format!("dynamic shape operator: {func}")),
        ),
        other => Err(TraceError::Runtime {
            target: target.to_string(),
            source: other,
        }),
    }
}
