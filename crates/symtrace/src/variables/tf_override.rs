use std::collections::BTreeMap;

use crate::context::TraceContext;
use crate::error::{TraceError, TraceResult};
use crate::guards::{Guard, GuardKind};
use crate::library::{TensorLibrary, TensorLike};
use crate::source::Source;
use crate::tensor::PythonClass;

use super::{
    ConstDictVariable, ContainerVariable, GetAttrVariable, UserDefinedClassVariable, UserFunction,
    UserFunctionVariable, VariableOptions, VariableTracker,
};

/// Instance of a tensor subclass that defines `__torch_function__`.
///
/// Method calls are routed through the subclass hook instead of being recorded directly.
#[derive(Debug, Clone)]
pub struct TensorWithTfOverrideVariable<T: TensorLike> {
    /// The plain tensor the subclass wraps.
    pub tensor_variable: Box<VariableTracker<T>>,
    /// Where the original subclass instance was read from.
    pub orig_tensor_variable_source: Source,
    pub subclass_torch_function_func: UserFunction,
    pub subclass_type: PythonClass,
    pub options: VariableOptions,
}

impl<T: TensorLike> TensorWithTfOverrideVariable<T> {
    pub fn new(
        tensor_variable: VariableTracker<T>,
        orig_tensor_variable_source: Source,
        subclass_torch_function_func: UserFunction,
        subclass_type: PythonClass,
        options: VariableOptions,
    ) -> Self {
        TensorWithTfOverrideVariable {
            tensor_variable: Box::new(tensor_variable),
            orig_tensor_variable_source,
            subclass_torch_function_func,
            subclass_type,
            options,
        }
    }

    /// Traces `self.name(*args, **kwargs)` by inlining the subclass hook.
    ///
    /// With dispatch disabled on `tx` the method runs on the wrapped tensor and the result is
    /// not rewrapped.
    pub fn call_method<B>(
        &self,
        tx: &mut TraceContext<B>,
        name: &str,
        args: Vec<VariableTracker<T>>,
        kwargs: BTreeMap<String, VariableTracker<T>>,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        if !tx.torch_function_enabled() {
            let tensor = self.tensor_variable.as_tensor().ok_or_else(|| {
                TraceError::internal("tensor subclass does not wrap a tensor variable")
            })?;
            return tensor.call_method(tx, name, args, kwargs);
        }

        let this = VariableTracker::TensorWithTfOverride(self.clone());
        let options = VariableOptions::propagate(
            std::iter::once(&this)
                .chain(args.iter())
                .chain(kwargs.values()),
        );

        let unwrapped = (*self.tensor_variable).clone();
        let mut hook_args = Vec::with_capacity(args.len() + 1);
        hook_args.push(unwrapped.clone());
        hook_args.extend(args);
        let func_var = VariableTracker::GetAttr(GetAttrVariable::new(
            unwrapped,
            name,
            VariableOptions::new(),
        ));

        let result = Self::inline_torch_function_unwrapped(
            tx,
            func_var,
            &self.orig_tensor_variable_source,
            &self.subclass_torch_function_func,
            &self.subclass_type,
            options,
            hook_args,
            kwargs,
        )?;

        // TODO: skip rewrapping for methods on the default no-wrap list once attribute
        // lookups on `GetAttrVariable` can tell which method was resolved.
        let rewrapped_options = VariableOptions::new().with_guards(result.guards());
        Ok(VariableTracker::TensorWithTfOverride(
            TensorWithTfOverrideVariable::new(
                result,
                self.orig_tensor_variable_source.clone(),
                self.subclass_torch_function_func.clone(),
                self.subclass_type.clone(),
                rewrapped_options,
            ),
        ))
    }

    /// Inlines `subclass.__torch_function__(cls, func, (cls,), args, kwargs)`.
    ///
    /// The hook is read from `<source>.__torch_function__.__func__` and guarded on identity.
    /// The caller prepares `args` and wraps the result if needed.
    #[allow(clippy::too_many_arguments)]
    pub fn inline_torch_function_unwrapped<B>(
        tx: &mut TraceContext<B>,
        original_func_var: VariableTracker<T>,
        tensor_with_tf_override_source: &Source,
        tf_func: &UserFunction,
        subclass_type: &PythonClass,
        options: VariableOptions,
        args: Vec<VariableTracker<T>>,
        kwargs: BTreeMap<String, VariableTracker<T>>,
    ) -> TraceResult<VariableTracker<T>>
    where
        B: TensorLibrary<Tensor = T>,
    {
        let source = tensor_with_tf_override_source
            .attr("__torch_function__")
            .attr("__func__");
        let tf_func_var = VariableTracker::UserFunction(UserFunctionVariable {
            func: tf_func.clone(),
            options: VariableOptions::new()
                .with_source(source.clone())
                .with_guard(Guard::new(source, GuardKind::FunctionMatch)),
        });
        let type_var = VariableTracker::UserDefinedClass(UserDefinedClassVariable {
            class: subclass_type.clone(),
            options: options.clone(),
        });

        let tf_args = vec![
            type_var.clone(),
            original_func_var,
            VariableTracker::Container(ContainerVariable::tuple(
                vec![type_var],
                VariableOptions::new(),
            )),
            VariableTracker::Container(ContainerVariable::tuple(args, VariableOptions::new())),
            VariableTracker::ConstDict(ConstDictVariable {
                items: kwargs.into_iter().collect(),
                options: VariableOptions::new(),
            }),
        ];

        // Dispatch stays off so cloning the example tensor inside the hook does not re-enter it.
        tx.with_torch_function_disabled(|tx| {
            tx.inline_user_function_return(tf_func_var, tf_args, BTreeMap::new())
        })
    }
}
