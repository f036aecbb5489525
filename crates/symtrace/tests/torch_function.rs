mod common;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use symtrace::variables::{TensorWithTfOverrideVariable, UserFunction, UserFunctionVariable};
use symtrace::{
    DType, Guard, GuardKind, PythonClass, Source, Target, TraceConfig, TraceContext, TraceError,
    TraceResult, UserCodeInliner, VariableOptions, VariableTracker,
};
use symtrace_ref_cpu::{CpuLibrary, CpuTensor};

use common::{input, int, tensor, trace, Var};

#[derive(Debug, Default)]
struct Observed {
    dispatch_enabled: Option<bool>,
    func: Option<VariableTracker<CpuTensor>>,
    arg_kinds: Vec<&'static str>,
    method: Option<String>,
}

/// Plays the role of a subclass hook that simply calls `func(*args, **kwargs)`.
struct CallThrough {
    observed: Rc<RefCell<Observed>>,
}

impl UserCodeInliner<CpuLibrary> for CallThrough {
    fn inline_user_function_return(
        &self,
        tx: &mut TraceContext<CpuLibrary>,
        func: Var,
        args: Vec<Var>,
        _kwargs: BTreeMap<String, Var>,
    ) -> TraceResult<Var> {
        let mut observed = self.observed.borrow_mut();
        observed.dispatch_enabled = Some(tx.torch_function_enabled());
        observed.func = Some(func);
        observed.arg_kinds = args.iter().map(VariableTracker::kind_name).collect();

        let [_, VariableTracker::GetAttr(method), _, VariableTracker::Container(call_args), _] =
            args.as_slice()
        else {
            return Err(TraceError::internal("unexpected hook arguments"));
        };
        observed.method = Some(method.name.clone());
        let receiver = method
            .obj
            .as_tensor()
            .ok_or_else(|| TraceError::internal("method of a non-tensor"))?;
        receiver.call_method(
            tx,
            &method.name,
            call_args.items[1..].to_vec(),
            BTreeMap::new(),
        )
    }
}

fn subclass_instance(tx: &mut TraceContext<CpuLibrary>) -> TensorWithTfOverrideVariable<CpuTensor> {
    let inner = input(tx, "x", CpuTensor::zeros(&[2, 2], DType::F32));
    TensorWithTfOverrideVariable::new(
        inner,
        Source::local("x"),
        UserFunction::new("ScaledTensor.__torch_function__"),
        PythonClass::TensorSubclass("ScaledTensor".into()),
        VariableOptions::new(),
    )
}

#[test]
fn method_calls_are_routed_through_the_subclass_hook() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let observed = Rc::new(RefCell::new(Observed::default()));
    tx.set_inliner(CallThrough {
        observed: Rc::clone(&observed),
    });
    let wrapped = subclass_instance(&mut tx);

    let result = wrapped.call_method(&mut tx, "add", vec![int(1)], BTreeMap::new())?;

    let observed = observed.borrow();
    assert_eq!(observed.dispatch_enabled, Some(false));
    assert!(tx.torch_function_enabled());
    assert_eq!(observed.method.as_deref(), Some("add"));
    assert_eq!(
        observed.arg_kinds,
        vec![
            "UserDefinedClassVariable",
            "GetAttrVariable",
            "ContainerVariable",
            "ContainerVariable",
            "ConstDictVariable",
        ]
    );

    let func = observed.func.as_ref().expect("hook function passed");
    let hook_source = Source::local("x").attr("__torch_function__").attr("__func__");
    assert_eq!(hook_source.name(), "x.__torch_function__.__func__");
    assert_eq!(func.source(), Some(&hook_source));
    assert!(func
        .guards()
        .contains(&Guard::new(hook_source, GuardKind::FunctionMatch)));

    let VariableTracker::TensorWithTfOverride(rewrapped) = &result else {
        panic!("expected a rewrapped subclass, got {}", result.kind_name());
    };
    assert_eq!(rewrapped.subclass_type, wrapped.subclass_type);
    assert_eq!(rewrapped.orig_tensor_variable_source, Source::local("x"));
    let inner = tensor(&rewrapped.tensor_variable);
    assert_eq!(tx.output.node(inner.proxy())?.target, Target::method("add"));
    assert!(result
        .guards()
        .contains(&Guard::new(Source::local("x"), GuardKind::TensorMatch)));
    Ok(())
}

#[test]
fn dispatch_is_restored_when_the_hook_fails() {
    struct Failing;

    impl UserCodeInliner<CpuLibrary> for Failing {
        fn inline_user_function_return(
            &self,
            tx: &mut TraceContext<CpuLibrary>,
            _func: Var,
            _args: Vec<Var>,
            _kwargs: BTreeMap<String, Var>,
        ) -> TraceResult<Var> {
            assert!(!tx.torch_function_enabled());
            Err(TraceError::unsupported("hook uses a generator"))
        }
    }

    let mut tx = trace(TraceConfig::default());
    tx.set_inliner(Failing);
    let wrapped = subclass_instance(&mut tx);
    let err = wrapped
        .call_method(&mut tx, "relu", Vec::new(), BTreeMap::new())
        .expect_err("hook refuses");
    assert!(err.is_graph_break());
    assert!(tx.torch_function_enabled());
}

fn qualname(func: &Var) -> Option<&str> {
    match func {
        VariableTracker::UserFunction(f) => Some(&*f.func.qualname),
        _ => None,
    }
}

/// Hook body that delegates to a helper function, which the front end inlines in turn.
struct DelegatingHook {
    inlined: Rc<RefCell<Vec<String>>>,
}

impl UserCodeInliner<CpuLibrary> for DelegatingHook {
    fn inline_user_function_return(
        &self,
        tx: &mut TraceContext<CpuLibrary>,
        func: Var,
        args: Vec<Var>,
        _kwargs: BTreeMap<String, Var>,
    ) -> TraceResult<Var> {
        let name = qualname(&func)
            .ok_or_else(|| TraceError::internal("inlined a non-function"))?
            .to_string();
        self.inlined.borrow_mut().push(name.clone());

        if name == "negate_helper" {
            let receiver = args
                .first()
                .and_then(VariableTracker::as_tensor)
                .ok_or_else(|| TraceError::internal("helper expects a tensor"))?;
            return receiver.call_method(tx, "neg", Vec::new(), BTreeMap::new());
        }
        let Some(VariableTracker::Container(call_args)) = args.get(3) else {
            return Err(TraceError::internal("unexpected hook arguments"));
        };
        let helper = VariableTracker::UserFunction(UserFunctionVariable {
            func: UserFunction::new("negate_helper"),
            options: VariableOptions::new(),
        });
        tx.inline_user_function_return(helper, vec![call_args.items[0].clone()], BTreeMap::new())
    }
}

#[test]
fn hook_bodies_can_inline_further_calls() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let inlined = Rc::new(RefCell::new(Vec::new()));
    tx.set_inliner(DelegatingHook {
        inlined: Rc::clone(&inlined),
    });
    let wrapped = subclass_instance(&mut tx);

    let result = wrapped.call_method(&mut tx, "neg", Vec::new(), BTreeMap::new())?;

    assert_eq!(
        *inlined.borrow(),
        vec![
            "ScaledTensor.__torch_function__".to_string(),
            "negate_helper".to_string(),
        ]
    );
    let VariableTracker::TensorWithTfOverride(rewrapped) = &result else {
        panic!("expected a rewrapped subclass, got {}", result.kind_name());
    };
    let inner = tensor(&rewrapped.tensor_variable);
    assert_eq!(tx.output.node(inner.proxy())?.target, Target::method("neg"));
    assert!(tx.torch_function_enabled());
    Ok(())
}

#[test]
fn disabled_dispatch_calls_the_wrapped_tensor() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let wrapped = subclass_instance(&mut tx);

    let result = tx.with_torch_function_disabled(|tx| {
        wrapped.call_method(tx, "relu", Vec::new(), BTreeMap::new())
    })?;

    let plain = tensor(&result);
    assert_eq!(tx.output.node(plain.proxy())?.target, Target::method("relu"));
    assert!(result
        .guards()
        .contains(&Guard::new(Source::local("x"), GuardKind::TensorMatch)));
    Ok(())
}

#[test]
fn without_an_inliner_the_hook_cannot_run() {
    let mut tx = trace(TraceConfig::default());
    let wrapped = subclass_instance(&mut tx);
    let err = wrapped
        .call_method(&mut tx, "relu", Vec::new(), BTreeMap::new())
        .expect_err("no front end installed");
    assert!(matches!(err, TraceError::Unsupported { .. }));
}

#[test]
fn subclass_values_proxy_to_the_wrapped_tensor() -> anyhow::Result<()> {
    let mut tx = trace(TraceConfig::default());
    let wrapped = subclass_instance(&mut tx);
    let proxy = tensor(&wrapped.tensor_variable).proxy();
    assert_eq!(
        VariableTracker::TensorWithTfOverride(wrapped).as_proxy()?,
        symtrace::Argument::Node(proxy)
    );
    Ok(())
}
