//! State owned by one trace, plus the session that numbers traces.
//!
//! A [`TraceContext`] exclusively owns its [`OutputGraph`]; every engine entry point takes it
//! by `&mut`. Inlining of user functions is delegated to the front end through
//! [`UserCodeInliner`]. The inliner is shared, so an inlined body may inline further calls.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::Arc;

use crate::config::TraceConfig;
use crate::error::{TraceError, TraceResult};
use crate::graph::OutputGraph;
use crate::library::TensorLibrary;
use crate::logging::{StepCounter, CODE_LEVEL, CODE_TARGET, LOG_TARGET};
use crate::variables::VariableTracker;

type Var<B> = VariableTracker<<B as TensorLibrary>::Tensor>;

/// Front-end hook that symbolically runs a user function and returns its result.
///
/// Calls may nest: the body being inlined can reach
/// [`TraceContext::inline_user_function_return`] again. Implementations keep any mutable
/// state behind interior mutability.
pub trait UserCodeInliner<B: TensorLibrary> {
    fn inline_user_function_return(
        &self,
        tx: &mut TraceContext<B>,
        func: Var<B>,
        args: Vec<Var<B>>,
        kwargs: BTreeMap<String, Var<B>>,
    ) -> TraceResult<Var<B>>;
}

pub struct TraceContext<B: TensorLibrary> {
    library: Arc<B>,
    config: TraceConfig,
    name: String,
    pub output: OutputGraph<B::Tensor>,
    inliner: Option<Rc<dyn UserCodeInliner<B>>>,
    torch_function_enabled: bool,
}

impl<B: TensorLibrary> TraceContext<B> {
    pub fn new(library: Arc<B>, config: TraceConfig) -> Self {
        TraceContext {
            library,
            config,
            name: String::from("<trace>"),
            output: OutputGraph::new(),
            inliner: None,
            torch_function_enabled: true,
        }
    }

    pub fn library(&self) -> &Arc<B> {
        &self.library
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_inliner(&mut self, inliner: impl UserCodeInliner<B> + 'static) {
        let inliner: Rc<dyn UserCodeInliner<B>> = Rc::new(inliner);
        self.inliner = Some(inliner);
    }

    pub fn inline_user_function_return(
        &mut self,
        func: Var<B>,
        args: Vec<Var<B>>,
        kwargs: BTreeMap<String, Var<B>>,
    ) -> TraceResult<Var<B>> {
        // Cloned out so the inliner can borrow the context mutably while staying installed.
        let Some(inliner) = self.inliner.clone() else {
            return Err(TraceError::unsupported("no inliner installed for user functions"));
        };
        inliner.inline_user_function_return(self, func, args, kwargs)
    }

    /// Whether `__torch_function__` overrides are dispatched.
    ///
    /// While false, method calls on subclass instances run on the wrapped tensor directly.
    pub fn torch_function_enabled(&self) -> bool {
        self.torch_function_enabled
    }

    /// Disables `__torch_function__` dispatch until the returned guard drops.
    pub fn disable_torch_function(&mut self) -> TorchFunctionGuard<'_, B> {
        let previous = std::mem::replace(&mut self.torch_function_enabled, false);
        TorchFunctionGuard { tx: self, previous }
    }

    /// Runs `f` with `__torch_function__` dispatch disabled.
    pub fn with_torch_function_disabled<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut guard = self.disable_torch_function();
        f(&mut *guard)
    }
}

/// RAII guard restoring the previous `__torch_function__` state when dropped.
pub struct TorchFunctionGuard<'a, B: TensorLibrary> {
    tx: &'a mut TraceContext<B>,
    previous: bool,
}

impl<B: TensorLibrary> Deref for TorchFunctionGuard<'_, B> {
    type Target = TraceContext<B>;

    fn deref(&self) -> &Self::Target {
        self.tx
    }
}

impl<B: TensorLibrary> DerefMut for TorchFunctionGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx
    }
}

impl<B: TensorLibrary> Drop for TorchFunctionGuard<'_, B> {
    fn drop(&mut self) {
        self.tx.torch_function_enabled = self.previous;
    }
}

/// One compilation session. Owns step numbering across the traces it starts.
#[derive(Debug, Default)]
pub struct CompileSession {
    steps: StepCounter,
    config: TraceConfig,
}

impl CompileSession {
    pub fn new(config: TraceConfig) -> Self {
        CompileSession {
            steps: StepCounter::new(),
            config,
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn start_trace<B: TensorLibrary>(
        &mut self,
        library: Arc<B>,
        name: impl Into<String>,
    ) -> TraceContext<B> {
        let name = name.into();
        self.steps
            .step_logger(LOG_TARGET)
            .log(log::Level::Info, &format!("start tracing {name}"));
        let mut tx = TraceContext::new(library, self.config.clone());
        tx.name = name;
        tx
    }

    /// Logs the end of `tx` and dumps its graph at the code level.
    pub fn finish_trace<B: TensorLibrary>(&mut self, tx: &TraceContext<B>) {
        let step = self.steps.step_logger(LOG_TARGET);
        step.log(
            log::Level::Info,
            &format!(
                "done tracing {} ({} nodes)",
                tx.name,
                tx.output.nodes().len()
            ),
        );
        if log::log_enabled!(target: CODE_TARGET, CODE_LEVEL) {
            match tx.output.graph_summary().to_json_string() {
                Ok(json) => log::log!(target: CODE_TARGET, CODE_LEVEL, "{json}"),
                Err(err) => log::warn!(target: LOG_TARGET, "failed to dump graph: {err}"),
            }
        }
    }

    /// Number the next logged step will receive.
    pub fn next_step(&self) -> u32 {
        self.steps.peek()
    }
}
