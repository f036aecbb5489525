#![allow(dead_code)]

use std::sync::Arc;

use symtrace::{
    CompileSession, ExampleValue, Guard, GuardKind, Source, TensorVariable, TraceConfig,
    TraceContext, VariableOptions, VariableTracker,
};
use symtrace_ref_cpu::{CpuLibrary, CpuTensor};

pub type Var = VariableTracker<CpuTensor>;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn trace(config: TraceConfig) -> TraceContext<CpuLibrary> {
    trace_with(Arc::new(CpuLibrary::new(0)), config)
}

pub fn trace_with(library: Arc<CpuLibrary>, config: TraceConfig) -> TraceContext<CpuLibrary> {
    init_logger();
    CompileSession::new(config).start_trace(library, "test")
}

pub fn eager() -> TraceConfig {
    TraceConfig::default().with_fake_tensor_propagation(false)
}

/// Registers `tensor` as the graph input `name`, guarded on its metadata.
pub fn input(tx: &mut TraceContext<CpuLibrary>, name: &str, tensor: CpuTensor) -> Var {
    let source = Source::local(name);
    let node = tx.output.add_graph_input(name, source.clone());
    let options = VariableOptions::new()
        .with_source(source.clone())
        .with_guard(Guard::new(source, GuardKind::TensorMatch));
    TensorVariable::create(tx, node, Some(ExampleValue::Tensor(tensor)), options)
        .expect("graph input is classified")
}

pub fn tensor(var: &Var) -> &TensorVariable<CpuTensor> {
    var.as_tensor()
        .unwrap_or_else(|| panic!("expected a tensor, got {}", var.kind_name()))
}

pub fn int(value: i64) -> Var {
    VariableTracker::constant(symtrace::ConstValue::Int(value), VariableOptions::new())
}
