//! Per-trace configuration.
//!
//! A [`TraceConfig`] is read once when a trace starts and is fixed for the trace's lifetime.
//! It can come from JSON, from `SYMTRACE_*` environment variables, or from code.

use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Keep sizes and integer outputs symbolic instead of specializing them to literals.
    pub dynamic_shapes: bool,
    /// Capture `.item()` and scalar math results instead of breaking the graph.
    pub capture_scalar_outputs: bool,
    /// Run operations on shape-only placeholder tensors instead of real data.
    pub fake_tensor_propagation: bool,
    /// Execute each operation to obtain an example value. When off, only supplied values are
    /// specialized.
    pub dynamic_propagation: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            dynamic_shapes: false,
            capture_scalar_outputs: false,
            fake_tensor_propagation: true,
            dynamic_propagation: true,
        }
    }
}

impl TraceConfig {
    /// Builds a config from defaults overridden by `SYMTRACE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = TraceConfig::default();
        TraceConfig {
            dynamic_shapes: env_flag("SYMTRACE_DYNAMIC_SHAPES", defaults.dynamic_shapes),
            capture_scalar_outputs: env_flag(
                "SYMTRACE_CAPTURE_SCALAR_OUTPUTS",
                defaults.capture_scalar_outputs,
            ),
            fake_tensor_propagation: env_flag(
                "SYMTRACE_FAKE_TENSOR_PROPAGATION",
                defaults.fake_tensor_propagation,
            ),
            dynamic_propagation: env_flag(
                "SYMTRACE_DYNAMIC_PROPAGATION",
                defaults.dynamic_propagation,
            ),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to parse trace config")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read trace config {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn with_dynamic_shapes(mut self, enabled: bool) -> Self {
        self.dynamic_shapes = enabled;
        self
    }

    pub fn with_capture_scalar_outputs(mut self, enabled: bool) -> Self {
        self.capture_scalar_outputs = enabled;
        self
    }

    pub fn with_fake_tensor_propagation(mut self, enabled: bool) -> Self {
        self.fake_tensor_propagation = enabled;
        self
    }

    pub fn with_dynamic_propagation(mut self, enabled: bool) -> Self {
        self.dynamic_propagation = enabled;
        self
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}
