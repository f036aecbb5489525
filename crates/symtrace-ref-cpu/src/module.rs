//! Small stateful modules for exercising `call_module` nodes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use symtrace::tensor::Kwargs;
use symtrace::{DType, ExampleValue, ExecError, ExecResult, ModuleHandle, TensorLike, TracedModule};

use crate::tensor::{CpuTensor, TensorData};

/// `y = x @ weight^T + bias` over the last axis of `x`.
#[derive(Debug, Clone)]
pub struct Linear {
    name: String,
    weight: CpuTensor,
    bias: Option<CpuTensor>,
}

impl Linear {
    /// `weight` has shape `[out_features, in_features]`; `bias` has shape `[out_features]`.
    pub fn new(name: impl Into<String>, weight: CpuTensor, bias: Option<CpuTensor>) -> Self {
        Linear {
            name: name.into(),
            weight: weight.into_parameter(),
            bias: bias.map(CpuTensor::into_parameter),
        }
    }

    /// Uniformly initialized layer in `[-1/sqrt(in), 1/sqrt(in))`.
    pub fn seeded(name: impl Into<String>, in_features: usize, out_features: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (in_features.max(1) as f64).sqrt();
        let mut sample = |count: usize| -> Vec<f64> {
            (0..count).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        let weight = CpuTensor::from_vec(
            &[out_features, in_features],
            sample(out_features * in_features),
            DType::F32,
        );
        let bias = CpuTensor::from_vec(&[out_features], sample(out_features), DType::F32);
        Linear::new(name, weight, Some(bias))
    }

    pub fn weight(&self) -> &CpuTensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&CpuTensor> {
        self.bias.as_ref()
    }

    fn deep_clone(&self) -> Linear {
        Linear {
            name: self.name.clone(),
            weight: self.weight.clone_preserving_strides(),
            bias: self.bias.as_ref().map(CpuTensor::clone_preserving_strides),
        }
    }

    fn placeholder_clone(&self) -> Linear {
        Linear {
            name: self.name.clone(),
            weight: self.weight.to_placeholder(),
            bias: self.bias.as_ref().map(CpuTensor::to_placeholder),
        }
    }

    fn apply(&self, input: &CpuTensor) -> ExecResult<CpuTensor> {
        let &[out_features, in_features] = self.weight.size() else {
            return Err(ExecError::runtime(format!(
                "{}: weight must be a matrix",
                self.name
            )));
        };
        let Some((&last, batch)) = input.size().split_last() else {
            return Err(ExecError::runtime(format!(
                "{}: input must have at least one dimension",
                self.name
            )));
        };
        if last != in_features {
            return Err(ExecError::runtime(format!(
                "{}: expected {in_features} input features, got {last}",
                self.name
            )));
        }

        let mut out_size = batch.to_vec();
        out_size.push(out_features);
        let data = match (input.values(), self.weight.values()) {
            (Some(x), Some(w)) => {
                let bias = self.bias.as_ref().and_then(CpuTensor::values);
                let rows = x.len() / in_features.max(1);
                let mut out = Vec::with_capacity(rows * out_features);
                for row in x.chunks(in_features.max(1)).take(rows) {
                    for o in 0..out_features {
                        let dot: f64 = row
                            .iter()
                            .zip(&w[o * in_features..(o + 1) * in_features])
                            .map(|(a, b)| a * b)
                            .sum();
                        out.push(dot + bias.map_or(0.0, |b| b[o]));
                    }
                }
                TensorData::Dense(out.into())
            }
            _ => TensorData::Placeholder,
        };
        Ok(input.derive(&out_size, data).with_requires_grad(true))
    }
}

impl TracedModule<CpuTensor> for Linear {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(
        &self,
        args: &[ExampleValue<CpuTensor>],
        _kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<ExampleValue<CpuTensor>> {
        match args {
            [ExampleValue::Tensor(input)] => self.apply(input).map(ExampleValue::Tensor),
            _ => Err(ExecError::runtime(format!(
                "{} expects a single tensor input",
                self.name
            ))),
        }
    }

    fn deep_copy(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(self.deep_clone())
    }

    fn to_placeholder(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(self.placeholder_clone())
    }
}

/// Linear layer whose input width is learned from its first call.
pub struct LazyLinear {
    name: String,
    out_features: usize,
    seed: u64,
    inner: Mutex<Option<Linear>>,
}

impl LazyLinear {
    pub fn new(name: impl Into<String>, out_features: usize, seed: u64) -> Self {
        LazyLinear {
            name: name.into(),
            out_features,
            seed,
            inner: Mutex::new(None),
        }
    }

    /// Input width, once the first call has materialized the parameters.
    pub fn in_features(&self) -> Option<usize> {
        self.lock()
            .as_ref()
            .and_then(|linear| linear.weight().size().get(1).copied())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Linear>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn copy_with(&self, convert: impl FnOnce(&Linear) -> Linear) -> LazyLinear {
        LazyLinear {
            name: self.name.clone(),
            out_features: self.out_features,
            seed: self.seed,
            inner: Mutex::new(self.lock().as_ref().map(convert)),
        }
    }
}

impl TracedModule<CpuTensor> for LazyLinear {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_lazy(&self) -> bool {
        self.lock().is_none()
    }

    fn forward(
        &self,
        args: &[ExampleValue<CpuTensor>],
        kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<ExampleValue<CpuTensor>> {
        let mut inner = self.lock();
        if inner.is_none() {
            let [ExampleValue::Tensor(input)] = args else {
                return Err(ExecError::runtime(format!(
                    "{} expects a single tensor input",
                    self.name
                )));
            };
            let in_features = input.size().last().copied().ok_or_else(|| {
                ExecError::runtime(format!("{}: cannot infer input features", self.name))
            })?;
            log::debug!(
                "materializing {} with {in_features} input features",
                self.name
            );
            *inner = Some(Linear::seeded(
                self.name.clone(),
                in_features,
                self.out_features,
                self.seed,
            ));
        }
        match inner.as_ref() {
            Some(linear) => linear.forward(args, kwargs),
            None => Err(ExecError::runtime(format!(
                "{} has no parameters",
                self.name
            ))),
        }
    }

    fn deep_copy(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(self.copy_with(Linear::deep_clone))
    }

    fn to_placeholder(&self) -> ModuleHandle<CpuTensor> {
        Arc::new(self.copy_with(Linear::placeholder_clone))
    }
}
