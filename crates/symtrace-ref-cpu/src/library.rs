use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use symtrace::tensor::{Kwargs, NamedTupleType};
use symtrace::{
    Builtin, DType, ExampleValue, ExecError, ExecResult, Number, Target, TensorLibrary,
    TensorLike,
};

use crate::tensor::{CpuTensor, TensorData};

type Value = ExampleValue<CpuTensor>;

/// Eager reference library with a placeholder mode and a seeded generator.
pub struct CpuLibrary {
    rng: Mutex<StdRng>,
    placeholder_depth: AtomicUsize,
}

impl Default for CpuLibrary {
    fn default() -> Self {
        CpuLibrary::new(0)
    }
}

impl CpuLibrary {
    pub fn new(seed: u64) -> Self {
        CpuLibrary {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            placeholder_depth: AtomicUsize::new(0),
        }
    }

    pub fn in_placeholder_mode(&self) -> bool {
        self.placeholder_depth.load(Ordering::SeqCst) > 0
    }

    /// Draws one value from the generator, as user code outside tracing would.
    pub fn next_random(&self) -> f64 {
        self.rng().gen()
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outputs are placeholders in placeholder mode or when any input is one.
    fn placeholder_output(&self, inputs: &[&CpuTensor]) -> bool {
        self.in_placeholder_mode() || inputs.iter().any(|t| t.is_placeholder())
    }

    fn elementwise(
        &self,
        lhs: &Value,
        rhs: &Value,
        op: fn(f64, f64) -> f64,
        name: &str,
    ) -> ExecResult<Value> {
        let (tensor, other, swapped) = match (lhs, rhs) {
            (ExampleValue::Tensor(t), other) => (t, other, false),
            (other, ExampleValue::Tensor(t)) => (t, other, true),
            _ => {
                return Err(ExecError::runtime(format!(
                    "{name} expects at least one tensor operand"
                )))
            }
        };
        let apply = |a: f64, b: f64| if swapped { op(b, a) } else { op(a, b) };

        match other {
            ExampleValue::Tensor(other) => {
                if other.size() != tensor.size() && other.numel() != 1 {
                    return Err(ExecError::runtime(format!(
                        "{name}: shape {:?} does not match {:?}",
                        other.size(),
                        tensor.size()
                    )));
                }
                let requires_grad = tensor.requires_grad() || other.requires_grad();
                let dtype = promote(tensor.dtype(), other.dtype());
                let data = if self.placeholder_output(&[tensor, other]) {
                    TensorData::Placeholder
                } else {
                    let (a, b) = (dense(tensor)?, dense(other)?);
                    let values: Vec<f64> = a
                        .iter()
                        .enumerate()
                        .map(|(i, &x)| apply(x, b[if b.len() == 1 { 0 } else { i }]))
                        .collect();
                    TensorData::Dense(values.into())
                };
                Ok(ExampleValue::Tensor(
                    tensor
                        .derive(tensor.size(), data)
                        .with_dtype(dtype)
                        .with_requires_grad(requires_grad),
                ))
            }
            scalar => {
                let number = scalar.as_number().ok_or_else(|| {
                    ExecError::runtime(format!("{name}: unsupported operand {}", scalar.type_name()))
                })?;
                let data = if self.placeholder_output(&[tensor]) {
                    TensorData::Placeholder
                } else {
                    let b = number.as_f64();
                    TensorData::Dense(dense(tensor)?.iter().map(|&a| apply(a, b)).collect())
                };
                Ok(ExampleValue::Tensor(tensor.derive(tensor.size(), data)))
            }
        }
    }

    fn unary(&self, input: &Value, op: fn(f64) -> f64) -> ExecResult<Value> {
        let tensor = expect_tensor(input)?;
        let data = if self.placeholder_output(&[tensor]) {
            TensorData::Placeholder
        } else {
            TensorData::Dense(dense(tensor)?.iter().map(|&v| op(v)).collect())
        };
        Ok(ExampleValue::Tensor(tensor.derive(tensor.size(), data)))
    }

    fn factory(&self, args: &[Value], kwargs: &Kwargs<CpuTensor>, fill: Fill) -> ExecResult<Value> {
        let size = shape_from_args(args)?;
        let dtype = match kwargs.get("dtype") {
            Some(ExampleValue::Dtype(dtype)) => *dtype,
            Some(other) => {
                return Err(ExecError::runtime(format!(
                    "dtype must be a torch.dtype, not {}",
                    other.type_name()
                )))
            }
            None => DType::F32,
        };
        if self.in_placeholder_mode() {
            return Ok(ExampleValue::Tensor(CpuTensor::placeholder(&size, dtype)));
        }
        let numel: usize = size.iter().product();
        let values = match fill {
            Fill::Constant(value) => vec![value; numel],
            Fill::Uniform => {
                let mut rng = self.rng();
                (0..numel).map(|_| rng.gen::<f64>()).collect()
            }
        };
        Ok(ExampleValue::Tensor(CpuTensor::from_vec(&size, values, dtype)))
    }

    fn matmul(&self, lhs: &Value, rhs: &Value) -> ExecResult<Value> {
        let (a, b) = (expect_tensor(lhs)?, expect_tensor(rhs)?);
        let (&[m, k], &[k2, n]) = (a.size(), b.size()) else {
            return Err(ExecError::runtime("matmul expects two matrices"));
        };
        if k != k2 {
            return Err(ExecError::runtime(format!(
                "matmul: inner dimensions {k} and {k2} differ"
            )));
        }
        let requires_grad = a.requires_grad() || b.requires_grad();
        let data = if self.placeholder_output(&[a, b]) {
            TensorData::Placeholder
        } else {
            let (x, y) = (dense(a)?, dense(b)?);
            let mut out = vec![0.0; m * n];
            for i in 0..m {
                for j in 0..n {
                    out[i * n + j] = (0..k).map(|p| x[i * k + p] * y[p * n + j]).sum();
                }
            }
            TensorData::Dense(out.into())
        };
        Ok(ExampleValue::Tensor(
            a.derive(&[m, n], data).with_requires_grad(requires_grad),
        ))
    }

    fn nonzero(&self, input: &Value) -> ExecResult<Value> {
        let tensor = expect_tensor(input)?;
        if self.placeholder_output(&[tensor]) {
            return Err(ExecError::DynamicOutputShape {
                func: "aten.nonzero.default".to_string(),
            });
        }
        let values = dense(tensor)?;
        let size = tensor.size();
        let mut coords = Vec::new();
        let mut rows = 0;
        for (flat, &v) in values.iter().enumerate() {
            if v != 0.0 {
                rows += 1;
                let mut rem = flat;
                let mut index = vec![0.0; size.len()];
                for axis in (0..size.len()).rev() {
                    index[axis] = (rem % size[axis]) as f64;
                    rem /= size[axis];
                }
                coords.extend(index);
            }
        }
        Ok(ExampleValue::Tensor(CpuTensor::from_vec(
            &[rows, size.len()],
            coords,
            DType::I64,
        )))
    }

    fn max_dim(&self, input: &Value, dim: &Value) -> ExecResult<Value> {
        let tensor = expect_tensor(input)?;
        let dim = normalize_dim(expect_int(dim)?, tensor.ndim())?;
        let (outer, len, inner) = split_at_dim(tensor.size(), dim);
        let mut out_size = tensor.size().to_vec();
        out_size.remove(dim);

        let (values, indices) = if self.placeholder_output(&[tensor]) {
            (TensorData::Placeholder, TensorData::Placeholder)
        } else {
            let data = dense(tensor)?;
            let mut best = Vec::with_capacity(outer * inner);
            let mut argbest = Vec::with_capacity(outer * inner);
            for o in 0..outer {
                for i in 0..inner {
                    let mut top = (0, f64::NEG_INFINITY);
                    for l in 0..len {
                        let v = data[(o * len + l) * inner + i];
                        if v > top.1 {
                            top = (l, v);
                        }
                    }
                    best.push(top.1);
                    argbest.push(top.0 as f64);
                }
            }
            (TensorData::Dense(best.into()), TensorData::Dense(argbest.into()))
        };
        Ok(ExampleValue::NamedTuple(
            NamedTupleType::new("torch.return_types.max", &["values", "indices"]),
            vec![
                ExampleValue::Tensor(tensor.derive(&out_size, values)),
                ExampleValue::Tensor(
                    tensor
                        .derive(&out_size, indices)
                        .with_dtype(DType::I64)
                        .with_requires_grad(false),
                ),
            ],
        ))
    }

    fn getitem(&self, container: &Value, index: &Value) -> ExecResult<Value> {
        let index = expect_int(index)?;
        match container {
            ExampleValue::Tuple(items)
            | ExampleValue::List(items)
            | ExampleValue::NamedTuple(_, items) => {
                let position = normalize_index(index, items.len())?;
                Ok(items[position].clone())
            }
            ExampleValue::Size(dims) => {
                let position = normalize_index(index, dims.len())?;
                Ok(ExampleValue::Int(dims[position] as i64))
            }
            ExampleValue::Tensor(tensor) => {
                let Some((&first, rest)) = tensor.size().split_first() else {
                    return Err(ExecError::runtime("invalid index of a 0-dim tensor"));
                };
                let position = normalize_index(index, first)?;
                let data = if self.placeholder_output(&[tensor]) {
                    TensorData::Placeholder
                } else {
                    let row: usize = rest.iter().product();
                    let values = dense(tensor)?;
                    TensorData::Dense(values[position * row..(position + 1) * row].into())
                };
                Ok(ExampleValue::Tensor(tensor.derive(rest, data)))
            }
            other => Err(ExecError::runtime(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn tensor_method(
        &self,
        name: &str,
        tensor: &CpuTensor,
        args: &[Value],
        kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<Value> {
        let receiver = ExampleValue::Tensor(tensor.clone());
        match name {
            "item" => {
                if self.placeholder_output(&[tensor]) {
                    return Err(ExecError::DataDependentOutput {
                        func: "aten._local_scalar_dense.default".to_string(),
                    });
                }
                let values = dense(tensor)?;
                let [value] = values else {
                    return Err(ExecError::runtime(format!(
                        "a tensor with {} elements cannot be converted to a scalar",
                        values.len()
                    )));
                };
                Ok(ExampleValue::from(number_of(tensor.dtype(), *value)))
            }
            "size" => match args {
                [] => Ok(ExampleValue::Size(tensor.size().to_vec())),
                [dim] => {
                    let dim = normalize_dim(expect_int(dim)?, tensor.ndim())?;
                    Ok(ExampleValue::Int(tensor.size()[dim] as i64))
                }
                _ => Err(ExecError::runtime("size takes at most one argument")),
            },
            "stride" => match args {
                [] => Ok(ExampleValue::Tuple(
                    tensor
                        .stride()
                        .iter()
                        .map(|&s| ExampleValue::Int(s as i64))
                        .collect(),
                )),
                [dim] => {
                    let dim = normalize_dim(expect_int(dim)?, tensor.ndim())?;
                    Ok(ExampleValue::Int(tensor.stride()[dim] as i64))
                }
                _ => Err(ExecError::runtime("stride takes at most one argument")),
            },
            "dim" | "ndimension" => Ok(ExampleValue::Int(tensor.ndim() as i64)),
            "numel" => Ok(ExampleValue::Int(tensor.numel() as i64)),
            "is_floating_point" => Ok(ExampleValue::Bool(tensor.dtype().is_floating_point())),
            "is_contiguous" => Ok(ExampleValue::Bool(tensor.is_contiguous())),
            "view" | "reshape" => {
                let size = resolve_view(&signed_shape_from_args(args)?, tensor.numel())?;
                Ok(ExampleValue::Tensor(
                    tensor.derive(&size, tensor.data().clone()),
                ))
            }
            "t" => {
                let &[rows, cols] = tensor.size() else {
                    return Err(ExecError::runtime("t() expects a 2-D tensor"));
                };
                let data = match tensor.data() {
                    TensorData::Placeholder => TensorData::Placeholder,
                    TensorData::Dense(values) => TensorData::Dense(
                        (0..rows * cols)
                            .map(|flat| values[(flat % rows) * cols + flat / rows])
                            .collect(),
                    ),
                };
                let stride = [tensor.stride()[1], tensor.stride()[0]];
                Ok(ExampleValue::Tensor(
                    tensor.derive(&[cols, rows], data).with_stride(&stride),
                ))
            }
            "contiguous" => Ok(ExampleValue::Tensor(
                tensor.derive(tensor.size(), tensor.data().clone()),
            )),
            "add" | "sub" | "mul" | "div" => {
                let [other] = args else {
                    return Err(ExecError::runtime(format!("{name} expects one operand")));
                };
                self.call_function(&Target::function(name), &[receiver, other.clone()], kwargs)
            }
            "relu" | "neg" => self.call_function(&Target::function(name), &[receiver], kwargs),
            "nonzero" => self.nonzero(&receiver),
            "max" => match args {
                [dim] => self.max_dim(&receiver, dim),
                _ => Err(ExecError::unsupported("Tensor.max without dim")),
            },
            "new_empty" | "new_zeros" => {
                let size = shape_from_args(args)?;
                let data = if self.placeholder_output(&[tensor]) {
                    TensorData::Placeholder
                } else {
                    TensorData::Dense(vec![0.0; size.iter().product()].into())
                };
                Ok(ExampleValue::Tensor(
                    tensor.derive(&size, data).with_requires_grad(false),
                ))
            }
            "sum" => {
                let data = if self.placeholder_output(&[tensor]) {
                    TensorData::Placeholder
                } else {
                    TensorData::Dense(vec![dense(tensor)?.iter().sum()].into())
                };
                Ok(ExampleValue::Tensor(tensor.derive(&[], data)))
            }
            "float" => Ok(ExampleValue::Tensor(
                tensor
                    .derive(tensor.size(), tensor.data().clone())
                    .with_dtype(DType::F32),
            )),
            "chunk" => {
                let [chunks] = args else {
                    return Err(ExecError::runtime("chunk expects a chunk count"));
                };
                self.chunk(tensor, expect_int(chunks)?)
            }
            "repeat" => self.repeat(tensor, &shape_from_args(args)?),
            other => Err(ExecError::unsupported(format!(
                "Tensor.{other} is not provided by the reference library"
            ))),
        }
    }

    fn chunk(&self, tensor: &CpuTensor, chunks: i64) -> ExecResult<Value> {
        let Some((&first, rest)) = tensor.size().split_first() else {
            return Err(ExecError::runtime("chunk expects at least one dimension"));
        };
        if chunks <= 0 {
            return Err(ExecError::runtime("chunk expects a positive chunk count"));
        }
        let step = first.div_ceil(chunks as usize).max(1);
        let row: usize = rest.iter().product();
        let placeholder = self.placeholder_output(&[tensor]);
        let mut parts = Vec::new();
        let mut start = 0;
        while start < first {
            let end = (start + step).min(first);
            let mut size = vec![end - start];
            size.extend_from_slice(rest);
            let data = if placeholder {
                TensorData::Placeholder
            } else {
                TensorData::Dense(dense(tensor)?[start * row..end * row].into())
            };
            parts.push(ExampleValue::Tensor(tensor.derive(&size, data)));
            start = end;
        }
        Ok(ExampleValue::Tuple(parts))
    }

    fn repeat(&self, tensor: &CpuTensor, repeats: &[usize]) -> ExecResult<Value> {
        if repeats.len() != tensor.ndim() {
            return Err(ExecError::runtime(format!(
                "repeat expects {} repeat counts, got {}",
                tensor.ndim(),
                repeats.len()
            )));
        }
        let in_size = tensor.size();
        let out_size: Vec<usize> = in_size.iter().zip(repeats).map(|(s, r)| s * r).collect();
        let data = if self.placeholder_output(&[tensor]) {
            TensorData::Placeholder
        } else {
            let values = dense(tensor)?;
            let numel: usize = out_size.iter().product();
            let mut out = Vec::with_capacity(numel);
            for flat in 0..numel {
                let mut rem = flat;
                let mut src = 0;
                let mut scale = 1;
                for axis in (0..out_size.len()).rev() {
                    let coord = rem % out_size[axis];
                    rem /= out_size[axis];
                    src += (coord % in_size[axis]) * scale;
                    scale *= in_size[axis];
                }
                out.push(values[src]);
            }
            TensorData::Dense(out.into())
        };
        Ok(ExampleValue::Tensor(tensor.derive(&out_size, data)))
    }
}

#[derive(Clone, Copy)]
enum Fill {
    Constant(f64),
    Uniform,
}

impl TensorLibrary for CpuLibrary {
    type Tensor = CpuTensor;
    type RngState = StdRng;

    fn library_name(&self) -> &str {
        "cpu-ref"
    }

    fn call_function(
        &self,
        target: &Target,
        args: &[Value],
        kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<Value> {
        match target {
            Target::Function(name) => match (name.as_str(), args) {
                ("add", [a, b]) => self.elementwise(a, b, |x, y| x + y, "add"),
                ("sub", [a, b]) => self.elementwise(a, b, |x, y| x - y, "sub"),
                ("mul", [a, b]) => self.elementwise(a, b, |x, y| x * y, "mul"),
                ("div", [a, b]) => self.elementwise(a, b, |x, y| x / y, "div"),
                ("relu", [a]) => self.unary(a, |x| x.max(0.0)),
                ("neg", [a]) => self.unary(a, |x| -x),
                ("zeros", _) => self.factory(args, kwargs, Fill::Constant(0.0)),
                ("ones", _) => self.factory(args, kwargs, Fill::Constant(1.0)),
                ("rand", _) => self.factory(args, kwargs, Fill::Uniform),
                ("matmul", [a, b]) => self.matmul(a, b),
                ("nonzero", [a]) => self.nonzero(a),
                ("max", [a, dim]) => self.max_dim(a, dim),
                (other, _) => Err(ExecError::unsupported(format!(
                    "torch.{other} with {} arguments is not provided by the reference library",
                    args.len()
                ))),
            },
            Target::Builtin(builtin) => self.call_builtin(*builtin, args),
            other => Err(ExecError::runtime(format!(
                "{other} is not a callable function"
            ))),
        }
    }

    fn call_method(
        &self,
        name: &str,
        receiver: &Value,
        args: &[Value],
        kwargs: &Kwargs<CpuTensor>,
    ) -> ExecResult<Value> {
        match receiver {
            ExampleValue::Tensor(tensor) => self.tensor_method(name, tensor, args, kwargs),
            other => Err(ExecError::runtime(format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            ))),
        }
    }

    fn to_placeholder(&self, tensor: &CpuTensor) -> CpuTensor {
        tensor.to_placeholder()
    }

    fn scalar_tensor(&self, value: Number) -> CpuTensor {
        CpuTensor::scalar(value)
    }

    fn rng_state(&self) -> StdRng {
        self.rng().clone()
    }

    fn set_rng_state(&self, state: StdRng) {
        *self.rng() = state;
    }

    fn enter_placeholder_mode(&self) {
        self.placeholder_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn exit_placeholder_mode(&self) {
        let _ = self
            .placeholder_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1));
    }
}

impl CpuLibrary {
    fn call_builtin(&self, builtin: Builtin, args: &[Value]) -> ExecResult<Value> {
        match (builtin, args) {
            (Builtin::GetItem, [container, index]) => self.getitem(container, index),
            (Builtin::SetItem, [ExampleValue::Tensor(_), _, _]) => Ok(ExampleValue::None),
            (Builtin::Len, [value]) => match value {
                ExampleValue::Tensor(tensor) => tensor
                    .size()
                    .first()
                    .map(|&len| ExampleValue::Int(len as i64))
                    .ok_or_else(|| ExecError::runtime("len() of a 0-d tensor")),
                ExampleValue::Tuple(items) | ExampleValue::List(items) => {
                    Ok(ExampleValue::Int(items.len() as i64))
                }
                ExampleValue::Size(dims) => Ok(ExampleValue::Int(dims.len() as i64)),
                other => Err(ExecError::runtime(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                ))),
            },
            (Builtin::Mod, [a, b]) => match (a, b) {
                (ExampleValue::Int(a), ExampleValue::Int(b)) => {
                    if *b == 0 {
                        return Err(ExecError::runtime("integer modulo by zero"));
                    }
                    Ok(ExampleValue::Int(floor_mod(*a, *b)))
                }
                (a, b) => match (a.as_number(), b.as_number()) {
                    (Some(a), Some(b)) => Ok(ExampleValue::Float(floor_fmod(a.as_f64(), b.as_f64()))),
                    _ => self.elementwise(a, b, floor_fmod, "mod"),
                },
            },
            (Builtin::Seed, []) => {
                let seed = self.rng().gen::<u32>();
                Ok(ExampleValue::Int(i64::from(seed)))
            }
            (Builtin::ManualSeed, [seed]) => {
                let seed = expect_int(seed)?;
                *self.rng() = StdRng::seed_from_u64(seed as u64);
                Ok(ExampleValue::None)
            }
            (Builtin::GetRank, []) => Ok(ExampleValue::Int(0)),
            (Builtin::GetWorldSize, []) => Ok(ExampleValue::Int(1)),
            (Builtin::ElementSize, [ExampleValue::Dtype(dtype)]) => {
                Ok(ExampleValue::Int(dtype.size_in_bytes() as i64))
            }
            (Builtin::MathSqrt, [value]) => {
                let value = expect_number(value)?.as_f64();
                if value < 0.0 {
                    return Err(ExecError::runtime("math domain error"));
                }
                Ok(ExampleValue::Float(value.sqrt()))
            }
            (Builtin::MathPow, [base, exp]) => Ok(ExampleValue::Float(
                expect_number(base)?.as_f64().powf(expect_number(exp)?.as_f64()),
            )),
            (builtin, args) => Err(ExecError::runtime(format!(
                "{} does not accept {} arguments",
                builtin.qualified_name(),
                args.len()
            ))),
        }
    }
}

/// Integer remainder taking the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    ((a % b) + b) % b
}

fn floor_fmod(a: f64, b: f64) -> f64 {
    ((a % b) + b) % b
}

fn promote(a: DType, b: DType) -> DType {
    match (a.is_floating_point(), b.is_floating_point()) {
        (true, false) => a,
        (false, true) => b,
        _ if a.size_in_bytes() >= b.size_in_bytes() => a,
        _ => b,
    }
}

fn number_of(dtype: DType, value: f64) -> Number {
    if dtype == DType::Bool {
        Number::Bool(value != 0.0)
    } else if dtype.is_floating_point() {
        Number::Float(value)
    } else {
        Number::Int(value as i64)
    }
}

fn dense(tensor: &CpuTensor) -> ExecResult<&[f64]> {
    tensor
        .values()
        .ok_or_else(|| ExecError::runtime("cannot read the data of a placeholder tensor"))
}

fn expect_tensor(value: &Value) -> ExecResult<&CpuTensor> {
    value.as_tensor().ok_or_else(|| {
        ExecError::runtime(format!("expected a tensor, got {}", value.type_name()))
    })
}

fn expect_int(value: &Value) -> ExecResult<i64> {
    match value {
        ExampleValue::Int(v) => Ok(*v),
        ExampleValue::Bool(v) => Ok(i64::from(*v)),
        other => Err(ExecError::runtime(format!(
            "expected an int, got {}",
            other.type_name()
        ))),
    }
}

fn expect_number(value: &Value) -> ExecResult<Number> {
    value.as_number().ok_or_else(|| {
        ExecError::runtime(format!(
            "must be real number, not {}",
            value.type_name()
        ))
    })
}

fn normalize_index(index: i64, len: usize) -> ExecResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(ExecError::runtime(format!(
            "index {index} is out of bounds for size {len}"
        )));
    }
    Ok(resolved as usize)
}

fn normalize_dim(dim: i64, ndim: usize) -> ExecResult<usize> {
    normalize_index(dim, ndim.max(1))
        .map_err(|_| ExecError::runtime(format!("dimension {dim} out of range for rank {ndim}")))
}

/// `(outer, len, inner)` element counts around axis `dim`.
fn split_at_dim(size: &[usize], dim: usize) -> (usize, usize, usize) {
    let outer = size[..dim].iter().product();
    let inner = size[dim + 1..].iter().product();
    (outer, size[dim], inner)
}

fn signed_shape_from_args(args: &[Value]) -> ExecResult<Vec<i64>> {
    let items: &[Value] = match args {
        [ExampleValue::Tuple(items)] | [ExampleValue::List(items)] => items,
        [ExampleValue::Size(dims)] => {
            return Ok(dims.iter().map(|&d| d as i64).collect());
        }
        items => items,
    };
    items.iter().map(expect_int).collect()
}

fn shape_from_args(args: &[Value]) -> ExecResult<Vec<usize>> {
    signed_shape_from_args(args)?
        .into_iter()
        .map(|dim| {
            usize::try_from(dim)
                .map_err(|_| ExecError::runtime(format!("negative dimension {dim}")))
        })
        .collect()
}

/// Resolves a single `-1` in a view shape against `numel`.
fn resolve_view(shape: &[i64], numel: usize) -> ExecResult<Vec<usize>> {
    let known: i64 = shape.iter().filter(|&&d| d != -1).product();
    let inferred = shape.iter().filter(|&&d| d == -1).count();
    let resolved: Vec<usize> = match inferred {
        0 => shape.iter().map(|&d| d.max(0) as usize).collect(),
        1 if known > 0 => shape
            .iter()
            .map(|&d| if d == -1 { numel / known as usize } else { d.max(0) as usize })
            .collect(),
        _ => return Err(ExecError::runtime("only one dimension can be inferred")),
    };
    if resolved.iter().product::<usize>() != numel {
        return Err(ExecError::runtime(format!(
            "shape {shape:?} is invalid for input of size {numel}"
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tensor(size: &[usize], values: Vec<f64>) -> Value {
        ExampleValue::Tensor(CpuTensor::from_vec(size, values, DType::F32))
    }

    #[test]
    fn python_modulo_follows_the_divisor_sign() {
        assert_eq!(floor_mod(7, 3), 1);
        assert_eq!(floor_mod(-7, 3), 2);
        assert_eq!(floor_mod(7, -3), -2);
        assert!((floor_fmod(-1.5, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn placeholder_mode_nests_and_skips_the_generator() {
        let library = CpuLibrary::new(3);
        library.enter_placeholder_mode();
        library.enter_placeholder_mode();
        library.exit_placeholder_mode();
        assert!(library.in_placeholder_mode());

        let out = library
            .call_function(
                &Target::function("rand"),
                &[ExampleValue::Int(2)],
                &BTreeMap::new(),
            )
            .expect("rand runs");
        assert!(out.as_tensor().map_or(false, TensorLike::is_placeholder));
        library.exit_placeholder_mode();
        library.exit_placeholder_mode();
        assert!(!library.in_placeholder_mode());
        assert_eq!(library.next_random(), CpuLibrary::new(3).next_random());
    }

    #[test]
    fn item_needs_data() {
        let library = CpuLibrary::default();
        let dense = tensor(&[1], vec![4.0]);
        let item = library
            .call_method("item", &dense, &[], &BTreeMap::new())
            .expect("dense item");
        assert_eq!(item.as_number(), Some(Number::Float(4.0)));

        let placeholder = ExampleValue::Tensor(CpuTensor::placeholder(&[1], DType::F32));
        let err = library
            .call_method("item", &placeholder, &[], &BTreeMap::new())
            .expect_err("placeholder item");
        assert!(matches!(err, ExecError::DataDependentOutput { .. }));
    }

    #[test]
    fn transpose_reorders_values_and_strides() {
        let library = CpuLibrary::default();
        let x = tensor(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let out = library
            .call_method("t", &x, &[], &BTreeMap::new())
            .expect("transpose");
        let out = out.as_tensor().expect("tensor");
        assert_eq!(out.size(), &[3, 2]);
        assert_eq!(out.stride(), &[1, 3]);
        assert_eq!(out.values(), Some(&[1.0, 4.0, 2.0, 5.0, 3.0, 6.0][..]));
    }

    #[test]
    fn view_infers_one_dimension() {
        assert_eq!(resolve_view(&[-1, 2], 6).expect("view"), vec![3, 2]);
        assert!(resolve_view(&[-1, -1], 6).is_err());
        assert!(resolve_view(&[4], 6).is_err());
    }
}
