use crate::error::{TraceError, TraceResult};
use crate::library::TensorLike;
use crate::tensor::ConstValue;

use super::{VariableOptions, VariableTracker};

/// Literal Python-level value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantVariable {
    pub value: ConstValue,
    pub options: VariableOptions,
}

impl ConstantVariable {
    pub fn new(value: ConstValue, options: VariableOptions) -> Self {
        ConstantVariable { value, options }
    }

    pub fn none(options: VariableOptions) -> Self {
        ConstantVariable::new(ConstValue::None, options)
    }

    /// `self.value[index]` for a constant tuple.
    pub fn getitem_const<T: TensorLike>(
        &self,
        index: &VariableTracker<T>,
    ) -> TraceResult<VariableTracker<T>> {
        let ConstValue::Tuple(items) = &self.value else {
            return Err(TraceError::not_implemented(format!(
                "subscript of constant {}",
                self.value.type_name()
            )));
        };
        let position = resolve_index(index, items.len())?;
        let mut options = self.options.clone();
        options.guards.extend(&index.options().guards);
        options.source = None;
        Ok(VariableTracker::Constant(ConstantVariable::new(
            items[position].clone(),
            options,
        )))
    }
}

/// Normalizes a constant, possibly negative, index against `len`.
pub(crate) fn resolve_index<T: TensorLike>(
    index: &VariableTracker<T>,
    len: usize,
) -> TraceResult<usize> {
    let raw = index
        .as_python_constant()?
        .as_int()
        .ok_or_else(|| TraceError::not_implemented("non-integer constant index"))?;
    let len_i = len as i64;
    let position = if raw < 0 { raw + len_i } else { raw };
    if position < 0 || position >= len_i {
        return Err(TraceError::unsupported(format!(
            "index {raw} out of range for length {len}"
        )));
    }
    Ok(position as usize)
}
