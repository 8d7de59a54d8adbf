use crate::error::{QuantError, Result};
use crate::tensor::FloatTensor;

/// Scale mapping int8 weights back to float magnitude.
#[derive(Debug, Clone, PartialEq)]
pub enum WeightScale {
    /// One scale for the whole tensor.
    Tensor(f32),
    /// One scale per output row.
    PerRow(Vec<f32>),
}

impl WeightScale {
    /// Interpret a stored scale tensor against a weight with `out_features` rows.
    pub fn from_tensor(t: &FloatTensor, out_features: usize) -> Result<Self> {
        let scale = match t.numel() {
            1 => WeightScale::Tensor(t.data()[0]),
            n if n == out_features => WeightScale::PerRow(t.data().to_vec()),
            _ => return Err(QuantError::shape(format!("1 or {} scale values", out_features), t.shape())),
        };
        scale.validate(out_features)?;
        Ok(scale)
    }

    pub fn to_tensor(&self) -> FloatTensor {
        match self {
            WeightScale::Tensor(s) => FloatTensor::scalar(*s),
            WeightScale::PerRow(v) => FloatTensor::vector(v.clone()),
        }
    }

    /// Scale applying to output row `row`.
    #[inline]
    pub fn row(&self, row: usize) -> f32 {
        match self {
            WeightScale::Tensor(s) => *s,
            WeightScale::PerRow(v) => v[row],
        }
    }

    pub fn is_per_row(&self) -> bool { matches!(self, WeightScale::PerRow(_)) }

    /// Check row agreement and that every scale is finite and positive.
    pub fn validate(&self, out_features: usize) -> Result<()> {
        let values: &[f32] = match self {
            WeightScale::Tensor(s) => std::slice::from_ref(s),
            WeightScale::PerRow(v) => {
                if v.len() != out_features {
                    return Err(QuantError::shape(out_features, v.len()));
                }
                v
            }
        };
        if let Some(bad) = values.iter().find(|s| !s.is_finite() || **s <= 0.0) {
            return Err(QuantError::InvalidScale(format!("weight scale must be finite and > 0, got {}", bad)));
        }
        Ok(())
    }
}
