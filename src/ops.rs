//! Linear operators as the host sees them.

use crate::error::{QuantError, Result};
use crate::tensor::{DType, FloatTensor};
use std::fmt::Debug;

/// `output = input @ weightᵗ + bias` over the last input dimension.
pub trait LinearOp: Send + Sync + Debug {
    fn in_features(&self) -> usize;
    fn out_features(&self) -> usize;
    fn forward(&self, x: &FloatTensor) -> Result<FloatTensor>;
    fn kind(&self) -> &'static str;
}

/// Shape checks shared by every operator: returns the flattened row count.
pub(crate) fn check_input(x: &FloatTensor, in_features: usize) -> Result<usize> {
    if x.shape().is_empty() || x.last_dim() != in_features {
        return Err(QuantError::shape(format!("[..., {}]", in_features), x.shape()));
    }
    Ok(if in_features == 0 { x.shape()[..x.shape().len() - 1].iter().product() } else { x.numel() / in_features })
}

pub(crate) fn output_shape(x: &FloatTensor, out_features: usize) -> Vec<usize> {
    let mut shape = x.shape()[..x.shape().len() - 1].to_vec();
    shape.push(out_features);
    shape
}

/// Full precision reference operator, used for layers left unquantized.
#[derive(Debug, Clone)]
pub struct DenseLinear {
    weight: FloatTensor, // out x in
    bias: Option<Vec<f32>>,
    dtype: Option<DType>,
}

impl DenseLinear {
    pub fn new(weight: FloatTensor, bias: Option<FloatTensor>, dtype: Option<DType>) -> Result<Self> {
        let out_features = match weight.shape() {
            [o, _] => *o,
            other => return Err(QuantError::shape("[out_features, in_features]", other)),
        };
        let bias = match bias {
            Some(b) if b.numel() != out_features => return Err(QuantError::shape(out_features, b.shape())),
            Some(b) => Some(b.into_data()),
            None => None,
        };
        Ok(Self { weight, bias, dtype })
    }
}

impl LinearOp for DenseLinear {
    fn in_features(&self) -> usize { self.weight.shape()[1] }
    fn out_features(&self) -> usize { self.weight.shape()[0] }

    fn forward(&self, x: &FloatTensor) -> Result<FloatTensor> {
        let (n, k) = (self.out_features(), self.in_features());
        let rows = check_input(x, k)?;
        let w = self.weight.data();
        let mut out = vec![0f32; rows * n];
        for r in 0..rows {
            let xr = &x.data()[r * k..(r + 1) * k];
            for j in 0..n {
                let mut sum = self.bias.as_ref().map_or(0.0, |b| b[j]);
                let row = &w[j * k..(j + 1) * k];
                for i in 0..k { sum += row[i] * xr[i]; }
                out[r * n + j] = sum;
            }
        }
        FloatTensor::with_dtype(output_shape(x, n), out, self.dtype.unwrap_or(x.dtype()))
    }

    fn kind(&self) -> &'static str { "dense" }
}
