//! Dense row-major tensors used by the layout and the operator.
//!
//! Float tensors always keep their values in `f32`; the `dtype` tag says which
//! precision the values are representable in. Tensors tagged `F16`/`BF16` hold
//! values already rounded to that precision.

use crate::error::{QuantError, Result};
use half::{bf16, f16};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    BF16,
    I8,
}

impl DType {
    pub fn is_float(self) -> bool { !matches!(self, DType::I8) }

    /// Round an `f32` to the nearest value representable in this dtype.
    #[inline]
    pub fn round(self, v: f32) -> f32 {
        match self {
            DType::F32 => v,
            DType::F16 => f16::from_f32(v).to_f32(),
            DType::BF16 => bf16::from_f32(v).to_f32(),
            DType::I8 => v.round().clamp(i8::MIN as f32, i8::MAX as f32),
        }
    }
}

pub fn numel(shape: &[usize]) -> usize { shape.iter().product() }

#[derive(Debug, Clone, PartialEq)]
pub struct FloatTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    dtype: DType,
}

impl FloatTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        Self::with_dtype(shape, data, DType::F32)
    }

    /// Build a tensor tagged with `dtype`; values are rounded to that precision.
    pub fn with_dtype(shape: Vec<usize>, mut data: Vec<f32>, dtype: DType) -> Result<Self> {
        if !dtype.is_float() {
            return Err(QuantError::Config(format!("float tensor cannot have dtype {:?}", dtype)));
        }
        if numel(&shape) != data.len() {
            return Err(QuantError::shape(numel(&shape), data.len()));
        }
        if dtype != DType::F32 {
            for v in &mut data { *v = dtype.round(*v); }
        }
        Ok(Self { shape, data, dtype })
    }

    pub fn scalar(v: f32) -> Self { Self { shape: vec![], data: vec![v], dtype: DType::F32 } }

    pub fn vector(data: Vec<f32>) -> Self { Self { shape: vec![data.len()], data, dtype: DType::F32 } }

    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let n = numel(&shape);
        Self { shape, data: vec![0.0; n], dtype }
    }

    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn data(&self) -> &[f32] { &self.data }
    pub fn dtype(&self) -> DType { self.dtype }
    pub fn numel(&self) -> usize { self.data.len() }

    /// Size of the trailing dimension; 1 for scalars.
    pub fn last_dim(&self) -> usize { self.shape.last().copied().unwrap_or(1) }

    pub fn into_data(self) -> Vec<f32> { self.data }

    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        Self::with_dtype(self.shape.clone(), self.data.clone(), dtype)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Int8Tensor {
    shape: Vec<usize>,
    data: Vec<i8>,
}

impl Int8Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<i8>) -> Result<Self> {
        if numel(&shape) != data.len() {
            return Err(QuantError::shape(numel(&shape), data.len()));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] { &self.shape }
    pub fn data(&self) -> &[i8] { &self.data }
    pub fn numel(&self) -> usize { self.data.len() }

    /// Widen to `f32` without scaling.
    pub fn to_float(&self) -> FloatTensor {
        FloatTensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&q| q as f32).collect(),
            dtype: DType::F32,
        }
    }
}

/// A tensor as found in a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Float(FloatTensor),
    Int8(Int8Tensor),
}

impl Tensor {
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Float(t) => t.dtype(),
            Tensor::Int8(_) => DType::I8,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float(t) => t.shape(),
            Tensor::Int8(t) => t.shape(),
        }
    }

    pub fn as_float(&self) -> Option<&FloatTensor> {
        match self { Tensor::Float(t) => Some(t), _ => None }
    }

    pub fn as_int8(&self) -> Option<&Int8Tensor> {
        match self { Tensor::Int8(t) => Some(t), _ => None }
    }
}

impl From<FloatTensor> for Tensor {
    fn from(t: FloatTensor) -> Self { Tensor::Float(t) }
}

impl From<Int8Tensor> for Tensor {
    fn from(t: Int8Tensor) -> Self { Tensor::Int8(t) }
}
