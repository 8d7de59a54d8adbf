use crate::config::{QuantConfig, Rounding};
use crate::device::Device;
use crate::error::{QuantError, Result};
use crate::ops::{check_input, output_shape, LinearOp};
use crate::quant::kernels::{activation_scale, int_mm, int_mm_par, quantize_activations, MAX_EXACT_K};
use crate::quant::scale::WeightScale;
use crate::quant::weights::QuantizedWeight;
use crate::tensor::{DType, FloatTensor};
use std::sync::Arc;

/// W8A8 linear layer: activations are quantized per call, the product is
/// taken in int8 with i32 accumulation, then rescaled to float.
#[derive(Debug, Clone)]
pub struct Int8Linear {
    in_features: usize,
    out_features: usize,
    weight: Option<QuantizedWeight>,
    weight_scale: Option<WeightScale>,
    bias: Option<Vec<f32>>,
    device: Device,
    pool: Option<Arc<rayon::ThreadPool>>,
    dtype: Option<DType>,
    rounding: Rounding,
    parallel_min_rows: usize,
}

/// Operators whose int8 storage is filled in after construction.
pub trait QuantizedOp: LinearOp {
    fn load_weights(&mut self, weight: QuantizedWeight, scale: WeightScale) -> Result<()>;
    fn set_bias(&mut self, bias: FloatTensor) -> Result<()>;
    fn into_linear(self: Box<Self>) -> Box<dyn LinearOp>;
}

impl Int8Linear {
    /// Operator without weights; `forward` fails until [`QuantizedOp::load_weights`].
    /// With `bias` set the bias starts as zeros.
    pub fn new(in_features: usize, out_features: usize, bias: bool, device: Device, dtype: Option<DType>) -> Self {
        let defaults = QuantConfig::default();
        Self {
            in_features,
            out_features,
            weight: None,
            weight_scale: None,
            bias: if bias { Some(vec![0.0; out_features]) } else { None },
            device,
            pool: device.pool(),
            dtype,
            rounding: defaults.rounding,
            parallel_min_rows: defaults.parallel_min_rows,
        }
    }

    pub fn from_parts(weight: QuantizedWeight, scale: WeightScale, bias: Option<FloatTensor>, device: Device, dtype: Option<DType>) -> Result<Self> {
        let (out_features, in_features) = match weight.shape() {
            [o, i] => (*o, *i),
            other => return Err(QuantError::shape("[out_features, in_features]", other)),
        };
        let mut op = Self::new(in_features, out_features, false, device, dtype);
        op.load_weights(weight, scale)?;
        if let Some(b) = bias { op.set_bias(b)?; }
        Ok(op)
    }

    pub fn with_config(mut self, cfg: &QuantConfig) -> Self {
        self.rounding = cfg.rounding;
        self.parallel_min_rows = cfg.parallel_min_rows;
        self
    }

    pub fn weight(&self) -> Option<&QuantizedWeight> { self.weight.as_ref() }
    pub fn weight_scale(&self) -> Option<&WeightScale> { self.weight_scale.as_ref() }
    pub fn bias(&self) -> Option<&[f32]> { self.bias.as_deref() }

    /// Worker threads the matmul is split over.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None if self.device.is_parallel() => rayon::current_num_threads(),
            None => 1,
        }
    }

    pub fn is_initialized(&self) -> bool { self.weight.is_some() && self.weight_scale.is_some() }

    fn loaded(&self) -> Result<(&QuantizedWeight, &WeightScale)> {
        let w = self.weight.as_ref().ok_or(QuantError::Uninitialized("weight"))?;
        let s = self.weight_scale.as_ref().ok_or(QuantError::Uninitialized("weight_scale"))?;
        Ok((w, s))
    }

    fn matmul(&self, xq: &[i8], rows: usize, w: &[i8]) -> Vec<i32> {
        let (k, n) = (self.in_features, self.out_features);
        if self.device.is_parallel() && rows >= self.parallel_min_rows {
            match &self.pool {
                Some(pool) => pool.install(|| int_mm_par(xq, rows, k, w, n)),
                None => int_mm_par(xq, rows, k, w, n),
            }
        } else {
            int_mm(xq, rows, k, w, n)
        }
    }
}

impl LinearOp for Int8Linear {
    fn in_features(&self) -> usize { self.in_features }
    fn out_features(&self) -> usize { self.out_features }

    fn forward(&self, x: &FloatTensor) -> Result<FloatTensor> {
        let (w, ws) = self.loaded()?;
        let rows = check_input(x, self.in_features)?;
        let n = self.out_features;

        let input_scale = activation_scale(x.data());
        let xq = quantize_activations(x.data(), input_scale, self.rounding);
        let acc = self.matmul(&xq, rows, w.data());

        let mut out = Vec::with_capacity(acc.len());
        for row in acc.chunks_exact(n.max(1)).take(rows) {
            for (j, &a) in row.iter().enumerate() {
                let mut v = a as f32 * (input_scale * ws.row(j));
                if let Some(b) = &self.bias { v += b[j]; }
                out.push(v);
            }
        }
        FloatTensor::with_dtype(output_shape(x, n), out, self.dtype.unwrap_or(x.dtype()))
    }

    fn kind(&self) -> &'static str { "int8_w8a8" }
}

impl QuantizedOp for Int8Linear {
    fn load_weights(&mut self, weight: QuantizedWeight, scale: WeightScale) -> Result<()> {
        if weight.shape() != [self.out_features, self.in_features] {
            return Err(QuantError::shape([self.out_features, self.in_features], weight.shape()));
        }
        if self.in_features > MAX_EXACT_K {
            return Err(QuantError::ShapeMismatch {
                expected: format!("in_features <= {}", MAX_EXACT_K),
                got: self.in_features.to_string(),
            });
        }
        scale.validate(self.out_features)?;
        self.weight = Some(weight);
        self.weight_scale = Some(scale);
        Ok(())
    }

    fn set_bias(&mut self, bias: FloatTensor) -> Result<()> {
        if bias.numel() != self.out_features {
            return Err(QuantError::shape(self.out_features, bias.shape()));
        }
        let dtype = self.dtype.unwrap_or(bias.dtype());
        self.bias = Some(bias.into_data().into_iter().map(|v| dtype.round(v)).collect());
        Ok(())
    }

    fn into_linear(self: Box<Self>) -> Box<dyn LinearOp> { self }
}
