use crate::config::Rounding;
use crate::error::{QuantError, Result};
use crate::quant::kernels::{abs_max, quantize_value, QMAX};
use crate::quant::scale::WeightScale;
use crate::tensor::{FloatTensor, Int8Tensor};

/// Int8 weight, shape `[out_features, in_features]`.
pub type QuantizedWeight = Int8Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Tensor,
    Row,
}

/// Symmetric int8 quantization of a 2D float weight.
///
/// Scale is `max|w| / 127` over the tensor or over each row. A tensor (or row)
/// with no magnitude gets scale 1.0 so dequantization stays exact.
pub fn quantize_weight(w: &FloatTensor, granularity: Granularity, rounding: Rounding) -> Result<(QuantizedWeight, WeightScale)> {
    let (out_features, in_features) = match w.shape() {
        [o, i] => (*o, *i),
        other => return Err(QuantError::shape("[out_features, in_features]", other)),
    };
    let scale_for = |vals: &[f32]| {
        let m = abs_max(vals);
        if m > 0.0 { m / QMAX } else { 1.0 }
    };
    let data = w.data();
    let mut q = Vec::with_capacity(data.len());
    let scale = match granularity {
        Granularity::Tensor => {
            let s = scale_for(data);
            let inv = 1.0 / s;
            q.extend(data.iter().map(|&v| quantize_value(v, inv, rounding)));
            WeightScale::Tensor(s)
        }
        Granularity::Row => {
            let mut scales = Vec::with_capacity(out_features);
            for row in data.chunks(in_features.max(1)).take(out_features) {
                let s = scale_for(row);
                let inv = 1.0 / s;
                q.extend(row.iter().map(|&v| quantize_value(v, inv, rounding)));
                scales.push(s);
            }
            // zero-width rows still carry a scale
            scales.resize(out_features, 1.0);
            WeightScale::PerRow(scales)
        }
    };
    Ok((Int8Tensor::new(vec![out_features, in_features], q)?, scale))
}

/// `q * scale`, broadcasting a per-row scale across each row.
pub fn dequantize_weight(q: &QuantizedWeight, scale: &WeightScale) -> Result<FloatTensor> {
    let out_features = q.shape().first().copied().unwrap_or(1);
    scale.validate(out_features)?;
    let in_features = if out_features == 0 { 0 } else { q.numel() / out_features };
    let data = q
        .data()
        .iter()
        .enumerate()
        .map(|(i, &v)| v as f32 * scale.row(if in_features == 0 { 0 } else { i / in_features }))
        .collect();
    FloatTensor::new(q.shape().to_vec(), data)
}
