//! Storage layouts for quantized weights.
//!
//! A layout says which checkpoint keys hold the pieces of a quantized weight,
//! how to turn them back into a float tensor, and optionally how to build a
//! specialised operator for them ([`OperatorFactory`]).

use crate::config::QuantConfig;
use crate::device::Device;
use crate::error::{QuantError, Result};
use crate::model::StateDict;
use crate::ops::LinearOp;
use crate::quant::{dequantize_weight, Int8Linear, QuantizedOp, QuantizedWeight, WeightScale};
use crate::tensor::{DType, FloatTensor, Int8Tensor, Tensor};
use std::collections::BTreeMap;

/// Suffix of the raw quantized data: the layer's `weight` entry itself.
pub const PRIMARY_KEY: &str = "";
pub const WEIGHT_SCALE_KEY: &str = "weight_scale";
pub const INPUT_SCALE_KEY: &str = "input_scale";

/// Full checkpoint key for a layout suffix under a layer prefix such as `"blocks.0.attn."`.
pub fn qualified_key(prefix: &str, suffix: &str) -> String {
    if suffix == PRIMARY_KEY { format!("{}weight", prefix) } else { format!("{}{}", prefix, suffix) }
}

/// Layout metadata accompanying a quantized weight.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutParams {
    pub scale: WeightScale,
    pub orig_dtype: DType,
    /// `[out_features, in_features]`
    pub orig_shape: [usize; 2],
    /// Calibrated input scale if the checkpoint carries one. Forward always
    /// recomputes the scale from the live input.
    pub input_scale: Option<f32>,
}

impl LayoutParams {
    pub fn new(scale: WeightScale, orig_dtype: DType, orig_shape: [usize; 2]) -> Self {
        Self { scale, orig_dtype, orig_shape, input_scale: None }
    }

    pub fn out_features(&self) -> usize { self.orig_shape[0] }
    pub fn in_features(&self) -> usize { self.orig_shape[1] }
}

pub trait Layout: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checkpoint entries for `qdata`, keyed by suffix ([`PRIMARY_KEY`] for the data).
    fn tensors_for_storage(&self, qdata: &QuantizedWeight, params: &LayoutParams) -> BTreeMap<String, Tensor>;

    /// Lossy float reconstruction for consumers without a quantized path.
    fn dequantize(&self, qdata: &QuantizedWeight, params: &LayoutParams) -> Result<FloatTensor>;

    /// Split the entries under `prefix` back into data and params.
    fn load(&self, prefix: &str, sd: &StateDict, orig_dtype: DType) -> Result<(QuantizedWeight, LayoutParams)>;

    /// Operator construction capability, if this layout has one.
    fn operator_factory(&self) -> Option<&dyn OperatorFactory> { None }
}

pub trait OperatorFactory {
    /// Build an operator shaped after `params.orig_shape`. Weights are not
    /// loaded; the caller installs them with [`QuantizedOp::load_weights`].
    fn build_operator(&self, params: &LayoutParams, device: Device, dtype: Option<DType>, bias: bool, opts: &QuantConfig) -> Result<Box<dyn QuantizedOp>>;
}

/// Int8 data with a tensorwise (or per-row) float scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int8TensorwiseLayout;

pub const INT8_TENSORWISE_LAYOUT: &str = "Int8TensorwiseLayout";

impl Layout for Int8TensorwiseLayout {
    fn name(&self) -> &'static str { INT8_TENSORWISE_LAYOUT }

    fn tensors_for_storage(&self, qdata: &QuantizedWeight, params: &LayoutParams) -> BTreeMap<String, Tensor> {
        let mut out = BTreeMap::new();
        out.insert(PRIMARY_KEY.to_string(), Tensor::Int8(qdata.clone()));
        out.insert(WEIGHT_SCALE_KEY.to_string(), Tensor::Float(params.scale.to_tensor()));
        if let Some(s) = params.input_scale {
            out.insert(INPUT_SCALE_KEY.to_string(), Tensor::Float(FloatTensor::scalar(s)));
        }
        out
    }

    fn dequantize(&self, qdata: &QuantizedWeight, params: &LayoutParams) -> Result<FloatTensor> {
        dequantize_weight(qdata, &params.scale)
    }

    fn load(&self, prefix: &str, sd: &StateDict, orig_dtype: DType) -> Result<(QuantizedWeight, LayoutParams)> {
        let wkey = qualified_key(prefix, PRIMARY_KEY);
        let skey = qualified_key(prefix, WEIGHT_SCALE_KEY);
        let qdata: &Int8Tensor = match sd.get(&wkey) {
            Some(Tensor::Int8(t)) => t,
            Some(other) => return Err(QuantError::Config(format!("{} has dtype {:?}, expected i8", wkey, other.dtype()))),
            None => return Err(QuantError::MissingTensor(wkey)),
        };
        let orig_shape = match qdata.shape() {
            [o, i] => [*o, *i],
            other => return Err(QuantError::shape("[out_features, in_features]", other)),
        };
        let scale_t = sd
            .get(&skey)
            .and_then(Tensor::as_float)
            .ok_or(QuantError::MissingTensor(skey))?;
        let scale = WeightScale::from_tensor(scale_t, orig_shape[0])?;
        let mut params = LayoutParams::new(scale, orig_dtype, orig_shape);
        params.input_scale = sd
            .get(&qualified_key(prefix, INPUT_SCALE_KEY))
            .and_then(Tensor::as_float)
            .and_then(|t| t.data().first().copied());
        Ok((qdata.clone(), params))
    }

    fn operator_factory(&self) -> Option<&dyn OperatorFactory> { Some(self) }
}

impl OperatorFactory for Int8TensorwiseLayout {
    fn build_operator(&self, params: &LayoutParams, device: Device, dtype: Option<DType>, bias: bool, opts: &QuantConfig) -> Result<Box<dyn QuantizedOp>> {
        let op = Int8Linear::new(params.in_features(), params.out_features(), bias, device, dtype).with_config(opts);
        Ok(Box::new(op))
    }
}

/// Dense fallback operator for a quantized weight, via [`Layout::dequantize`].
pub fn dequantized_operator(layout: &dyn Layout, qdata: &QuantizedWeight, params: &LayoutParams, bias: Option<FloatTensor>, dtype: Option<DType>) -> Result<Box<dyn LinearOp>> {
    let w = layout.dequantize(qdata, params)?;
    Ok(Box::new(crate::ops::DenseLinear::new(w, bias, dtype.or(Some(params.orig_dtype)))?))
}
