//! Int8 quantization core: kernels, scales, weight producer and the W8A8 operator.
pub mod kernels;
pub mod scale;
pub mod weights;
pub mod linear;

pub use linear::{Int8Linear, QuantizedOp};
pub use scale::WeightScale;
pub use weights::{dequantize_weight, quantize_weight, Granularity, QuantizedWeight};
