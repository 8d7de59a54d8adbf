// Int8 W8A8 quantized linear layers for diffusion model hosts
pub mod error;
pub mod tensor;
pub mod device;
pub mod config;
pub mod quant;
pub mod ops;
pub mod layout;
pub mod registry;
pub mod model;
pub mod plugin;

pub use config::{QuantConfig, Rounding};
pub use error::{QuantError, Result};
pub use layout::{Int8TensorwiseLayout, Layout, LayoutParams, OperatorFactory};
pub use ops::{DenseLinear, LinearOp};
pub use quant::{Int8Linear, QuantizedOp, WeightScale};
pub use registry::AlgoRegistry;
pub use tensor::{DType, FloatTensor, Int8Tensor, Tensor};
