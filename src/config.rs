use crate::tensor::DType;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How float values are mapped onto the int8 grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rounding {
    /// Round half away from zero.
    #[default]
    Nearest,
    /// Drop the fractional part (cast toward zero).
    Truncate,
}

impl Rounding {
    #[inline]
    pub fn apply(self, v: f32) -> f32 {
        match self {
            Rounding::Nearest => v.round(),
            Rounding::Truncate => v.trunc(),
        }
    }
}

pub const DEFAULT_ALGO: &str = "int8_tensorwise";
pub const DEFAULT_DISPLAY_NAME: &str = "Load Diffusion Model INT8 (W8A8)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantConfig {
    pub rounding: Rounding,
    /// Batch rows at or above which the matmul is split across threads.
    pub parallel_min_rows: usize,
    pub algo: String,
    pub display_name: String,
    /// Dtype the checkpoint was quantized from, used when the caller names none.
    pub orig_dtype: DType,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            rounding: Rounding::Nearest,
            parallel_min_rows: 64,
            algo: DEFAULT_ALGO.to_string(),
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            orig_dtype: DType::BF16,
        }
    }
}

impl QuantConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(&path).with_context(|| format!("open quant config: {}", path.as_ref().display()))?;
        let cfg = serde_json::from_reader(BufReader::new(f))
            .with_context(|| format!("parse quant config: {}", path.as_ref().display()))?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("parse quant config")
    }
}
