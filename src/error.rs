use thiserror::Error;

/// Errors raised by the quantized layout, operator and registration paths.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuantError {
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("operator used before initialization: {0} not loaded")]
    Uninitialized(&'static str),

    #[error("host quantization API unavailable: {0}")]
    MissingDependency(String),

    #[error("registry update failed: {0}")]
    Registration(String),

    #[error("missing tensor in state dict: {0}")]
    MissingTensor(String),

    #[error("unknown layout: {0}")]
    UnknownLayout(String),

    #[error("invalid scale: {0}")]
    InvalidScale(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("config error: {0}")]
    Config(String),
}

impl QuantError {
    pub fn shape(expected: impl std::fmt::Debug, got: impl std::fmt::Debug) -> Self {
        QuantError::ShapeMismatch { expected: format!("{:?}", expected), got: format!("{:?}", got) }
    }
}

pub type Result<T> = std::result::Result<T, QuantError>;
