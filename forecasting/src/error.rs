use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model must be trained before making predictions")]
    NotTrained,

    #[error("Scaler must be fitted before transforming data")]
    NotFitted,

    #[error("Insufficient data: need at least {required} bars, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Polars error: {0}")]
    PolarsError(#[from] polars::prelude::PolarsError),

    #[error("Bincode error: {0}")]
    BincodeError(#[from] bincode::Error),

    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
