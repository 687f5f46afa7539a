use thiserror::Error;

use crate::validator::ValidationError;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Invalid data format for symbol {symbol}: {source}")]
    Invalid {
        symbol: String,
        #[source]
        source: ValidationError,
    },

    #[error("No usable bars left for symbol {0} after cleaning")]
    Empty(String),

    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Config error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DataError>;
