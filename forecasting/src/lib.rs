pub mod analytics;
pub mod error;
pub mod lstm;
pub mod predictor;
pub mod scaler;
pub mod signals;

pub use analytics::SeriesStats;
pub use error::{ModelError, Result};
pub use predictor::{Forecast, LstmPredictor, PredictorConfig, TrainingHistory, TrainingParams};
pub use scaler::MinMaxScaler;
