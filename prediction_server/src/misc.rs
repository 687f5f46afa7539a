use chrono::{DateTime, Utc};
use forecasting::TrainingHistory;
use forecasting::signals::{
    AnalystAnalysis, AnalystRating, HistoricalAnalysis, InsiderAnalysis, InsiderTrade, Signal,
};
use market_data::{HistoricalSeries, RawBar};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::monitoring::{AccuracyRecord, LossHistory, PredictionSample};

#[derive(Debug, Clone, Deserialize)]
pub struct TrainRequest {
    pub symbol: String,
    pub historical_data: Vec<RawBar>,
    /// Defaults to the configured sequence length.
    #[serde(default)]
    pub window_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainResponse {
    pub status: &'static str,
    pub symbol: String,
    pub training_history: TrainingHistory,
    pub duration: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub symbol: String,
    #[serde(default)]
    pub historical_data: Vec<RawBar>,
    /// Defaults to the configured prediction window.
    #[serde(default)]
    pub prediction_days: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub symbol: String,
    pub predictions: Vec<f64>,
    pub confidence_scores: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnhancedPredictRequest {
    pub symbol: String,
    pub historical_data: HistoricalSeries,
    #[serde(default)]
    pub analyst_ratings: Vec<AnalystRating>,
    #[serde(default)]
    pub insider_trades: Vec<InsiderTrade>,
    #[serde(default)]
    pub prediction_days: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalAnalysis {
    pub wall_street: AnalystAnalysis,
    pub insider_trading: InsiderAnalysis,
    pub historical: HistoricalAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhancedPredictResponse {
    pub symbol: String,
    pub predictions: Vec<f64>,
    pub confidence_scores: Vec<f64>,
    pub signal: Signal,
    pub confidence: f64,
    pub analysis: SignalAnalysis,
    pub timestamp: DateTime<Utc>,
}

fn default_min_gain() -> f64 {
    5.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanRequest {
    pub symbols: Vec<String>,
    pub historical_data: HashMap<String, HistoricalSeries>,
    #[serde(default = "default_min_gain")]
    pub min_gain_potential: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub symbol: String,
    pub current_price: f64,
    pub target_price: f64,
    pub potential_gain: f64,
    pub confidence: f64,
    pub volatility: f64,
    pub market_correlation: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResponse {
    pub opportunities: Vec<Opportunity>,
    pub timestamp: DateTime<Utc>,
}

fn default_timeframe() -> String {
    "1d".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccuracyRequest {
    pub symbol: String,
    pub predictions: Vec<f64>,
    pub actual_values: Vec<f64>,
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeframeQuery {
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub memory: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsResponse {
    pub accuracy: f64,
    pub avg_latency: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
    pub accuracy_history: Vec<AccuracyRecord>,
    pub loss_history: LossHistory,
    pub resource_usage: ResourceUsage,
    pub prediction_distribution: Vec<PredictionSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub models_loaded: usize,
    pub memory_usage: f64,
}
