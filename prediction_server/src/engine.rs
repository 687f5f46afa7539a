use chrono::Utc;
use forecasting::signals::{
    analyze_analyst_ratings, analyze_historical_performance, analyze_insider_trades, combine_signals,
};
use forecasting::{Forecast, LstmPredictor, PredictorConfig, SeriesStats, TrainingParams};
use futures_util::future::join_all;
use log::{error, info, warn};
use market_data::{HistoricalSeries, PriceBar};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ApiError;
use crate::misc::{
    AccuracyRequest, EnhancedPredictRequest, EnhancedPredictResponse, MetricsResponse, Opportunity,
    PredictRequest, PredictResponse, ResourceUsage, ScanRequest, ScanResponse, SignalAnalysis,
    TrainRequest, TrainResponse,
};
use crate::monitoring::AccuracyRecord;
use crate::registry::validate_symbol;
use crate::state::AppState;

const MAX_PREDICTION_DAYS: usize = 365;
const MAX_WINDOW_SIZE: usize = 1_000;
const SCAN_HORIZON_DAYS: usize = 7;

fn prediction_days(state: &AppState, requested: Option<usize>) -> Result<usize, ApiError> {
    let days = requested.unwrap_or(state.config.model.prediction_window);
    if (1..=MAX_PREDICTION_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ApiError::BadRequest(format!(
            "prediction_days must be between 1 and {MAX_PREDICTION_DAYS}, got {days}"
        )))
    }
}

fn predictor_config(state: &AppState, sequence_length: usize) -> PredictorConfig {
    let model = &state.config.model;
    PredictorConfig {
        sequence_length,
        n_layers: model.lstm_layers,
        units: model.lstm_units,
        dropout: model.lstm_dropout,
        learning_rate: model.learning_rate,
        seed: model.seed,
        ..PredictorConfig::default()
    }
}

fn training_params(state: &AppState) -> TrainingParams {
    let model = &state.config.model;
    TrainingParams {
        epochs: model.epochs,
        batch_size: model.batch_size,
        validation_split: model.validation_split,
    }
}

/// Cleans the bars, trains a fresh model on a blocking thread, saves it
/// and makes it the served model for the symbol.
pub async fn train_symbol(state: &AppState, request: TrainRequest) -> Result<TrainResponse, ApiError> {
    validate_symbol(&request.symbol)?;
    let symbol = request.symbol.clone();
    info!("Training model for {symbol}");
    run_training(state, request)
        .await
        .inspect_err(|e| error!("Training failed for {symbol}: {e}"))
}

async fn run_training(state: &AppState, request: TrainRequest) -> Result<TrainResponse, ApiError> {
    let started = Instant::now();
    let symbol = request.symbol;
    let window_size = request
        .window_size
        .unwrap_or(state.config.model.sequence_length);
    if !(1..=MAX_WINDOW_SIZE).contains(&window_size) {
        return Err(ApiError::BadRequest(format!(
            "window_size must be between 1 and {MAX_WINDOW_SIZE}, got {window_size}"
        )));
    }

    let bars = state
        .pipeline
        .process_stock_data(&symbol, request.historical_data, "training")
        .await?;

    let lock = state.registry.training_lock(&symbol);
    let _training = lock.lock().await;

    let config = predictor_config(state, window_size);
    let params = training_params(state);
    let dir = state.registry.model_dir(&symbol);
    let save_dir = dir.clone();
    let (predictor, history) = tokio::task::spawn_blocking(move || -> forecasting::Result<_> {
        let mut predictor = LstmPredictor::new(config)?;
        let history = predictor.train(&bars, &params)?;
        predictor.save(&save_dir)?;
        Ok((predictor, history))
    })
    .await??;

    let duration = started.elapsed().as_secs_f64();
    if let Err(e) = state
        .monitoring
        .record_training_metrics(&symbol, duration, &history, predictor.config())
    {
        warn!("Failed to write training metrics for {symbol}: {e}");
    }
    match LstmPredictor::saved_size(&dir) {
        Ok(bytes) => state.monitoring.update_model_size(&symbol, bytes),
        Err(e) => warn!("Cannot size saved model for {symbol}: {e}"),
    }
    state.registry.insert(&symbol, Arc::new(predictor));
    info!("Trained model for {symbol} in {duration:.2}s");

    Ok(TrainResponse {
        status: "success",
        symbol,
        training_history: history,
        duration,
    })
}

/// Counts the request, times it and records failures by error type.
pub async fn predict_symbol(state: &AppState, request: PredictRequest) -> Result<PredictResponse, ApiError> {
    validate_symbol(&request.symbol)?;
    let symbol = request.symbol.clone();
    info!("Making predictions for {symbol}");
    state.monitoring.record_prediction_request(&symbol);
    let _timer = state.monitoring.time_prediction(&symbol);

    run_prediction(state, request).await.inspect_err(|e| {
        state.monitoring.record_prediction_error(&symbol, e.kind());
        error!("Prediction failed for {symbol}: {e}");
    })
}

async fn run_prediction(state: &AppState, request: PredictRequest) -> Result<PredictResponse, ApiError> {
    let days = prediction_days(state, request.prediction_days)?;
    let symbol = request.symbol;
    let bars = if request.historical_data.is_empty() {
        cached_bars(state, &symbol).await?
    } else {
        state
            .pipeline
            .process_stock_data(&symbol, request.historical_data, "prediction")
            .await?
    };

    let forecast = forecast(state, &symbol, bars, days).await?;
    record_forecast(state, &symbol, &forecast);

    Ok(PredictResponse {
        symbol,
        predictions: forecast.predictions,
        confidence_scores: forecast.confidence_scores,
        timestamp: Utc::now(),
    })
}

/// Most recent cleaned bars for the symbol, preferring prediction data.
async fn cached_bars(state: &AppState, symbol: &str) -> Result<Vec<PriceBar>, ApiError> {
    let mut found = None;
    for purpose in ["prediction", "training"] {
        if let Some(bars) = state.pipeline.cached_data(symbol, purpose).await {
            found = Some(bars);
            break;
        }
    }
    state
        .monitoring
        .record_cache_operation("prediction", found.is_some());
    found.ok_or_else(|| {
        ApiError::InvalidData(format!(
            "No historical data supplied for {symbol} and none cached"
        ))
    })
}

async fn forecast(
    state: &AppState,
    symbol: &str,
    bars: Vec<PriceBar>,
    days: usize,
) -> Result<Forecast, ApiError> {
    let model = state
        .registry
        .get_or_load(symbol)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No trained model for {symbol}")))?;
    let forecast = tokio::task::spawn_blocking(move || model.predict(&bars, days)).await??;
    Ok(forecast)
}

fn record_forecast(state: &AppState, symbol: &str, forecast: &Forecast) {
    let scores = &forecast.confidence_scores;
    let n = scores.len().max(1) as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std = (scores.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n).sqrt();
    let max = forecast.predictions.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = forecast.predictions.iter().copied().fold(f64::INFINITY, f64::min);
    let range = if forecast.predictions.is_empty() { 0.0 } else { max - min };

    state.monitoring.record_performance_metrics(
        symbol,
        &[
            ("confidence_mean", mean),
            ("confidence_std", std),
            ("prediction_range", range),
        ],
    );
    if let (Some(&value), Some(&confidence)) = (forecast.predictions.first(), scores.first()) {
        state
            .monitoring
            .record_prediction_distribution(symbol, value, confidence);
    }
}

/// Model forecast plus analyst, insider and trend signals.
pub async fn enhanced_prediction(
    state: &AppState,
    request: EnhancedPredictRequest,
) -> Result<EnhancedPredictResponse, ApiError> {
    validate_symbol(&request.symbol)?;
    let symbol = request.symbol.clone();
    info!("Making enhanced predictions for {symbol}");
    state.monitoring.record_prediction_request(&symbol);
    let _timer = state.monitoring.time_prediction(&symbol);

    run_enhanced(state, request).await.inspect_err(|e| {
        state.monitoring.record_prediction_error(&symbol, e.kind());
        error!("Enhanced prediction failed for {symbol}: {e}");
    })
}

async fn run_enhanced(
    state: &AppState,
    request: EnhancedPredictRequest,
) -> Result<EnhancedPredictResponse, ApiError> {
    let days = prediction_days(state, request.prediction_days)?;
    let symbol = request.symbol;
    let series = request.historical_data;

    let bars = state
        .pipeline
        .process_stock_data(&symbol, series.to_raw_bars(), "prediction")
        .await?;
    let forecast = forecast(state, &symbol, bars, days).await?;
    record_forecast(state, &symbol, &forecast);

    let now = Utc::now();
    let wall_street = analyze_analyst_ratings(&request.analyst_ratings, now);
    let insider_trading = analyze_insider_trades(&request.insider_trades, now);
    let historical =
        analyze_historical_performance(&series.prices, &series.volume, &series.market_prices)?;
    let combined = combine_signals(&wall_street, &insider_trading, &historical);

    Ok(EnhancedPredictResponse {
        symbol,
        predictions: forecast.predictions,
        confidence_scores: forecast.confidence_scores,
        signal: combined.signal,
        confidence: combined.confidence,
        analysis: SignalAnalysis {
            wall_street,
            insider_trading,
            historical,
        },
        timestamp: now,
    })
}

/// Evaluates every symbol with data concurrently. Failing symbols are
/// logged and skipped.
pub async fn scan_blue_chip(state: &AppState, request: ScanRequest) -> Result<ScanResponse, ApiError> {
    info!("Scanning {} blue-chip stocks", request.symbols.len());
    let tasks = request.symbols.iter().filter_map(|symbol| {
        let series = request.historical_data.get(symbol)?;
        Some(async move { (symbol, scan_symbol(state, symbol, series).await) })
    });

    let mut opportunities = Vec::new();
    for (symbol, result) in join_all(tasks).await {
        match result {
            Ok(opportunity) => opportunities.push(opportunity),
            Err(e) => error!("Failed to process {symbol}: {e}"),
        }
    }

    Ok(ScanResponse {
        opportunities: rank_opportunities(opportunities, request.min_gain_potential),
        timestamp: Utc::now(),
    })
}

async fn scan_symbol(
    state: &AppState,
    symbol: &str,
    series: &HistoricalSeries,
) -> Result<Opportunity, ApiError> {
    validate_symbol(symbol)?;
    let current_price = series
        .prices
        .last()
        .copied()
        .filter(|p| *p > 0.0)
        .ok_or_else(|| ApiError::InvalidData(format!("No positive current price for {symbol}")))?;

    let bars = state
        .pipeline
        .process_stock_data(symbol, series.to_raw_bars(), "scan")
        .await?;
    let forecast = forecast(state, symbol, bars, SCAN_HORIZON_DAYS).await?;
    let target_price = forecast
        .predictions
        .first()
        .copied()
        .ok_or_else(|| ApiError::Internal(format!("Empty forecast for {symbol}")))?;
    let confidence = forecast.confidence_scores.first().copied().unwrap_or(0.0);

    let potential_gain = (target_price - current_price) / current_price * 100.0;
    let stats = SeriesStats::compute(&series.prices, &series.volume, &series.market_prices)?;
    Ok(Opportunity {
        symbol: symbol.to_string(),
        current_price,
        target_price,
        potential_gain,
        confidence,
        volatility: stats.annualized_volatility,
        market_correlation: stats.market_correlation,
    })
}

/// Keeps opportunities gaining at least `min_gain` percent, best first.
fn rank_opportunities(mut opportunities: Vec<Opportunity>, min_gain: f64) -> Vec<Opportunity> {
    opportunities.retain(|o| o.potential_gain >= min_gain);
    opportunities.sort_by(|a, b| b.potential_gain.total_cmp(&a.potential_gain));
    opportunities
}

pub fn record_accuracy(state: &AppState, request: AccuracyRequest) -> Result<AccuracyRecord, ApiError> {
    validate_symbol(&request.symbol)?;
    if request.predictions.is_empty() || request.predictions.len() != request.actual_values.len() {
        return Err(ApiError::BadRequest(
            "predictions and actual_values must be non-empty and of equal length".to_string(),
        ));
    }
    if request.timeframe.trim().is_empty() {
        return Err(ApiError::BadRequest("timeframe must not be empty".to_string()));
    }
    let finite = request
        .predictions
        .iter()
        .chain(&request.actual_values)
        .all(|v| v.is_finite());
    if !finite || request.actual_values.contains(&0.0) {
        return Err(ApiError::InvalidData(
            "values must be finite and actual values non-zero".to_string(),
        ));
    }

    let record = state.monitoring.update_prediction_accuracy(
        &request.symbol,
        &request.predictions,
        &request.actual_values,
        &request.timeframe,
    )?;
    Ok(record)
}

pub fn symbol_metrics(state: &AppState, symbol: &str, timeframe: &str) -> Result<MetricsResponse, ApiError> {
    validate_symbol(symbol)?;
    let summary = state.monitoring.performance_summary(symbol, timeframe);
    Ok(MetricsResponse {
        accuracy: summary.accuracy,
        avg_latency: summary.avg_latency,
        error_rate: summary.error_rate,
        cache_hit_rate: summary.cache_hit_rate,
        accuracy_history: state.monitoring.accuracy_history(symbol, timeframe),
        loss_history: state.monitoring.latest_loss_history(symbol),
        resource_usage: ResourceUsage {
            memory: state.monitoring.update_memory_usage(),
        },
        prediction_distribution: state.monitoring.prediction_distribution(symbol),
    })
}
