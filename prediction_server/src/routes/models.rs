use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use std::sync::Arc;

use crate::engine;
use crate::error::ApiError;
use crate::misc::{
    AccuracyRequest, EnhancedPredictRequest, EnhancedPredictResponse, PredictRequest,
    PredictResponse, ScanRequest, ScanResponse, TrainRequest, TrainResponse,
};
use crate::monitoring::AccuracyRecord;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/train", post(train))
        .route("/predict", post(predict))
        .route("/predict/enhanced", post(predict_enhanced))
        .route("/scan/blue-chip", post(scan_blue_chip))
        .route("/api/accuracy", post(accuracy))
        .route("/api/symbols", get(symbols))
}

///  POST /train
async fn train(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrainRequest>,
) -> Result<Json<TrainResponse>, ApiError> {
    engine::train_symbol(&state, request).await.map(Json)
}

///  POST /predict
async fn predict(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    engine::predict_symbol(&state, request).await.map(Json)
}

///  POST /predict/enhanced
async fn predict_enhanced(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EnhancedPredictRequest>,
) -> Result<Json<EnhancedPredictResponse>, ApiError> {
    engine::enhanced_prediction(&state, request).await.map(Json)
}

///  POST /scan/blue-chip
async fn scan_blue_chip(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    engine::scan_blue_chip(&state, request).await.map(Json)
}

///  POST /api/accuracy
async fn accuracy(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AccuracyRequest>,
) -> Result<Json<AccuracyRecord>, ApiError> {
    engine::record_accuracy(&state, request).map(Json)
}

///  GET /api/symbols
async fn symbols(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.registry.symbols())
}
