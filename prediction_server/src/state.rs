use market_data::config::ServiceConfig;
use market_data::{CacheStore, DataPipeline};
use std::sync::Arc;
use std::time::Duration;

use crate::monitoring::Monitoring;
use crate::registry::ModelRegistry;

/// Shared application state, passed to all route handlers via `axum::extract::State`.
pub struct AppState {
    pub config: ServiceConfig,
    pub pipeline: DataPipeline,
    pub registry: ModelRegistry,
    pub monitoring: Monitoring,
}

impl AppState {
    pub fn new(config: ServiceConfig, cache: Option<Arc<dyn CacheStore>>) -> Arc<Self> {
        let pipeline = DataPipeline::new(
            config.pipeline.clone(),
            cache,
            Duration::from_secs(config.cache.ttl_secs),
        );
        let registry = ModelRegistry::new(
            config.paths.models_dir.clone(),
            config.model.model_cache_size,
        );
        let monitoring = Monitoring::new(config.monitoring.metrics_dir.clone());

        Arc::new(Self {
            config,
            pipeline,
            registry,
            monitoring,
        })
    }
}
