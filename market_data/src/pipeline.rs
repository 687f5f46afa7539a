use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::bar::{Field, PriceBar, RawBar};
use crate::cache::CacheStore;
use crate::cleaner::{fill_missing_values, remove_outliers};
use crate::config::PipelineConfig;
use crate::error::{DataError, Result};
use crate::validator::{normalize_timestamps, validate_historical_data};

/// Validates, cleans and caches incoming price bars.
pub struct DataPipeline {
    config: PipelineConfig,
    cache: Option<Arc<dyn CacheStore>>,
    ttl: Duration,
}

pub fn cache_key(symbol: &str, purpose: &str) -> String {
    format!("stock:{symbol}:{purpose}")
}

impl DataPipeline {
    pub fn new(config: PipelineConfig, cache: Option<Arc<dyn CacheStore>>, ttl: Duration) -> Self {
        Self { config, cache, ttl }
    }

    /// Runs the full cleaning pass and stores the result under
    /// `stock:{symbol}:{purpose}`. Cache failures are logged only.
    pub async fn process_stock_data(
        &self,
        symbol: &str,
        bars: Vec<RawBar>,
        purpose: &str,
    ) -> Result<Vec<PriceBar>> {
        let received = bars.len();
        let mut normalized = normalize_timestamps(bars);

        if self.config.validation_enabled {
            let now = chrono::Utc::now().timestamp();
            validate_historical_data(&normalized, now).map_err(|source| DataError::Invalid {
                symbol: symbol.to_string(),
                source,
            })?;
        } else {
            normalized.retain(|bar| bar.timestamp.is_some());
        }

        let filtered = remove_outliers(normalized, Field::Close, self.config.outlier_threshold);
        let cleaned = fill_missing_values(filtered);
        if cleaned.is_empty() {
            return Err(DataError::Empty(symbol.to_string()));
        }

        debug!(
            "Cleaned {symbol} for {purpose}: {received} bars in, {} out",
            cleaned.len()
        );

        if let Some(cache) = &self.cache {
            let key = cache_key(symbol, purpose);
            let stored = match serde_json::to_string(&cleaned) {
                Ok(json) => cache.set(&key, &json, self.ttl).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = stored {
                warn!("Failed to cache {key}: {e}");
            }
        }

        Ok(cleaned)
    }

    /// Returns previously cleaned bars, if the cache still holds them.
    pub async fn cached_data(&self, symbol: &str, purpose: &str) -> Option<Vec<PriceBar>> {
        let cache = self.cache.as_ref()?;
        let key = cache_key(symbol, purpose);
        match cache.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(bars) => Some(bars),
                Err(e) => {
                    warn!("Discarding unreadable cache entry {key}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup for {key} failed: {e}");
                None
            }
        }
    }

    pub async fn invalidate(&self, symbol: &str, purpose: &str) -> Result<()> {
        if let Some(cache) = &self.cache {
            let key = cache_key(symbol, purpose);
            cache.invalidate(&key).await?;
            info!("Invalidated cache entry {key}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{HistoricalSeries, RawTimestamp};
    use crate::cache::MemoryCache;

    fn bar(ts: i64, close: Option<f64>) -> RawBar {
        RawBar {
            timestamp: RawTimestamp::Seconds(ts),
            open: Some(10.0),
            high: Some(20.0),
            low: Some(5.0),
            close,
            volume: Some(1_000.0),
        }
    }

    fn pipeline(validation_enabled: bool) -> DataPipeline {
        let config = PipelineConfig {
            validation_enabled,
            ..PipelineConfig::default()
        };
        DataPipeline::new(config, Some(Arc::new(MemoryCache::new())), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn cleans_sorts_and_caches() {
        let pipeline = pipeline(true);
        let bars = vec![bar(300, Some(14.0)), bar(100, Some(10.0)), bar(200, None)];

        let cleaned = pipeline.process_stock_data("AAPL", bars, "training").await.unwrap();
        let closes: Vec<f64> = cleaned.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![10.0, 12.0, 14.0]);
        assert_eq!(cleaned[0].timestamp, 100);

        let cached = pipeline.cached_data("AAPL", "training").await.unwrap();
        assert_eq!(cached, cleaned);
        assert!(pipeline.cached_data("AAPL", "prediction").await.is_none());

        pipeline.invalidate("AAPL", "training").await.unwrap();
        assert!(pipeline.cached_data("AAPL", "training").await.is_none());
    }

    #[tokio::test]
    async fn invalid_bars_are_rejected_with_symbol() {
        let pipeline = pipeline(true);
        let err = pipeline
            .process_stock_data("MSFT", vec![bar(100, Some(25.0))], "training")
            .await
            .unwrap_err();
        match err {
            DataError::Invalid { symbol, .. } => assert_eq!(symbol, "MSFT"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn disabled_validation_drops_unparsed_timestamps() {
        let pipeline = pipeline(false);
        let mut bars = vec![bar(100, Some(10.0)), bar(200, Some(11.0))];
        bars.push(RawBar {
            timestamp: RawTimestamp::Text("not a date".into()),
            ..bar(0, Some(12.0))
        });
        let cleaned = pipeline.process_stock_data("IBM", bars, "scan").await.unwrap();
        assert_eq!(cleaned.len(), 2);

        let err = pipeline.process_stock_data("IBM", vec![], "scan").await.unwrap_err();
        assert!(matches!(err, DataError::Empty(_)));
    }

    #[tokio::test]
    async fn prices_only_series_is_cleaned() {
        let series = HistoricalSeries {
            prices: vec![50.0, 51.0, 52.5, 51.5],
            ..HistoricalSeries::default()
        };
        let cleaned = pipeline(true)
            .process_stock_data("SPY", series.to_raw_bars(), "scan")
            .await
            .unwrap();
        assert_eq!(cleaned.len(), 4);
        assert_eq!(cleaned[3].close, 51.5);
        assert!(cleaned.iter().all(|b| b.volume == 0.0));
    }

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(cache_key("AAPL", "prediction"), "stock:AAPL:prediction");
    }
}
