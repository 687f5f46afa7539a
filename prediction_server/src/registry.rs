use forecasting::LstmPredictor;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::ApiError;

const MAX_SYMBOL_LEN: usize = 32;

struct Entry {
    model: Arc<LstmPredictor>,
    last_used: u64,
}

#[derive(Default)]
struct Models {
    entries: HashMap<String, Entry>,
    clock: u64,
}

/// Trained models by symbol, bounded by least-recent use, backed by the
/// saved model directories.
pub struct ModelRegistry {
    models_dir: PathBuf,
    capacity: usize,
    models: Mutex<Models>,
    training_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Symbols name directories under the models dir, so only a conservative
/// character set is accepted.
pub fn validate_symbol(symbol: &str) -> Result<(), ApiError> {
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && !symbol.starts_with('.')
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid symbol: {symbol:?}")))
    }
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            models_dir: models_dir.into(),
            capacity: capacity.max(1),
            models: Mutex::new(Models::default()),
            training_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn model_dir(&self, symbol: &str) -> PathBuf {
        self.models_dir.join(symbol)
    }

    pub fn loaded_count(&self) -> usize {
        self.models.lock().entries.len()
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<LstmPredictor>> {
        let mut models = self.models.lock();
        models.clock += 1;
        let now = models.clock;
        models.entries.get_mut(symbol).map(|entry| {
            entry.last_used = now;
            Arc::clone(&entry.model)
        })
    }

    pub fn insert(&self, symbol: &str, model: Arc<LstmPredictor>) {
        let mut models = self.models.lock();
        models.clock += 1;
        let now = models.clock;
        models.entries.insert(
            symbol.to_string(),
            Entry {
                model,
                last_used: now,
            },
        );

        while models.entries.len() > self.capacity {
            let oldest = models
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(name, _)| name.clone());
            match oldest {
                Some(name) => {
                    models.entries.remove(&name);
                    debug!("Evicted model {name} from memory");
                }
                None => break,
            }
        }
    }

    /// Returns the loaded model, loading it from disk on a miss. `None` when
    /// the symbol has never been trained.
    pub async fn get_or_load(&self, symbol: &str) -> Result<Option<Arc<LstmPredictor>>, ApiError> {
        if let Some(model) = self.get(symbol) {
            return Ok(Some(model));
        }

        let dir = self.model_dir(symbol);
        if !LstmPredictor::is_saved(&dir) {
            return Ok(None);
        }

        let loaded = tokio::task::spawn_blocking(move || LstmPredictor::load(&dir)).await??;
        let model = Arc::new(loaded);
        self.insert(symbol, Arc::clone(&model));
        info!("Loaded saved model for {symbol}");
        Ok(Some(model))
    }

    /// Serialises training runs of one symbol.
    pub fn training_lock(&self, symbol: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.training_locks
                .lock()
                .entry(symbol.to_string())
                .or_default(),
        )
    }

    /// Loaded symbols plus every saved model directory, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.models.lock().entries.keys().cloned().collect();
        if let Ok(entries) = std::fs::read_dir(&self.models_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !LstmPredictor::is_saved(&path) {
                    continue;
                }
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    symbols.push(name.to_string());
                }
            }
        }
        symbols.sort();
        symbols.dedup();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecasting::PredictorConfig;

    fn model() -> Arc<LstmPredictor> {
        let config = PredictorConfig {
            sequence_length: 3,
            n_layers: 1,
            units: 2,
            seed: Some(1),
            ..PredictorConfig::default()
        };
        Arc::new(LstmPredictor::new(config).unwrap())
    }

    fn registry(name: &str, capacity: usize) -> ModelRegistry {
        let dir = std::env::temp_dir().join(format!("stockcast-registry-{}-{name}", std::process::id()));
        ModelRegistry::new(dir, capacity)
    }

    #[test]
    fn evicts_least_recently_used() {
        let registry = registry("lru", 2);
        registry.insert("AAPL", model());
        registry.insert("MSFT", model());
        assert!(registry.get("AAPL").is_some());

        registry.insert("GOOG", model());
        assert_eq!(registry.loaded_count(), 2);
        assert!(registry.get("MSFT").is_none());
        assert!(registry.get("AAPL").is_some());
        assert_eq!(registry.symbols(), vec!["AAPL".to_string(), "GOOG".to_string()]);
    }

    #[tokio::test]
    async fn unknown_symbol_is_not_loaded() {
        let registry = registry("unknown", 2);
        assert!(registry.get_or_load("NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn training_lock_is_shared_per_symbol() {
        let registry = registry("locks", 2);
        let first = registry.training_lock("AAPL");
        let _held = first.lock().await;
        assert!(registry.training_lock("AAPL").try_lock().is_err());
        assert!(registry.training_lock("MSFT").try_lock().is_ok());
    }

    #[test]
    fn symbol_validation_rejects_paths() {
        assert!(validate_symbol("AAPL").is_ok());
        assert!(validate_symbol("BRK.B").is_ok());
        assert!(validate_symbol("^GSPC").is_ok());
        assert!(validate_symbol("").is_err());
        assert!(validate_symbol("..").is_err());
        assert!(validate_symbol("../etc").is_err());
        assert!(validate_symbol("a/b").is_err());
    }
}
