use chrono::{DateTime, Utc};
use forecasting::{PredictorConfig, TrainingHistory};
use log::{error, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;

const LATENCY_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0];
const TRAINING_BUCKETS: &[f64] = &[10.0, 30.0, 60.0, 120.0, 300.0, 600.0];
const DISTRIBUTION_LIMIT: usize = 500;
const PAGE_SIZE: f64 = 4096.0;

const ACCURACY_KIND: &str = "prediction_accuracy";
const TRAINING_KIND: &str = "training_metrics";

#[derive(Debug, Clone)]
struct Histogram {
    buckets: &'static [f64],
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(buckets: &'static [f64]) -> Self {
        Self {
            buckets,
            counts: vec![0; buckets.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (bound, count) in self.buckets.iter().zip(self.counts.iter_mut()) {
            if value <= *bound {
                *count += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Summary {
    sum: f64,
    count: u64,
}

#[derive(Default)]
struct Registry {
    prediction_requests: BTreeMap<String, u64>,
    prediction_errors: BTreeMap<(String, String), u64>,
    cache_hits: BTreeMap<String, u64>,
    cache_misses: BTreeMap<String, u64>,
    prediction_latency: BTreeMap<String, Histogram>,
    training_duration: BTreeMap<String, Histogram>,
    prediction_accuracy: BTreeMap<(String, String), f64>,
    training_loss: BTreeMap<(String, String), f64>,
    model_size: BTreeMap<String, f64>,
    memory_usage: f64,
    prediction_performance: BTreeMap<(String, String), Summary>,
    distribution: HashMap<String, VecDeque<PredictionSample>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: String,
    pub mape: f64,
    pub accuracy: f64,
    pub rmse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingParameters {
    pub layers: usize,
    pub units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub duration: f64,
    pub history: TrainingHistory,
    pub parameters: TrainingParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub accuracy: f64,
    pub avg_latency: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossHistory {
    pub training: Vec<f64>,
    pub validation: Vec<f64>,
}

/// In-process metric registry plus the per-day JSON metric files.
pub struct Monitoring {
    metrics_dir: PathBuf,
    registry: Mutex<Registry>,
    files: Mutex<()>,
}

/// Records the prediction latency of `symbol` when dropped.
pub struct PredictionTimer<'a> {
    monitoring: &'a Monitoring,
    symbol: String,
    started: Instant,
}

impl Drop for PredictionTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.monitoring
            .registry
            .lock()
            .prediction_latency
            .entry(self.symbol.clone())
            .or_insert_with(|| Histogram::new(LATENCY_BUCKETS))
            .observe(elapsed);
    }
}

fn resident_memory_bytes() -> Option<f64> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * PAGE_SIZE)
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn prom_line(out: &mut String, name: &str, labels: &[(&str, &str)], value: f64) {
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect();
    if rendered.is_empty() {
        let _ = writeln!(out, "{name} {value}");
    } else {
        let _ = writeln!(out, "{name}{{{}}} {value}", rendered.join(","));
    }
}

fn prom_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn prom_histogram(out: &mut String, name: &str, label: &str, series: &BTreeMap<String, Histogram>) {
    for (value, hist) in series {
        for (bound, count) in hist.buckets.iter().zip(&hist.counts) {
            let le = bound.to_string();
            prom_line(
                out,
                &format!("{name}_bucket"),
                &[(label, value.as_str()), ("le", le.as_str())],
                *count as f64,
            );
        }
        prom_line(
            out,
            &format!("{name}_bucket"),
            &[(label, value.as_str()), ("le", "+Inf")],
            hist.count as f64,
        );
        prom_line(out, &format!("{name}_sum"), &[(label, value.as_str())], hist.sum);
        prom_line(out, &format!("{name}_count"), &[(label, value.as_str())], hist.count as f64);
    }
}

impl Monitoring {
    pub fn new(metrics_dir: impl Into<PathBuf>) -> Self {
        Self {
            metrics_dir: metrics_dir.into(),
            registry: Mutex::new(Registry::default()),
            files: Mutex::new(()),
        }
    }

    pub fn record_prediction_request(&self, symbol: &str) {
        *self
            .registry
            .lock()
            .prediction_requests
            .entry(symbol.to_string())
            .or_default() += 1;
    }

    pub fn record_prediction_error(&self, symbol: &str, error_type: &str) {
        *self
            .registry
            .lock()
            .prediction_errors
            .entry((symbol.to_string(), error_type.to_string()))
            .or_default() += 1;
        error!("Prediction error for {symbol}: {error_type}");
    }

    pub fn time_prediction(&self, symbol: &str) -> PredictionTimer<'_> {
        PredictionTimer {
            monitoring: self,
            symbol: symbol.to_string(),
            started: Instant::now(),
        }
    }

    pub fn record_cache_operation(&self, cache_type: &str, hit: bool) {
        let mut registry = self.registry.lock();
        let counters = if hit {
            &mut registry.cache_hits
        } else {
            &mut registry.cache_misses
        };
        *counters.entry(cache_type.to_string()).or_default() += 1;
    }

    pub fn record_performance_metrics(&self, symbol: &str, metrics: &[(&str, f64)]) {
        let mut registry = self.registry.lock();
        for (metric, value) in metrics {
            let summary = registry
                .prediction_performance
                .entry((symbol.to_string(), metric.to_string()))
                .or_default();
            summary.sum += value;
            summary.count += 1;
        }
    }

    /// Keeps the most recent next-day predictions per symbol.
    pub fn record_prediction_distribution(&self, symbol: &str, value: f64, confidence: f64) {
        let mut registry = self.registry.lock();
        let samples = registry.distribution.entry(symbol.to_string()).or_default();
        if samples.len() == DISTRIBUTION_LIMIT {
            samples.pop_front();
        }
        samples.push_back(PredictionSample {
            timestamp: Utc::now(),
            value,
            confidence,
        });
    }

    pub fn prediction_distribution(&self, symbol: &str) -> Vec<PredictionSample> {
        self.registry
            .lock()
            .distribution
            .get(symbol)
            .map(|samples| samples.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn update_model_size(&self, symbol: &str, bytes: u64) {
        self.registry
            .lock()
            .model_size
            .insert(symbol.to_string(), bytes as f64);
    }

    /// Refreshes and returns the resident set size, when the platform exposes it.
    pub fn update_memory_usage(&self) -> f64 {
        let mut registry = self.registry.lock();
        if let Some(bytes) = resident_memory_bytes() {
            registry.memory_usage = bytes;
        }
        registry.memory_usage
    }

    /// Stores MAPE-based accuracy (`100 - MAPE`) along with RMSE and MAE.
    /// Callers guarantee equal, non-empty inputs with no zero actual value.
    pub fn update_prediction_accuracy(
        &self,
        symbol: &str,
        predictions: &[f64],
        actual_values: &[f64],
        timeframe: &str,
    ) -> std::io::Result<AccuracyRecord> {
        let n = predictions.len().min(actual_values.len()).max(1) as f64;
        let pairs = predictions.iter().zip(actual_values);
        let mape = pairs.clone().map(|(p, a)| ((a - p) / a).abs()).sum::<f64>() / n * 100.0;
        let rmse = (pairs.clone().map(|(p, a)| (p - a).powi(2)).sum::<f64>() / n).sqrt();
        let mae = pairs.map(|(p, a)| (p - a).abs()).sum::<f64>() / n;
        let accuracy = 100.0 - mape;

        self.registry
            .lock()
            .prediction_accuracy
            .insert((symbol.to_string(), timeframe.to_string()), accuracy);

        let record = AccuracyRecord {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            mape,
            accuracy,
            rmse,
            mae,
        };
        self.append_record(symbol, ACCURACY_KIND, &record)?;
        Ok(record)
    }

    pub fn record_training_metrics(
        &self,
        symbol: &str,
        duration: f64,
        history: &TrainingHistory,
        config: &PredictorConfig,
    ) -> std::io::Result<()> {
        {
            let mut registry = self.registry.lock();
            registry
                .training_duration
                .entry(symbol.to_string())
                .or_insert_with(|| Histogram::new(TRAINING_BUCKETS))
                .observe(duration);
            if let Some(loss) = history.loss.last() {
                registry
                    .training_loss
                    .insert((symbol.to_string(), "training".to_string()), *loss);
            }
            if let Some(loss) = history.val_loss.last() {
                registry
                    .training_loss
                    .insert((symbol.to_string(), "validation".to_string()), *loss);
            }
        }

        let record = TrainingRecord {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            duration,
            history: history.clone(),
            parameters: TrainingParameters {
                layers: config.n_layers,
                units: config.units,
                dropout: config.dropout,
                learning_rate: config.learning_rate,
            },
        };
        self.append_record(symbol, TRAINING_KIND, &record)
    }

    pub fn performance_summary(&self, symbol: &str, timeframe: &str) -> PerformanceSummary {
        let registry = self.registry.lock();
        let accuracy = registry
            .prediction_accuracy
            .get(&(symbol.to_string(), timeframe.to_string()))
            .copied()
            .unwrap_or(0.0);
        let avg_latency = registry
            .prediction_latency
            .get(symbol)
            .map(|h| h.sum / h.count.max(1) as f64)
            .unwrap_or(0.0);
        let errors: u64 = registry
            .prediction_errors
            .iter()
            .filter(|((s, _), _)| s == symbol)
            .map(|(_, count)| count)
            .sum();
        let requests = registry.prediction_requests.get(symbol).copied().unwrap_or(0);
        let hits = registry.cache_hits.get("prediction").copied().unwrap_or(0);
        let misses = registry.cache_misses.get("prediction").copied().unwrap_or(0);

        PerformanceSummary {
            accuracy,
            avg_latency,
            error_rate: errors as f64 / requests.max(1) as f64,
            cache_hit_rate: hits as f64 / (hits + misses).max(1) as f64,
        }
    }

    pub fn accuracy_history(&self, symbol: &str, timeframe: &str) -> Vec<AccuracyRecord> {
        self.read_records(symbol, ACCURACY_KIND)
            .into_iter()
            .filter_map(|value| serde_json::from_value::<AccuracyRecord>(value).ok())
            .filter(|record| record.timeframe == timeframe)
            .collect()
    }

    /// Loss curves from the most recent training run of `symbol`.
    pub fn latest_loss_history(&self, symbol: &str) -> LossHistory {
        self.read_records(symbol, TRAINING_KIND)
            .pop()
            .and_then(|value| serde_json::from_value::<TrainingRecord>(value).ok())
            .map(|record| LossHistory {
                training: record.history.loss,
                validation: record.history.val_loss,
            })
            .unwrap_or_default()
    }

    fn record_path(&self, symbol: &str, kind: &str) -> PathBuf {
        let day = Utc::now().format("%Y%m%d");
        self.metrics_dir.join(format!("{symbol}_{kind}_{day}.json"))
    }

    fn append_record<T: Serialize>(&self, symbol: &str, kind: &str, record: &T) -> std::io::Result<()> {
        let _guard = self.files.lock();
        fs::create_dir_all(&self.metrics_dir)?;
        let path = self.record_path(symbol, kind);

        let mut records = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Array(items)) => items,
                Ok(single) => vec![single],
                Err(e) => {
                    warn!("Replacing unreadable metrics file {}: {e}", path.display());
                    Vec::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        records.push(serde_json::to_value(record)?);
        fs::write(&path, serde_json::to_vec_pretty(&records)?)
    }

    /// All records of `kind` for `symbol`, oldest file first.
    fn read_records(&self, symbol: &str, kind: &str) -> Vec<Value> {
        let _guard = self.files.lock();
        let prefix = format!("{symbol}_{kind}_");
        let Ok(entries) = fs::read_dir(&self.metrics_dir) else {
            return Vec::new();
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".json"))
            })
            .collect();
        paths.sort();

        let mut records = Vec::new();
        for path in paths {
            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).map_err(|e| e.to_string()));
            match parsed {
                Ok(Value::Array(items)) => records.extend(items),
                Ok(single) => records.push(single),
                Err(e) => warn!("Skipping metrics file {}: {e}", path.display()),
            }
        }
        records
    }

    /// Prometheus text exposition of every metric.
    pub fn render_prometheus(&self) -> String {
        let registry = self.registry.lock();
        let mut out = String::new();

        prom_header(&mut out, "prediction_requests_total", "Total number of prediction requests", "counter");
        for (symbol, count) in &registry.prediction_requests {
            prom_line(&mut out, "prediction_requests_total", &[("symbol", symbol.as_str())], *count as f64);
        }

        prom_header(&mut out, "prediction_errors_total", "Total number of prediction errors", "counter");
        for ((symbol, error_type), count) in &registry.prediction_errors {
            prom_line(
                &mut out,
                "prediction_errors_total",
                &[("symbol", symbol.as_str()), ("error_type", error_type.as_str())],
                *count as f64,
            );
        }

        prom_header(&mut out, "prediction_latency_seconds", "Time spent processing prediction requests", "histogram");
        prom_histogram(&mut out, "prediction_latency_seconds", "symbol", &registry.prediction_latency);

        prom_header(&mut out, "prediction_accuracy_percent", "Model prediction accuracy", "gauge");
        for ((symbol, timeframe), value) in &registry.prediction_accuracy {
            prom_line(
                &mut out,
                "prediction_accuracy_percent",
                &[("symbol", symbol.as_str()), ("timeframe", timeframe.as_str())],
                *value,
            );
        }

        prom_header(&mut out, "training_duration_seconds", "Time spent training models", "histogram");
        prom_histogram(&mut out, "training_duration_seconds", "symbol", &registry.training_duration);

        prom_header(&mut out, "training_loss", "Model training loss", "gauge");
        for ((symbol, phase), value) in &registry.training_loss {
            prom_line(&mut out, "training_loss", &[("symbol", symbol.as_str()), ("phase", phase.as_str())], *value);
        }

        prom_header(&mut out, "model_size_bytes", "Size of saved model files", "gauge");
        for (symbol, value) in &registry.model_size {
            prom_line(&mut out, "model_size_bytes", &[("symbol", symbol.as_str())], *value);
        }

        prom_header(&mut out, "memory_usage_bytes", "Current memory usage of the service", "gauge");
        prom_line(&mut out, "memory_usage_bytes", &[], registry.memory_usage);

        prom_header(&mut out, "cache_hits_total", "Total number of cache hits", "counter");
        for (kind, count) in &registry.cache_hits {
            prom_line(&mut out, "cache_hits_total", &[("type", kind.as_str())], *count as f64);
        }

        prom_header(&mut out, "cache_misses_total", "Total number of cache misses", "counter");
        for (kind, count) in &registry.cache_misses {
            prom_line(&mut out, "cache_misses_total", &[("type", kind.as_str())], *count as f64);
        }

        prom_header(&mut out, "prediction_performance", "Summary of prediction performance metrics", "summary");
        for ((symbol, metric), summary) in &registry.prediction_performance {
            let labels = [("symbol", symbol.as_str()), ("metric", metric.as_str())];
            prom_line(&mut out, "prediction_performance_sum", &labels, summary.sum);
            prom_line(&mut out, "prediction_performance_count", &labels, summary.count as f64);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_metrics_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stockcast-metrics-{}-{name}", std::process::id()))
    }

    #[test]
    fn summary_counts_every_error_type() {
        let monitoring = Monitoring::new(temp_metrics_dir("summary"));
        for _ in 0..4 {
            monitoring.record_prediction_request("AAPL");
        }
        monitoring.record_prediction_error("AAPL", "not_found");
        monitoring.record_prediction_error("AAPL", "invalid_data");
        monitoring.record_cache_operation("prediction", true);
        monitoring.record_cache_operation("prediction", false);
        monitoring.record_cache_operation("prediction", true);
        monitoring.record_cache_operation("training", false);

        let summary = monitoring.performance_summary("AAPL", "1d");
        assert_eq!(summary.error_rate, 0.5);
        assert!((summary.cache_hit_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(summary.accuracy, 0.0);
        assert_eq!(monitoring.performance_summary("MSFT", "1d").error_rate, 0.0);
    }

    #[test]
    fn timer_observes_latency_on_drop() {
        let monitoring = Monitoring::new(temp_metrics_dir("timer"));
        {
            let _timer = monitoring.time_prediction("AAPL");
        }
        let text = monitoring.render_prometheus();
        assert!(text.contains("prediction_latency_seconds_count{symbol=\"AAPL\"} 1"));
        assert!(text.contains("prediction_latency_seconds_bucket{symbol=\"AAPL\",le=\"+Inf\"} 1"));
        assert!(text.contains("# TYPE prediction_latency_seconds histogram"));
    }

    #[test]
    fn accuracy_records_are_appended_and_read_back() {
        let dir = temp_metrics_dir("accuracy");
        let monitoring = Monitoring::new(&dir);

        let record = monitoring
            .update_prediction_accuracy("AAPL", &[110.0, 90.0], &[100.0, 100.0], "1d")
            .unwrap();
        assert!((record.mape - 10.0).abs() < 1e-9);
        assert!((record.accuracy - 90.0).abs() < 1e-9);
        assert!((record.rmse - 10.0).abs() < 1e-9);
        assert!((record.mae - 10.0).abs() < 1e-9);

        monitoring
            .update_prediction_accuracy("AAPL", &[100.0], &[100.0], "1w")
            .unwrap();

        assert_eq!(monitoring.accuracy_history("AAPL", "1d").len(), 1);
        assert_eq!(monitoring.accuracy_history("AAPL", "1w").len(), 1);
        assert!(monitoring.accuracy_history("MSFT", "1d").is_empty());
        assert!((monitoring.performance_summary("AAPL", "1d").accuracy - 90.0).abs() < 1e-9);
        assert!((monitoring.performance_summary("AAPL", "1w").accuracy - 100.0).abs() < 1e-9);
        assert_eq!(monitoring.performance_summary("AAPL", "1m").accuracy, 0.0);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn latest_training_run_provides_loss_history() {
        let dir = temp_metrics_dir("training");
        let monitoring = Monitoring::new(&dir);
        let config = PredictorConfig::default();

        let first = TrainingHistory {
            loss: vec![1.0, 0.5],
            ..TrainingHistory::default()
        };
        let second = TrainingHistory {
            loss: vec![0.4, 0.2],
            val_loss: vec![0.6, 0.3],
            ..TrainingHistory::default()
        };
        monitoring.record_training_metrics("AAPL", 12.0, &first, &config).unwrap();
        monitoring.record_training_metrics("AAPL", 15.0, &second, &config).unwrap();

        let history = monitoring.latest_loss_history("AAPL");
        assert_eq!(history.training, vec![0.4, 0.2]);
        assert_eq!(history.validation, vec![0.6, 0.3]);

        let text = monitoring.render_prometheus();
        assert!(text.contains("training_loss{symbol=\"AAPL\",phase=\"validation\"} 0.3"));
        assert!(text.contains("training_duration_seconds_bucket{symbol=\"AAPL\",le=\"30\"} 2"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn distribution_is_bounded() {
        let monitoring = Monitoring::new(temp_metrics_dir("distribution"));
        for i in 0..(DISTRIBUTION_LIMIT + 10) {
            monitoring.record_prediction_distribution("AAPL", i as f64, 0.9);
        }
        let samples = monitoring.prediction_distribution("AAPL");
        assert_eq!(samples.len(), DISTRIBUTION_LIMIT);
        assert_eq!(samples[0].value, 10.0);
    }
}
