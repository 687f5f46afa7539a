use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_PATH_VAR: &str = "STOCKCAST_CONFIG";
const DEFAULT_LOG_FILE: &str = "stockcast.log";
const DEFAULT_CONFIG_FILE: &str = "stockcast.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub monitoring: MonitoringConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
    pub allowed_origins: Vec<String>,
    /// Empty disables API-key checks.
    pub api_key: String,
    pub api_key_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            env: "development".to_string(),
            allowed_origins: vec!["*".to_string()],
            api_key: String::new(),
            api_key_header: "X-API-Key".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub sequence_length: usize,
    pub prediction_window: usize,
    pub lstm_layers: usize,
    pub lstm_units: usize,
    pub lstm_dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub validation_split: f64,
    pub model_cache_size: usize,
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            sequence_length: 60,
            prediction_window: 7,
            lstm_layers: 2,
            lstm_units: 50,
            lstm_dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 50,
            validation_split: 0.2,
            model_cache_size: 10,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub validation_enabled: bool,
    pub outlier_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            validation_enabled: true,
            outlier_threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackend,
    pub redis_url: String,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_prometheus: bool,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub metrics_dir: PathBuf,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            log_level: "info".to_string(),
            log_file: None,
            metrics_dir: PathBuf::from("metrics"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl ServiceConfig {
    /// Reads `.env`, then the TOML file named by `STOCKCAST_CONFIG`
    /// (or `stockcast.toml`), then `STOCKCAST_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load(Some(Path::new(&path)))
    }

    /// Layers an optional TOML file and the environment over the defaults.
    /// Nested keys use `__`, e.g. `STOCKCAST_SERVER__PORT=9000`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let cfg = builder
            .add_source(
                Environment::with_prefix("STOCKCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.allowed_origins"),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.paths.models_dir)?;
        std::fs::create_dir_all(&self.paths.logs_dir)?;
        std::fs::create_dir_all(&self.monitoring.metrics_dir)?;
        Ok(())
    }

    pub fn model_path(&self, symbol: &str) -> PathBuf {
        self.paths.models_dir.join(symbol)
    }

    /// Log file path: `monitoring.log_file` when set, otherwise
    /// `stockcast.log` under the logs directory.
    pub fn log_path(&self) -> PathBuf {
        self.monitoring
            .log_file
            .clone()
            .unwrap_or_else(|| self.paths.logs_dir.join(DEFAULT_LOG_FILE))
    }

    pub fn is_development(&self) -> bool {
        self.server.env.eq_ignore_ascii_case("development")
    }
}
