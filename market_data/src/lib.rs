pub mod bar;
pub mod cache;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod validator;

pub use bar::{Field, HistoricalSeries, NormalizedBar, PriceBar, RawBar, RawTimestamp};
pub use cache::{CacheStore, MemoryCache, RedisCache, build_cache};
pub use config::ServiceConfig;
pub use error::{DataError, Result};
pub use pipeline::{DataPipeline, cache_key};
