use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five OHLCV columns of a price bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    pub const OHLCV: [Field; 5] = [
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ];

    pub fn index(self) -> usize {
        match self {
            Field::Open => 0,
            Field::High => 1,
            Field::Low => 2,
            Field::Close => 3,
            Field::Volume => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp as it arrives over the wire: unix seconds or a date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Seconds(i64),
    Fractional(f64),
    Text(String),
}

impl fmt::Display for RawTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawTimestamp::Seconds(s) => write!(f, "{s}"),
            RawTimestamp::Fractional(s) => write!(f, "{s}"),
            RawTimestamp::Text(s) => f.write_str(s),
        }
    }
}

/// A price bar as received. Missing values are gaps to be interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub timestamp: RawTimestamp,
    #[serde(default)]
    pub open: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub close: Option<f64>,
    #[serde(default, alias = "vol")]
    pub volume: Option<f64>,
}

/// A bar whose timestamp has been resolved to unix seconds (when possible).
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBar {
    pub timestamp: Option<i64>,
    pub raw_timestamp: RawTimestamp,
    pub values: [Option<f64>; 5],
}

impl NormalizedBar {
    pub fn get(&self, field: Field) -> Option<f64> {
        self.values[field.index()]
    }
}

/// A clean OHLCV bar ready to be fed to a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Open => self.open,
            Field::High => self.high,
            Field::Low => self.low,
            Field::Close => self.close,
            Field::Volume => self.volume,
        }
    }

    pub fn ohlcv(&self) -> [f64; 5] {
        [self.open, self.high, self.low, self.close, self.volume]
    }
}

/// Close/volume/market-index history for one symbol, as sent to the scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSeries {
    pub prices: Vec<f64>,
    #[serde(default)]
    pub volume: Vec<f64>,
    #[serde(default)]
    pub market_prices: Vec<f64>,
}

impl HistoricalSeries {
    /// Builds flat bars (open = high = low = close) indexed by position, one
    /// per price. Volume is aligned on the most recent points; prices older
    /// than the volume history get a volume of 0.
    pub fn to_raw_bars(&self) -> Vec<RawBar> {
        let n = self.prices.len();
        let m = self.volume.len();
        self.prices
            .iter()
            .enumerate()
            .map(|(i, &price)| {
                let volume = (i + m)
                    .checked_sub(n)
                    .and_then(|j| self.volume.get(j))
                    .copied()
                    .unwrap_or(0.0);
                RawBar {
                    timestamp: RawTimestamp::Seconds(i as i64),
                    open: Some(price),
                    high: Some(price),
                    low: Some(price),
                    close: Some(price),
                    volume: Some(volume),
                }
            })
            .collect()
    }
}
