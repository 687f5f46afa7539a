use chrono::{DateTime, NaiveDateTime};
use log::warn;
use thiserror::Error;

use crate::bar::{Field, NormalizedBar, RawBar, RawTimestamp};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%d %H:%M:%S"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("no bars supplied")]
    Empty,

    #[error("bar {index}: unrecognised timestamp {raw:?}")]
    UnparsedTimestamp { index: usize, raw: String },

    #[error("bar {index}: timestamp {timestamp} is in the future")]
    FutureTimestamp { index: usize, timestamp: i64 },

    #[error("bar {index}: {field} must be a non-negative number, got {value}")]
    InvalidValue { index: usize, field: Field, value: f64 },

    #[error("bar {index}: open and close must lie within [low, high]")]
    PriceOrder { index: usize },

    #[error("column {field} has no values to interpolate from")]
    NoValues { field: Field },
}

/// Resolves every timestamp to unix seconds and sorts the bars by time.
///
/// Strings are tried as RFC 3339, then `%Y-%m-%dT%H:%M:%S%.fZ`, then
/// `%Y-%m-%d %H:%M:%S`, all read as UTC. Unparseable strings stay unresolved
/// and sort last. The sort is stable.
pub fn normalize_timestamps(bars: Vec<RawBar>) -> Vec<NormalizedBar> {
    let mut normalized: Vec<NormalizedBar> = bars
        .into_iter()
        .map(|bar| NormalizedBar {
            timestamp: parse_timestamp(&bar.timestamp),
            values: [bar.open, bar.high, bar.low, bar.close, bar.volume],
            raw_timestamp: bar.timestamp,
        })
        .collect();
    normalized.sort_by_key(|bar| bar.timestamp.unwrap_or(i64::MAX));
    normalized
}

pub fn parse_timestamp(raw: &RawTimestamp) -> Option<i64> {
    match raw {
        RawTimestamp::Seconds(s) => Some(*s),
        RawTimestamp::Fractional(s) if s.is_finite() => Some(s.trunc() as i64),
        RawTimestamp::Fractional(_) => None,
        RawTimestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(dt.timestamp());
            }
            TIMESTAMP_FORMATS.iter().find_map(|format| {
                NaiveDateTime::parse_from_str(text, format)
                    .ok()
                    .map(|dt| dt.and_utc().timestamp())
            })
        }
    }
}

/// Checks a single bar. `now` is the current unix time in seconds.
pub fn validate_price_bar(
    index: usize,
    bar: &NormalizedBar,
    now: i64,
) -> Result<(), ValidationError> {
    let timestamp = bar
        .timestamp
        .ok_or_else(|| ValidationError::UnparsedTimestamp {
            index,
            raw: bar.raw_timestamp.to_string(),
        })?;
    if timestamp > now {
        return Err(ValidationError::FutureTimestamp { index, timestamp });
    }

    for field in Field::OHLCV {
        if let Some(value) = bar.get(field) {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidValue {
                    index,
                    field,
                    value,
                });
            }
        }
    }

    if let (Some(open), Some(high), Some(low), Some(close)) = (
        bar.get(Field::Open),
        bar.get(Field::High),
        bar.get(Field::Low),
        bar.get(Field::Close),
    ) {
        let within = |v: f64| low <= v && v <= high;
        if !(within(open) && within(close)) {
            return Err(ValidationError::PriceOrder { index });
        }
    }

    Ok(())
}

pub fn validate_historical_data(bars: &[NormalizedBar], now: i64) -> Result<(), ValidationError> {
    if bars.is_empty() {
        return Err(ValidationError::Empty);
    }

    for (index, bar) in bars.iter().enumerate() {
        if let Err(e) = validate_price_bar(index, bar, now) {
            warn!("Rejecting historical data: {e}");
            return Err(e);
        }
    }

    for field in Field::OHLCV {
        if bars.iter().all(|bar| bar.get(field).is_none()) {
            return Err(ValidationError::NoValues { field });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn bar(timestamp: RawTimestamp, values: [Option<f64>; 5]) -> RawBar {
        RawBar {
            timestamp,
            open: values[0],
            high: values[1],
            low: values[2],
            close: values[3],
            volume: values[4],
        }
    }

    fn full(ts: i64, open: f64, high: f64, low: f64, close: f64) -> RawBar {
        bar(
            RawTimestamp::Seconds(ts),
            [Some(open), Some(high), Some(low), Some(close), Some(1_000.0)],
        )
    }

    #[test]
    fn parses_supported_string_formats() {
        let iso = RawTimestamp::Text("2023-11-14T22:13:20.000Z".to_string());
        let plain = RawTimestamp::Text("2023-11-14 22:13:20".to_string());
        let rfc = RawTimestamp::Text("2023-11-14T23:13:20+01:00".to_string());
        assert_eq!(parse_timestamp(&iso), Some(NOW));
        assert_eq!(parse_timestamp(&plain), Some(NOW));
        assert_eq!(parse_timestamp(&rfc), Some(NOW));
        assert_eq!(parse_timestamp(&RawTimestamp::Text("yesterday".into())), None);
        assert_eq!(parse_timestamp(&RawTimestamp::Fractional(12.9)), Some(12));
    }

    #[test]
    fn normalization_sorts_by_time_and_keeps_unparsed_last() {
        let bars = vec![
            full(300, 1.0, 1.0, 1.0, 1.0),
            bar(RawTimestamp::Text("garbage".into()), [None; 5]),
            full(100, 2.0, 2.0, 2.0, 2.0),
        ];
        let normalized = normalize_timestamps(bars);
        assert_eq!(normalized[0].timestamp, Some(100));
        assert_eq!(normalized[1].timestamp, Some(300));
        assert_eq!(normalized[2].timestamp, None);
    }

    #[test]
    fn accepts_well_formed_history() {
        let normalized = normalize_timestamps(vec![
            full(100, 10.0, 12.0, 9.0, 11.0),
            full(200, 11.0, 11.5, 10.5, 11.0),
        ]);
        assert_eq!(validate_historical_data(&normalized, NOW), Ok(()));
    }

    #[test]
    fn rejects_close_above_high() {
        let normalized = normalize_timestamps(vec![full(100, 10.0, 12.0, 9.0, 13.0)]);
        assert_eq!(
            validate_historical_data(&normalized, NOW),
            Err(ValidationError::PriceOrder { index: 0 })
        );
    }

    #[test]
    fn rejects_negative_volume_and_future_bars() {
        let negative = normalize_timestamps(vec![bar(
            RawTimestamp::Seconds(100),
            [Some(1.0), Some(1.0), Some(1.0), Some(1.0), Some(-5.0)],
        )]);
        assert!(matches!(
            validate_historical_data(&negative, NOW),
            Err(ValidationError::InvalidValue { field: Field::Volume, .. })
        ));

        let future = normalize_timestamps(vec![full(NOW + 60, 1.0, 1.0, 1.0, 1.0)]);
        assert!(matches!(
            validate_historical_data(&future, NOW),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn gaps_are_allowed_but_empty_columns_are_not() {
        let with_gap = normalize_timestamps(vec![
            full(100, 10.0, 12.0, 9.0, 11.0),
            bar(
                RawTimestamp::Seconds(200),
                [Some(11.0), None, Some(10.0), None, Some(500.0)],
            ),
        ]);
        assert_eq!(validate_historical_data(&with_gap, NOW), Ok(()));

        let no_volume = normalize_timestamps(vec![bar(
            RawTimestamp::Seconds(100),
            [Some(1.0), Some(1.0), Some(1.0), Some(1.0), None],
        )]);
        assert_eq!(
            validate_historical_data(&no_volume, NOW),
            Err(ValidationError::NoValues { field: Field::Volume })
        );
        assert_eq!(validate_historical_data(&[], NOW), Err(ValidationError::Empty));
    }
}
