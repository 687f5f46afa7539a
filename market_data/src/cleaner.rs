use log::debug;

use crate::bar::{Field, NormalizedBar, PriceBar};

/// Drops bars whose `field` lies `threshold` or more standard deviations from
/// the mean. Bars missing the field are kept for interpolation.
pub fn remove_outliers(bars: Vec<NormalizedBar>, field: Field, threshold: f64) -> Vec<NormalizedBar> {
    let present: Vec<f64> = bars.iter().filter_map(|bar| bar.get(field)).collect();
    if present.is_empty() {
        return bars;
    }

    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let std = (present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std == 0.0 || !std.is_finite() {
        return bars;
    }

    let before = bars.len();
    let kept: Vec<NormalizedBar> = bars
        .into_iter()
        .filter(|bar| match bar.get(field) {
            Some(value) => ((value - mean) / std).abs() < threshold,
            None => true,
        })
        .collect();

    if kept.len() < before {
        debug!("Removed {} outliers on {field}", before - kept.len());
    }
    kept
}

/// Linearly interpolates gaps in every OHLCV column by row position.
/// Gaps before the first or after the last known value take that value.
/// Bars without a resolved timestamp are dropped.
pub fn fill_missing_values(bars: Vec<NormalizedBar>) -> Vec<PriceBar> {
    let bars: Vec<NormalizedBar> = bars.into_iter().filter(|b| b.timestamp.is_some()).collect();

    let columns: Vec<Vec<f64>> = Field::OHLCV
        .iter()
        .map(|&field| {
            let values: Vec<Option<f64>> = bars.iter().map(|bar| bar.get(field)).collect();
            interpolate(&values)
        })
        .collect();

    bars.iter()
        .enumerate()
        .map(|(row, bar)| PriceBar {
            timestamp: bar.timestamp.unwrap_or_default(),
            open: columns[0][row],
            high: columns[1][row],
            low: columns[2][row],
            close: columns[3][row],
            volume: columns[4][row],
        })
        .collect()
}

fn interpolate(values: &[Option<f64>]) -> Vec<f64> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if let Some(v) = value {
                return *v;
            }
            let pos = known.partition_point(|(k, _)| *k < i);
            let before = pos.checked_sub(1).map(|p| known[p]);
            match (before, known.get(pos).copied()) {
                (Some((i0, v0)), Some((i1, v1))) => {
                    v0 + (v1 - v0) * (i - i0) as f64 / (i1 - i0) as f64
                }
                (Some((_, v0)), None) => v0,
                (None, Some((_, v1))) => v1,
                (None, None) => 0.0,
            }
        })
        .collect()
}
