use polars::prelude::*;
use polars::series::ops::NullBehavior;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const TRADING_DAYS: f64 = 252.0;

/// Return and trend statistics for one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub volatility: f64,
    pub annualized_volatility: f64,
    pub market_correlation: f64,
    pub trend_strength: f64,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn tail(values: &[f64], n: usize) -> Vec<f64> {
    values[values.len() - n..].to_vec()
}

fn scalar(df: &DataFrame, name: &str) -> Result<f64> {
    Ok(df.column(name)?.f64()?.get(0).unwrap_or(0.0))
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    finite_or_zero(cov / (var_a.sqrt() * var_b.sqrt()))
}

impl SeriesStats {
    /// Aligns the series on their most recent common length. An empty
    /// `volume` or `market_prices` leaves the dependent metric at zero.
    pub fn compute(prices: &[f64], volume: &[f64], market_prices: &[f64]) -> Result<Self> {
        let has_volume = !volume.is_empty();
        let has_market = !market_prices.is_empty();
        let n = [
            Some(prices.len()),
            has_volume.then_some(volume.len()),
            has_market.then_some(market_prices.len()),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0);
        if n < 2 {
            return Ok(Self::default());
        }

        let mut columns = vec![Series::new("price".into(), tail(prices, n))];
        let mut derived = vec![
            col("price").pct_change(lit(1)).alias("returns"),
            col("price").diff(1, NullBehavior::Ignore).alias("price_change"),
        ];
        if has_volume {
            columns.push(Series::new("volume".into(), tail(volume, n)));
        }
        if has_market {
            columns.push(Series::new("market".into(), tail(market_prices, n)));
            derived.push(col("market").pct_change(lit(1)).alias("market_returns"));
        }

        // the first row has no previous price
        let frame = DataFrame::new(columns)?
            .lazy()
            .with_columns(derived)
            .drop_nulls(None)
            .collect()?;

        let mut aggregates = vec![col("returns").std(0).alias("volatility")];
        if has_volume {
            aggregates.push(
                (col("price_change") * col("volume") / col("volume").mean())
                    .mean()
                    .alias("trend_strength"),
            );
        }
        let summary = frame.clone().lazy().select(aggregates).collect()?;

        let volatility = finite_or_zero(scalar(&summary, "volatility")?);
        let trend_strength = if has_volume {
            finite_or_zero(scalar(&summary, "trend_strength")?)
        } else {
            0.0
        };
        let market_correlation = if has_market {
            let stock: Vec<f64> = frame.column("returns")?.f64()?.into_no_null_iter().collect();
            let market: Vec<f64> = frame
                .column("market_returns")?
                .f64()?
                .into_no_null_iter()
                .collect();
            pearson(&stock, &market)
        } else {
            0.0
        };

        Ok(Self {
            volatility,
            annualized_volatility: volatility * TRADING_DAYS.sqrt(),
            market_correlation,
            trend_strength,
        })
    }
}
