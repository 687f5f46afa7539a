use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::analytics::SeriesStats;
use crate::error::Result;

/// Minimum confidence for a component to count towards the combined signal.
pub const CONFIDENCE_THRESHOLD: f64 = 0.75;

const ANALYST_WINDOW_DAYS: i64 = 30;
const INSIDER_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystRating {
    #[serde(default)]
    pub firm: String,
    pub rating: String,
    #[serde(default)]
    pub target_price: Option<f64>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderTrade {
    #[serde(rename = "type")]
    pub kind: String,
    pub shares: f64,
    #[serde(default)]
    pub price: Option<f64>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalystAnalysis {
    pub consensus: Signal,
    pub average_target: Option<f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsiderAnalysis {
    pub signal: Signal,
    pub confidence: f64,
    pub net_shares: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalAnalysis {
    pub trend: Trend,
    pub strength: f64,
    pub volatility: f64,
    pub market_correlation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub signal: Signal,
    pub confidence: f64,
}

fn rating_score(rating: &str) -> Option<(Signal, f64)> {
    match rating.trim().to_ascii_uppercase().as_str() {
        "BUY" => Some((Signal::Buy, 1.0)),
        "HOLD" => Some((Signal::Hold, 0.0)),
        "SELL" => Some((Signal::Sell, -1.0)),
        _ => None,
    }
}

/// Recency-weighted consensus of BUY/HOLD/SELL ratings from the last 30 days.
/// Confidence falls with the number of distinct opinions.
pub fn analyze_analyst_ratings(ratings: &[AnalystRating], now: DateTime<Utc>) -> AnalystAnalysis {
    let cutoff = now - Duration::days(ANALYST_WINDOW_DAYS);
    let recent: Vec<(&AnalystRating, Signal, f64)> = ratings
        .iter()
        .filter(|r| r.date >= cutoff)
        .filter_map(|r| rating_score(&r.rating).map(|(signal, score)| (r, signal, score)))
        .collect();

    if recent.is_empty() {
        return AnalystAnalysis {
            consensus: Signal::Neutral,
            average_target: None,
            confidence: 0.0,
        };
    }

    let (mut weighted_sum, mut total_weight) = (0.0, 0.0);
    for (rating, _, score) in &recent {
        let days_old = (now - rating.date).num_days().max(0);
        let weight = 1.0 / (days_old as f64 + 1.0);
        weighted_sum += score * weight;
        total_weight += weight;
    }
    let consensus_score = weighted_sum / total_weight;
    let consensus = if consensus_score >= 0.5 {
        Signal::Buy
    } else if consensus_score <= -0.5 {
        Signal::Sell
    } else {
        Signal::Hold
    };

    let distinct: HashSet<Signal> = recent.iter().map(|(_, signal, _)| *signal).collect();
    let confidence = 1.0 - (distinct.len() as f64 - 1.0) / 2.0;

    let targets: Vec<f64> = recent
        .iter()
        .filter_map(|(r, _, _)| r.target_price)
        .filter(|&t| t != 0.0)
        .collect();
    let average_target = (!targets.is_empty()).then(|| targets.iter().sum::<f64>() / targets.len() as f64);

    AnalystAnalysis {
        consensus,
        average_target,
        confidence,
    }
}

/// Buy/sell share balance of insider trades from the last 90 days.
pub fn analyze_insider_trades(trades: &[InsiderTrade], now: DateTime<Utc>) -> InsiderAnalysis {
    let cutoff = now - Duration::days(INSIDER_WINDOW_DAYS);
    let (mut bought, mut sold) = (0.0, 0.0);
    let mut any_recent = false;
    for trade in trades.iter().filter(|t| t.date >= cutoff) {
        any_recent = true;
        match trade.kind.trim().to_ascii_uppercase().as_str() {
            "BUY" => bought += trade.shares,
            "SELL" => sold += trade.shares,
            _ => {}
        }
    }

    if !any_recent {
        return InsiderAnalysis {
            signal: Signal::Neutral,
            confidence: 0.0,
            net_shares: 0.0,
        };
    }

    let total = bought + sold;
    let (signal, confidence) = if total > 0.0 {
        let buy_ratio = bought / total;
        if buy_ratio >= 0.7 {
            (Signal::Buy, buy_ratio.min(1.0))
        } else if buy_ratio <= 0.3 {
            (Signal::Sell, (1.0 - buy_ratio).min(1.0))
        } else {
            (Signal::Neutral, 0.5)
        }
    } else {
        (Signal::Neutral, 0.0)
    };

    InsiderAnalysis {
        signal,
        confidence,
        net_shares: bought - sold,
    }
}

/// Classifies the volume-weighted trend against return volatility.
pub fn analyze_historical_performance(
    prices: &[f64],
    volume: &[f64],
    market_prices: &[f64],
) -> Result<HistoricalAnalysis> {
    let stats = SeriesStats::compute(prices, volume, market_prices)?;
    let (trend_strength, volatility) = (stats.trend_strength, stats.volatility);

    let (trend, strength) = if trend_strength > volatility {
        (Trend::Bullish, (trend_strength / volatility).abs().min(1.0))
    } else if trend_strength < -volatility {
        (Trend::Bearish, (trend_strength / volatility).abs().min(1.0))
    } else {
        (Trend::Neutral, 0.0)
    };

    Ok(HistoricalAnalysis {
        trend,
        strength,
        volatility,
        market_correlation: stats.market_correlation,
    })
}

/// Confidence-weighted vote of the components that clear
/// [`CONFIDENCE_THRESHOLD`].
pub fn combine_signals(
    analyst: &AnalystAnalysis,
    insider: &InsiderAnalysis,
    historical: &HistoricalAnalysis,
) -> CombinedSignal {
    let mut votes: Vec<(Signal, f64)> = Vec::with_capacity(3);
    if analyst.confidence >= CONFIDENCE_THRESHOLD {
        votes.push((analyst.consensus, analyst.confidence));
    }
    if insider.confidence >= CONFIDENCE_THRESHOLD {
        votes.push((insider.signal, insider.confidence));
    }
    if historical.strength >= CONFIDENCE_THRESHOLD {
        let signal = if historical.trend == Trend::Bullish {
            Signal::Buy
        } else {
            Signal::Sell
        };
        votes.push((signal, historical.strength));
    }

    if votes.is_empty() {
        return CombinedSignal {
            signal: Signal::Neutral,
            confidence: 0.0,
        };
    }

    let weight_of = |wanted: Signal| -> f64 {
        votes
            .iter()
            .filter(|(signal, _)| *signal == wanted)
            .map(|(_, confidence)| confidence)
            .sum()
    };
    let buy = weight_of(Signal::Buy);
    let sell = weight_of(Signal::Sell);
    let total: f64 = votes.iter().map(|(_, confidence)| confidence).sum();

    if buy > sell {
        CombinedSignal {
            signal: Signal::Buy,
            confidence: buy / total,
        }
    } else if sell > buy {
        CombinedSignal {
            signal: Signal::Sell,
            confidence: sell / total,
        }
    } else {
        CombinedSignal {
            signal: Signal::Neutral,
            confidence: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn rating(rating: &str, days_ago: i64, target: Option<f64>) -> AnalystRating {
        AnalystRating {
            firm: "Firm".to_string(),
            rating: rating.to_string(),
            target_price: target,
            date: now() - Duration::days(days_ago),
        }
    }

    fn trade(kind: &str, shares: f64, days_ago: i64) -> InsiderTrade {
        InsiderTrade {
            kind: kind.to_string(),
            shares,
            price: None,
            date: now() - Duration::days(days_ago),
        }
    }

    #[test]
    fn unanimous_recent_buys_are_fully_confident() {
        let ratings = vec![
            rating("BUY", 1, Some(200.0)),
            rating("buy", 5, Some(220.0)),
            rating("SELL", 45, Some(10.0)),
            rating("OUTPERFORM", 2, None),
        ];
        let analysis = analyze_analyst_ratings(&ratings, now());
        assert_eq!(analysis.consensus, Signal::Buy);
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.average_target, Some(210.0));
    }

    #[test]
    fn mixed_ratings_lower_confidence() {
        let ratings = vec![rating("BUY", 0, None), rating("HOLD", 0, None), rating("SELL", 0, None)];
        let analysis = analyze_analyst_ratings(&ratings, now());
        assert_eq!(analysis.consensus, Signal::Hold);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.average_target, None);

        let stale = analyze_analyst_ratings(&[rating("BUY", 31, None)], now());
        assert_eq!(stale.consensus, Signal::Neutral);
    }

    #[test]
    fn insider_buying_pressure() {
        let trades = vec![trade("BUY", 800.0, 10), trade("SELL", 200.0, 20), trade("SELL", 5_000.0, 120)];
        let analysis = analyze_insider_trades(&trades, now());
        assert_eq!(analysis.signal, Signal::Buy);
        assert!((analysis.confidence - 0.8).abs() < 1e-12);
        assert_eq!(analysis.net_shares, 600.0);

        let balanced = analyze_insider_trades(&[trade("BUY", 1.0, 1), trade("SELL", 1.0, 1)], now());
        assert_eq!(balanced.signal, Signal::Neutral);
        assert_eq!(balanced.confidence, 0.5);

        let gifts = analyze_insider_trades(&[trade("GIFT", 10.0, 1)], now());
        assert_eq!(gifts.confidence, 0.0);
    }

    #[test]
    fn rising_prices_read_as_bullish() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let analysis = analyze_historical_performance(&prices, &[1_000.0; 30], &prices).unwrap();
        assert_eq!(analysis.trend, Trend::Bullish);
        assert_eq!(analysis.strength, 1.0);

        let short = analyze_historical_performance(&[1.0], &[], &[]).unwrap();
        assert_eq!(short.trend, Trend::Neutral);
        assert_eq!(short.strength, 0.0);
    }

    #[test]
    fn combination_weights_confident_components() {
        let analyst = AnalystAnalysis {
            consensus: Signal::Buy,
            average_target: None,
            confidence: 1.0,
        };
        let insider = InsiderAnalysis {
            signal: Signal::Sell,
            confidence: 0.8,
            net_shares: -10.0,
        };
        let historical = HistoricalAnalysis {
            trend: Trend::Bullish,
            strength: 0.5,
            volatility: 0.01,
            market_correlation: 0.0,
        };

        let combined = combine_signals(&analyst, &insider, &historical);
        assert_eq!(combined.signal, Signal::Buy);
        assert!((combined.confidence - 1.0 / 1.8).abs() < 1e-12);

        let tie = InsiderAnalysis {
            confidence: 1.0,
            ..insider.clone()
        };
        assert_eq!(
            combine_signals(&analyst, &tie, &historical),
            CombinedSignal {
                signal: Signal::Neutral,
                confidence: 0.5
            }
        );

        let quiet = AnalystAnalysis {
            confidence: 0.5,
            ..analyst
        };
        let quiet_insider = InsiderAnalysis {
            confidence: 0.5,
            ..insider
        };
        assert_eq!(combine_signals(&quiet, &quiet_insider, &historical).confidence, 0.0);
    }
}
