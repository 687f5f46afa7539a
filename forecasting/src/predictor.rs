use log::{debug, info};
use market_data::{Field, PriceBar};
use ndarray::{Array1, Array2, Array3, Axis, concatenate, s};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ModelError, Result};
use crate::lstm::{Adam, LstmNetwork};
use crate::scaler::MinMaxScaler;

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.bin";
const CLOSE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub sequence_length: usize,
    pub n_features: usize,
    pub n_layers: usize,
    pub units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            sequence_length: 60,
            n_features: Field::OHLCV.len(),
            n_layers: 2,
            units: 50,
            dropout: 0.2,
            learning_rate: 0.001,
            seed: None,
        }
    }
}

impl PredictorConfig {
    fn validate(&self) -> Result<()> {
        let problem = if self.sequence_length == 0 {
            Some("sequence_length must be positive".to_string())
        } else if self.n_features != Field::OHLCV.len() {
            Some(format!("n_features must be {}", Field::OHLCV.len()))
        } else if self.n_layers == 0 || self.units == 0 {
            Some("n_layers and units must be positive".to_string())
        } else if !(0.0..1.0).contains(&self.dropout) {
            Some(format!("dropout {} outside [0, 1)", self.dropout))
        } else if self.learning_rate <= 0.0 {
            Some("learning_rate must be positive".to_string())
        } else {
            None
        };
        match problem {
            Some(msg) => Err(ModelError::InvalidConfig(msg)),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
        }
    }
}

/// Per-epoch metrics. Validation vectors stay empty when no samples were
/// held out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub mae: Vec<f64>,
    pub val_mae: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub predictions: Vec<f64>,
    pub confidence_scores: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct SavedConfig {
    #[serde(flatten)]
    config: PredictorConfig,
    is_trained: bool,
}

/// LSTM close-price forecaster over OHLCV bars.
#[derive(Debug, Clone)]
pub struct LstmPredictor {
    config: PredictorConfig,
    network: LstmNetwork,
    scaler: MinMaxScaler,
    is_trained: bool,
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn ohlcv_matrix(bars: &[PriceBar]) -> Result<Array2<f64>> {
    let flat: Vec<f64> = bars.iter().flat_map(|bar| bar.ohlcv()).collect();
    Ok(Array2::from_shape_vec((bars.len(), Field::OHLCV.len()), flat)?)
}

fn mse_and_mae(predictions: &Array1<f64>, targets: &Array1<f64>) -> (f64, f64) {
    let diff = predictions - targets;
    let n = diff.len().max(1) as f64;
    (
        diff.mapv(|d| d * d).sum() / n,
        diff.mapv(f64::abs).sum() / n,
    )
}

impl LstmPredictor {
    pub fn new(config: PredictorConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = seeded_rng(config.seed);
        let network = LstmNetwork::new(
            config.n_features,
            config.units,
            config.n_layers,
            config.dropout,
            &mut rng,
        );
        Ok(Self {
            config,
            network,
            scaler: MinMaxScaler::new(),
            is_trained: false,
        })
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Sliding windows over scaled rows: `x[i] = rows[i..i+L]`,
    /// `y[i] = close[i+L]`.
    fn prepare_sequences(&self, scaled: &Array2<f64>) -> (Array3<f64>, Array1<f64>) {
        let len = self.config.sequence_length;
        let samples = scaled.nrows() - len;
        let x = Array3::from_shape_fn((samples, len, self.config.n_features), |(i, t, f)| {
            scaled[[i + t, f]]
        });
        let y = Array1::from_shape_fn(samples, |i| scaled[[i + len, CLOSE]]);
        (x, y)
    }

    /// Fits the scaler on `bars` and trains the network. The last
    /// `validation_split` fraction of windows is held out.
    pub fn train(&mut self, bars: &[PriceBar], params: &TrainingParams) -> Result<TrainingHistory> {
        let required = self.config.sequence_length.checked_add(1).ok_or_else(|| {
            ModelError::InvalidConfig(format!(
                "sequence_length {} too large",
                self.config.sequence_length
            ))
        })?;
        if bars.len() < required {
            return Err(ModelError::InsufficientData {
                required,
                actual: bars.len(),
            });
        }
        if params.epochs == 0 || params.batch_size == 0 {
            return Err(ModelError::InvalidConfig(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&params.validation_split) {
            return Err(ModelError::InvalidConfig(format!(
                "validation_split {} outside [0, 1)",
                params.validation_split
            )));
        }

        let data = ohlcv_matrix(bars)?;
        let scaled = self.scaler.fit_transform(&data)?;
        let (x, y) = self.prepare_sequences(&scaled);

        let samples = y.len();
        let split_at = ((samples as f64 * (1.0 - params.validation_split)).floor() as usize).clamp(1, samples);
        let x_val = x.slice(s![split_at.., .., ..]).to_owned();
        let y_val = y.slice(s![split_at..]).to_owned();

        let mut rng = seeded_rng(self.config.seed.map(|s| s.wrapping_add(1)));
        let mut optimizer = Adam::new(self.config.learning_rate);
        let mut order: Vec<usize> = (0..split_at).collect();
        let mut history = TrainingHistory::default();

        for epoch in 0..params.epochs {
            order.shuffle(&mut rng);
            let (mut loss_sum, mut mae_sum) = (0.0, 0.0);

            for chunk in order.chunks(params.batch_size) {
                let xb = x.select(Axis(0), chunk);
                let yb = y.select(Axis(0), chunk);
                let pass = self.network.run(&xb, Some(&mut rng as &mut dyn RngCore));

                let diff = &pass.predictions - &yb;
                loss_sum += diff.mapv(|d| d * d).sum();
                mae_sum += diff.mapv(f64::abs).sum();

                let d_pred = diff * (2.0 / chunk.len() as f64);
                let grads = self.network.backward(&pass, &d_pred)?;
                self.network.apply(&grads, &mut optimizer);
            }

            let train_n = split_at as f64;
            history.loss.push(loss_sum / train_n);
            history.mae.push(mae_sum / train_n);

            if !y_val.is_empty() {
                let (val_loss, val_mae) = mse_and_mae(&self.network.predict(&x_val), &y_val);
                history.val_loss.push(val_loss);
                history.val_mae.push(val_mae);
            }

            debug!(
                "Epoch {}/{} - loss: {:.6} - val_loss: {:.6}",
                epoch + 1,
                params.epochs,
                history.loss[epoch],
                history.val_loss.last().copied().unwrap_or(f64::NAN)
            );
        }

        self.is_trained = true;
        info!(
            "Trained on {} windows ({} held out) for {} epochs",
            samples,
            samples - split_at,
            params.epochs
        );
        Ok(history)
    }

    /// Predicts `days` closes ahead, feeding each prediction back in as
    /// the newest close. Confidence is `1 / (1 + var(close))` of the
    /// scaled window used for that step.
    pub fn predict(&self, bars: &[PriceBar], days: usize) -> Result<Forecast> {
        if !self.is_trained {
            return Err(ModelError::NotTrained);
        }
        let len = self.config.sequence_length;
        if bars.len() < len {
            return Err(ModelError::InsufficientData {
                required: len,
                actual: bars.len(),
            });
        }

        let scaled = self.scaler.transform(&ohlcv_matrix(bars)?)?;
        let mut window = scaled.slice(s![scaled.nrows() - len.., ..]).to_owned();
        let mut scaled_predictions = Vec::with_capacity(days);
        let mut confidence_scores = Vec::with_capacity(days);

        for _ in 0..days {
            let input = window.clone().insert_axis(Axis(0));
            let next = self.network.predict(&input)[0];
            let variance = window.column(CLOSE).var(0.0);
            scaled_predictions.push(next);
            confidence_scores.push(1.0 / (1.0 + variance));

            let mut row = window.row(len - 1).to_owned();
            row[CLOSE] = next;
            let shifted = concatenate(
                Axis(0),
                &[window.slice(s![1.., ..]), row.view().insert_axis(Axis(0))],
            )?;
            window = shifted;
        }

        let predictions = self.scaler.inverse_transform_column(CLOSE, &scaled_predictions)?;
        Ok(Forecast {
            predictions,
            confidence_scores,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let saved = SavedConfig {
            config: self.config.clone(),
            is_trained: self.is_trained,
        };
        fs::write(dir.join(CONFIG_FILE), serde_json::to_vec_pretty(&saved)?)?;
        fs::write(
            dir.join(WEIGHTS_FILE),
            bincode::serialize(&(&self.network, &self.scaler))?,
        )?;
        debug!("Saved model to {}", dir.display());
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let saved: SavedConfig = serde_json::from_slice(&fs::read(dir.join(CONFIG_FILE))?)?;
        saved.config.validate()?;
        let (network, scaler): (LstmNetwork, MinMaxScaler) =
            bincode::deserialize(&fs::read(dir.join(WEIGHTS_FILE))?)?;
        if network.n_layers() != saved.config.n_layers {
            return Err(ModelError::InvalidConfig(format!(
                "weights have {} layers, config expects {}",
                network.n_layers(),
                saved.config.n_layers
            )));
        }
        Ok(Self {
            config: saved.config,
            network,
            scaler,
            is_trained: saved.is_trained,
        })
    }

    pub fn is_saved(dir: &Path) -> bool {
        dir.join(CONFIG_FILE).is_file() && dir.join(WEIGHTS_FILE).is_file()
    }

    /// Total size in bytes of the saved model files.
    pub fn saved_size(dir: &Path) -> Result<u64> {
        let mut total = 0;
        for name in [CONFIG_FILE, WEIGHTS_FILE] {
            total += fs::metadata(dir.join(name))?.len();
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bars(n: usize) -> Vec<PriceBar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + 10.0 * (i as f64 / 6.0).sin() + 0.1 * i as f64;
                PriceBar {
                    timestamp: 1_600_000_000 + i as i64 * 86_400,
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1_000.0 + 50.0 * (i % 7) as f64,
                }
            })
            .collect()
    }

    fn small_config() -> PredictorConfig {
        PredictorConfig {
            sequence_length: 5,
            n_layers: 1,
            units: 8,
            dropout: 0.0,
            learning_rate: 0.01,
            seed: Some(42),
            ..PredictorConfig::default()
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("stockcast-predictor-{}-{name}", std::process::id()))
    }

    #[test]
    fn training_reduces_loss() {
        let mut predictor = LstmPredictor::new(small_config()).unwrap();
        let params = TrainingParams {
            epochs: 40,
            batch_size: 8,
            validation_split: 0.2,
        };
        let history = predictor.train(&bars(80), &params).unwrap();

        assert!(predictor.is_trained());
        assert_eq!(history.loss.len(), 40);
        assert_eq!(history.val_mae.len(), 40);
        assert!(history.loss[39] < history.loss[0]);
    }

    #[test]
    fn forecast_has_one_score_per_day() {
        let mut predictor = LstmPredictor::new(small_config()).unwrap();
        let params = TrainingParams {
            epochs: 3,
            batch_size: 16,
            validation_split: 0.0,
        };
        let history = predictor.train(&bars(40), &params).unwrap();
        assert!(history.val_loss.is_empty());

        let forecast = predictor.predict(&bars(40), 7).unwrap();
        assert_eq!(forecast.predictions.len(), 7);
        assert_eq!(forecast.confidence_scores.len(), 7);
        assert!(forecast.predictions.iter().all(|p| p.is_finite()));
        assert!(forecast.confidence_scores.iter().all(|&c| c > 0.0 && c <= 1.0));
    }

    #[test]
    fn confidence_follows_close_variance_of_each_window() {
        // Constant close scales to 0, so only fed-back predictions add variance.
        let flat: Vec<PriceBar> = (0..30)
            .map(|i| PriceBar {
                timestamp: 1_600_000_000 + i as i64 * 86_400,
                open: 50.0,
                high: 50.0,
                low: 50.0,
                close: 50.0,
                volume: 1_000.0 + 10.0 * i as f64,
            })
            .collect();
        let mut predictor = LstmPredictor::new(small_config()).unwrap();
        let params = TrainingParams {
            epochs: 2,
            batch_size: 8,
            validation_split: 0.0,
        };
        predictor.train(&flat, &params).unwrap();

        let forecast = predictor.predict(&flat, 2).unwrap();
        assert_eq!(forecast.confidence_scores[0], 1.0);

        // Second window closes are [0, 0, 0, 0, s]: population variance 4s²/25.
        let step = forecast.predictions[0] - 50.0;
        let expected = 1.0 / (1.0 + 4.0 * step * step / 25.0);
        assert!((forecast.confidence_scores[1] - expected).abs() < 1e-9);
    }

    #[test]
    fn predict_requires_training_and_enough_bars() {
        let mut predictor = LstmPredictor::new(small_config()).unwrap();
        assert!(matches!(predictor.predict(&bars(10), 1), Err(ModelError::NotTrained)));

        let err = predictor.train(&bars(5), &TrainingParams::default()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InsufficientData {
                required: 6,
                actual: 5
            }
        ));

        let params = TrainingParams {
            epochs: 1,
            ..TrainingParams::default()
        };
        predictor.train(&bars(20), &params).unwrap();
        assert!(matches!(
            predictor.predict(&bars(3), 1),
            Err(ModelError::InsufficientData { required: 5, .. })
        ));
    }

    #[test]
    fn saved_model_predicts_identically() {
        let dir = temp_dir("roundtrip");
        let mut predictor = LstmPredictor::new(small_config()).unwrap();
        let params = TrainingParams {
            epochs: 2,
            ..TrainingParams::default()
        };
        predictor.train(&bars(30), &params).unwrap();
        predictor.save(&dir).unwrap();

        assert!(LstmPredictor::is_saved(&dir));
        assert!(LstmPredictor::saved_size(&dir).unwrap() > 0);

        let loaded = LstmPredictor::load(&dir).unwrap();
        assert_eq!(loaded.config(), predictor.config());
        assert_eq!(
            loaded.predict(&bars(30), 3).unwrap(),
            predictor.predict(&bars(30), 3).unwrap()
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn oversized_sequence_length_is_rejected_not_overflowed() {
        let config = PredictorConfig {
            sequence_length: usize::MAX,
            ..small_config()
        };
        let mut predictor = LstmPredictor::new(config).unwrap();
        assert!(matches!(
            predictor.train(&bars(20), &TrainingParams::default()),
            Err(ModelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_bad_hyper_parameters() {
        let config = PredictorConfig {
            dropout: 1.0,
            ..small_config()
        };
        assert!(matches!(
            LstmPredictor::new(config),
            Err(ModelError::InvalidConfig(_))
        ));
    }
}
