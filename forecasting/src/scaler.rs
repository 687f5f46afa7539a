use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Per-column scaling of features into `[0, 1]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinMaxScaler {
    data_min: Option<Array1<f64>>,
    data_range: Option<Array1<f64>>,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.data_min.is_some()
    }

    pub fn fit(&mut self, data: &Array2<f64>) -> Result<()> {
        if data.nrows() == 0 {
            return Err(ModelError::InsufficientData { required: 1, actual: 0 });
        }
        let min = data.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
        let max = data.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
        // constant columns map to 0
        let range = (&max - &min).mapv(|r| if r == 0.0 { 1.0 } else { r });
        self.data_min = Some(min);
        self.data_range = Some(range);
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        let (min, range) = self.params()?;
        if data.ncols() != min.len() {
            return Err(ModelError::InvalidConfig(format!(
                "scaler fitted on {} columns, got {}",
                min.len(),
                data.ncols()
            )));
        }
        Ok((data - min) / range)
    }

    pub fn fit_transform(&mut self, data: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Maps scaled values of one column back to the original units.
    pub fn inverse_transform_column(&self, column: usize, values: &[f64]) -> Result<Vec<f64>> {
        let (min, range) = self.params()?;
        if column >= min.len() {
            return Err(ModelError::InvalidConfig(format!(
                "column {column} out of range for {} features",
                min.len()
            )));
        }
        Ok(values.iter().map(|v| v * range[column] + min[column]).collect())
    }

    fn params(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        match (&self.data_min, &self.data_range) {
            (Some(min), Some(range)) => Ok((min, range)),
            _ => Err(ModelError::NotFitted),
        }
    }
}
