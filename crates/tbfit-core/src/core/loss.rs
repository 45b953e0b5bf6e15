use crate::core::io::bandstructure::BandStructure;
use nalgebra::DMatrix;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LossError {
    #[error(
        "Trial band structure has shape {trial:?} (k-points, bands), reference has {reference:?}"
    )]
    ShapeMismatch {
        reference: (usize, usize),
        trial: (usize, usize),
    },
    #[error("Trial energy at k-point {kpoint}, band {band} is not finite ({value})")]
    NonFiniteEnergy {
        kpoint: usize,
        band: usize,
        value: f64,
    },
    #[error("Invalid loss weights: {0}")]
    InvalidWeights(String),
    #[error("Failed to read loss weights from '{path}': {source}")]
    WeightsFile { path: String, source: csv::Error },
}

/// Per-entry weights over the `(k-point, band)` energy grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LossWeights {
    weights: DMatrix<f64>,
    total: f64,
}

impl LossWeights {
    pub fn new(weights: DMatrix<f64>) -> Result<Self, LossError> {
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(LossError::InvalidWeights(format!(
                "weight {w} is negative or not finite"
            )));
        }
        let total = weights.sum();
        if total <= 0.0 {
            return Err(LossError::InvalidWeights(
                "weights must have a positive sum".to_string(),
            ));
        }
        Ok(Self { weights, total })
    }

    /// Reads a header-less CSV of `N_k` rows by `N_bands` columns.
    pub fn load(path: &Path) -> Result<Self, LossError> {
        let origin = path.to_string_lossy().to_string();
        let csv_error = |e: csv::Error| LossError::WeightsFile {
            path: origin.clone(),
            source: e,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_error)?;

        let mut values = Vec::new();
        let mut n_rows = 0;
        let mut n_cols = 0;
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            n_cols = record.len();
            n_rows += 1;
            for field in record.iter() {
                let w = field.parse::<f64>().map_err(|_| {
                    LossError::InvalidWeights(format!("'{field}' in '{origin}' is not a number"))
                })?;
                values.push(w);
            }
        }
        if n_rows == 0 {
            return Err(LossError::InvalidWeights(format!("'{origin}' is empty")));
        }
        Self::new(DMatrix::from_row_slice(n_rows, n_cols, &values))
    }

    pub fn uniform(n_kpoints: usize, n_bands: usize) -> Self {
        Self {
            weights: DMatrix::from_element(n_kpoints, n_bands, 1.0),
            total: (n_kpoints * n_bands) as f64,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.weights.shape()
    }
}

/// Root-mean-square energy mismatch (eV) against a fixed reference.
#[derive(Debug, Clone)]
pub struct LossEvaluator {
    reference: BandStructure,
    weights: Option<LossWeights>,
}

impl LossEvaluator {
    pub fn new(reference: BandStructure) -> Self {
        Self {
            reference,
            weights: None,
        }
    }

    pub fn with_weights(reference: BandStructure, weights: LossWeights) -> Result<Self, LossError> {
        if weights.shape() != reference.shape() {
            return Err(LossError::InvalidWeights(format!(
                "weights have shape {:?}, reference has {:?}",
                weights.shape(),
                reference.shape()
            )));
        }
        Ok(Self {
            reference,
            weights: Some(weights),
        })
    }

    pub fn reference(&self) -> &BandStructure {
        &self.reference
    }

    pub fn score(&self, trial: &BandStructure) -> Result<f64, LossError> {
        score_energies(
            trial.energies(),
            self.reference.energies(),
            self.weights.as_ref(),
        )
    }
}

/// `sqrt(mean((trial - reference)^2))`, or `sqrt(sum(w d^2) / sum(w))` with weights.
pub fn score_energies(
    trial: &DMatrix<f64>,
    reference: &DMatrix<f64>,
    weights: Option<&LossWeights>,
) -> Result<f64, LossError> {
    if trial.shape() != reference.shape() {
        return Err(LossError::ShapeMismatch {
            reference: reference.shape(),
            trial: trial.shape(),
        });
    }
    for kpoint in 0..trial.nrows() {
        for band in 0..trial.ncols() {
            let value = trial[(kpoint, band)];
            if !value.is_finite() {
                return Err(LossError::NonFiniteEnergy {
                    kpoint,
                    band,
                    value,
                });
            }
        }
    }

    let squared = (trial - reference).map(|d| d * d);
    let loss = match weights {
        Some(w) => (w.weights.component_mul(&squared).sum() / w.total).sqrt(),
        None => (squared.sum() / squared.len() as f64).sqrt(),
    };
    Ok(loss)
}
