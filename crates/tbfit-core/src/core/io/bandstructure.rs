use nalgebra::DMatrix;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Label used for k-points that are not high-symmetry points.
pub const ORDINARY_POINT_LABEL: &str = "none";

const LABEL_COLUMN: usize = 0;
const DISTANCE_COLUMN: usize = 1;
const KVECTOR_COLUMNS: std::ops::Range<usize> = 2..5;
const FIRST_ENERGY_COLUMN: usize = 5;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV parsing error for '{path}': {source}")]
    Csv { path: String, source: csv::Error },
    #[error("Dataset '{path}' contains no k-points")]
    Empty { path: String },
    #[error("Row {row} of '{path}' has {actual} columns, at least {} are required", FIRST_ENERGY_COLUMN + 1)]
    TooFewColumns {
        path: String,
        row: usize,
        actual: usize,
    },
    #[error("Row {row} of '{path}' has {actual} bands, expected {expected}")]
    Ragged {
        path: String,
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid number '{value}' at row {row}, column {column} of '{path}'")]
    InvalidNumber {
        path: String,
        row: usize,
        column: usize,
        value: String,
    },
    #[error("Energy at row {row}, column {column} of '{path}' is not finite ({value})")]
    NonFiniteEnergy {
        path: String,
        row: usize,
        column: usize,
        value: f64,
    },
    #[error("k-path distance decreases at row {row} of '{path}'")]
    NonMonotonic { path: String, row: usize },
}

/// A band structure sampled along a k-path.
///
/// CSV layout, no header:
///
/// | column | content                                   |
/// |--------|-------------------------------------------|
/// | 0      | high-symmetry label, or `none`            |
/// | 1      | cumulative k-path distance                |
/// | 2-4    | raw k-vector                              |
/// | 5..    | eigen-energies in eV, one column per band |
#[derive(Debug, Clone, PartialEq)]
pub struct BandStructure {
    labels: Vec<String>,
    distances: Vec<f64>,
    k_vectors: Vec<[f64; 3]>,
    energies: DMatrix<f64>,
}

impl BandStructure {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let origin = path.to_string_lossy().to_string();
        let file = std::fs::File::open(path).map_err(|e| DatasetError::Io {
            path: origin.clone(),
            source: e,
        })?;
        Self::from_reader(file, &origin)
    }

    /// Like [`Self::load`], but also rejects non-finite energies, which no trial
    /// could ever be scored against.
    pub fn load_reference(path: &Path) -> Result<Self, DatasetError> {
        let bands = Self::load(path)?;
        bands.ensure_finite(&path.to_string_lossy())?;
        Ok(bands)
    }

    pub fn ensure_finite(&self, origin: &str) -> Result<(), DatasetError> {
        for row in 0..self.n_kpoints() {
            for band in 0..self.n_bands() {
                let value = self.energies[(row, band)];
                if !value.is_finite() {
                    return Err(DatasetError::NonFiniteEnergy {
                        path: origin.to_string(),
                        row,
                        column: FIRST_ENERGY_COLUMN + band,
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R, origin: &str) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut labels = Vec::new();
        let mut distances = Vec::new();
        let mut k_vectors = Vec::new();
        let mut values = Vec::new();
        let mut n_bands = None;

        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(|e| DatasetError::Csv {
                path: origin.to_string(),
                source: e,
            })?;
            if record.len() <= FIRST_ENERGY_COLUMN {
                return Err(DatasetError::TooFewColumns {
                    path: origin.to_string(),
                    row,
                    actual: record.len(),
                });
            }
            let bands = record.len() - FIRST_ENERGY_COLUMN;
            match n_bands {
                None => n_bands = Some(bands),
                Some(expected) if expected != bands => {
                    return Err(DatasetError::Ragged {
                        path: origin.to_string(),
                        row,
                        expected,
                        actual: bands,
                    });
                }
                Some(_) => {}
            }

            let number = |column: usize| -> Result<f64, DatasetError> {
                let raw = &record[column];
                raw.parse::<f64>().map_err(|_| DatasetError::InvalidNumber {
                    path: origin.to_string(),
                    row,
                    column,
                    value: raw.to_string(),
                })
            };

            let distance = number(DISTANCE_COLUMN)?;
            if distances.last().is_some_and(|&prev| distance < prev) {
                return Err(DatasetError::NonMonotonic {
                    path: origin.to_string(),
                    row,
                });
            }

            let mut k = [0.0; 3];
            for (slot, column) in k.iter_mut().zip(KVECTOR_COLUMNS) {
                *slot = number(column)?;
            }
            for column in FIRST_ENERGY_COLUMN..record.len() {
                values.push(number(column)?);
            }

            labels.push(record[LABEL_COLUMN].to_string());
            distances.push(distance);
            k_vectors.push(k);
        }

        let n_bands = n_bands.ok_or_else(|| DatasetError::Empty {
            path: origin.to_string(),
        })?;
        let energies = DMatrix::from_row_slice(labels.len(), n_bands, &values);

        Ok(Self {
            labels,
            distances,
            k_vectors,
            energies,
        })
    }

    pub fn n_kpoints(&self) -> usize {
        self.energies.nrows()
    }

    pub fn n_bands(&self) -> usize {
        self.energies.ncols()
    }

    /// `(N_k, N_bands)`.
    pub fn shape(&self) -> (usize, usize) {
        self.energies.shape()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn distances(&self) -> &[f64] {
        &self.distances
    }

    pub fn k_vectors(&self) -> &[[f64; 3]] {
        &self.k_vectors
    }

    pub fn energies(&self) -> &DMatrix<f64> {
        &self.energies
    }

    /// Distances and labels of the labelled k-points.
    pub fn high_symmetry_points(&self) -> Vec<(f64, &str)> {
        self.labels
            .iter()
            .zip(&self.distances)
            .filter(|(label, _)| label.as_str() != ORDINARY_POINT_LABEL)
            .map(|(label, &distance)| (distance, label.as_str()))
            .collect()
    }

    /// Writes a CSV overlay of this band structure and `fitted`, with a header row:
    /// `distance,label,ref_0..ref_n,fit_0..fit_n`.
    ///
    /// `fitted` must have the same number of k-points.
    pub fn write_overlay(&self, fitted: &BandStructure, path: &Path) -> Result<(), DatasetError> {
        let origin = path.to_string_lossy().to_string();
        let csv_error = |e: csv::Error| DatasetError::Csv {
            path: origin.clone(),
            source: e,
        };
        if fitted.n_kpoints() != self.n_kpoints() {
            return Err(DatasetError::Ragged {
                path: origin.clone(),
                row: fitted.n_kpoints().min(self.n_kpoints()),
                expected: self.n_kpoints(),
                actual: fitted.n_kpoints(),
            });
        }

        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;

        let mut header = vec!["distance".to_string(), "label".to_string()];
        header.extend((0..self.n_bands()).map(|b| format!("ref_{b}")));
        header.extend((0..fitted.n_bands()).map(|b| format!("fit_{b}")));
        writer.write_record(&header).map_err(csv_error)?;

        for row in 0..self.n_kpoints() {
            let mut record = vec![self.distances[row].to_string(), self.labels[row].clone()];
            record.extend(self.energies.row(row).iter().map(f64::to_string));
            record.extend(fitted.energies.row(row).iter().map(f64::to_string));
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer.flush().map_err(|e| DatasetError::Io {
            path: origin.clone(),
            source: e,
        })
    }
}
