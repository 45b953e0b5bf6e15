use std::fmt;
use thiserror::Error;

use super::config::ConfigError;
use super::optimizer::OptimizerError;
use super::sandbox::SandboxError;
use super::solver::SolverError;
use crate::core::io::bandstructure::DatasetError;
use crate::core::io::npy::NpyError;
use crate::core::io::xml::DocumentError;
use crate::core::loss::LossError;
use crate::core::params::CodecError;

/// Step of the per-candidate pipeline at which an evaluation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Encode,
    Sandbox,
    Solve,
    Load,
    Score,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Encode => "encode",
            Stage::Sandbox => "sandbox",
            Stage::Solve => "solve",
            Stage::Load => "load",
            Stage::Score => "score",
        };
        f.write_str(name)
    }
}

/// Failure of a single candidate evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Loss(#[from] LossError),
}

impl EvaluationError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Codec(_) => Stage::Encode,
            Self::Sandbox(_) => Stage::Sandbox,
            Self::Solver(_) => Stage::Solve,
            Self::Dataset(_) => Stage::Load,
            Self::Loss(_) => Stage::Score,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Solver(SolverError::Cancelled))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Parameter vector file error: {0}")]
    Npy(#[from] NpyError),

    #[error("Parameter encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("Loss setup failed: {0}")]
    Loss(#[from] LossError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Solver setup failed: {0}")]
    Solver(#[from] SolverError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Candidate {candidate} of generation {generation} failed at stage '{stage}': {source}")]
    Evaluation {
        generation: usize,
        candidate: usize,
        stage: Stage,
        source: EvaluationError,
    },

    #[error("Confirmatory evaluation of the best candidate failed at stage '{stage}': {source}")]
    Confirmation {
        stage: Stage,
        source: EvaluationError,
    },

    #[error("Evaluation failed at stage '{stage}': {source}")]
    Trial {
        stage: Stage,
        source: EvaluationError,
    },

    #[error("Run was cancelled")]
    Cancelled,

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("Failed to write report: {0}")]
    Report(String),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}
