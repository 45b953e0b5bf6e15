//! Derivative-free search behind an ask/tell boundary.
//!
//! The driver only calls [`Optimizer::ask`], [`Optimizer::tell`] and
//! [`Optimizer::terminated`]; any algorithm that proposes batches of vectors and
//! learns from their losses can be plugged in.

pub mod cma_es;

pub use cma_es::CmaEs;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum OptimizerError {
    #[error("Invalid optimizer settings: {0}")]
    InvalidSettings(String),
    #[error("tell() called without a pending ask()")]
    NotAsked,
    #[error("Batch has {actual} candidates, {expected} were asked for")]
    BatchSizeMismatch { expected: usize, actual: usize },
    #[error("{actual} losses given for a batch of {expected}")]
    LossCountMismatch { expected: usize, actual: usize },
    #[error("Candidate {index} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Loss of candidate {index} is not finite ({value})")]
    InvalidLoss { index: usize, value: f64 },
}

/// Why a search stopped proposing candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    MaxGenerations(usize),
    TolX,
    TolFun,
    Degenerate(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxGenerations(n) => write!(f, "generation limit ({n}) reached"),
            Self::TolX => write!(f, "step size below tol_x"),
            Self::TolFun => write!(f, "loss range below tol_fun"),
            Self::Degenerate(reason) => write!(f, "numerically degenerate ({reason})"),
        }
    }
}

/// A population-based minimizer driven in ask/tell fashion.
///
/// `tell` must receive every loss of the batch returned by the preceding `ask`,
/// in the same order.
pub trait Optimizer: Send {
    fn ask(&mut self) -> Vec<Vec<f64>>;
    fn tell(&mut self, batch: &[Vec<f64>], losses: &[f64]) -> Result<(), OptimizerError>;
    fn terminated(&self) -> bool;
}

/// A reproducible standard-normal starting point.
pub fn standard_normal_vector(dim: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..dim)
        .map(|_| {
            let v: f64 = StandardNormal.sample(&mut rng);
            v
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_normal_vector_is_seeded() {
        let a = standard_normal_vector(27, 7);
        let b = standard_normal_vector(27, 7);
        let c = standard_normal_vector(27, 8);
        assert_eq!(a.len(), 27);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
