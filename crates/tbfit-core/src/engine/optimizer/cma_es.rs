//! Covariance Matrix Adaptation Evolution Strategy, minimizing.
//!
//! Standard `(mu/mu_w, lambda)` CMA-ES with rank-one and rank-mu covariance
//! updates and cumulative step-size adaptation. The search is unbounded.

use super::{Optimizer, OptimizerError, Termination};
use crate::engine::config::OptimizerConfig;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::{debug, warn};

const FALLBACK_SIGMA: f64 = 0.3;
const MAX_CONDITION: f64 = 1e14;
const EIGEN_FLOOR: f64 = 1e-20;

/// Default population size for dimension `n`: `4 + floor(3 ln n)`.
pub fn default_population_size(n: usize) -> usize {
    4 + (3.0 * (n.max(1) as f64).ln()).floor() as usize
}

/// Default initial step size: `0.3 * ||x0|| / sqrt(n)`, or 0.3 when that is not positive.
pub fn default_initial_sigma(x0: &[f64]) -> f64 {
    let norm = x0.iter().map(|v| v * v).sum::<f64>().sqrt();
    let sigma = 0.3 * norm / (x0.len().max(1) as f64).sqrt();
    if sigma.is_finite() && sigma > 0.0 {
        sigma
    } else {
        FALLBACK_SIGMA
    }
}

/// Eigen decomposition of the covariance, refreshed after every update.
struct Decomposition {
    /// `B * D`, maps standard normal samples to the search distribution.
    bd: DMatrix<f64>,
    /// `C^(-1/2)`.
    c_inv_sqrt: DMatrix<f64>,
    condition: f64,
}

impl Decomposition {
    fn new(covariance: &DMatrix<f64>) -> Self {
        let eigen = SymmetricEigen::new(covariance.clone());
        let max = eigen.eigenvalues.max();
        let min = eigen.eigenvalues.min();
        let sqrt_d = eigen.eigenvalues.map(|v| v.max(EIGEN_FLOOR).sqrt());
        let inv_sqrt_d = sqrt_d.map(|v| 1.0 / v);
        let bd = &eigen.eigenvectors * DMatrix::from_diagonal(&sqrt_d);
        let c_inv_sqrt = &eigen.eigenvectors
            * DMatrix::from_diagonal(&inv_sqrt_d)
            * eigen.eigenvectors.transpose();
        Self {
            bd,
            c_inv_sqrt,
            condition: if min > 0.0 { max / min } else { f64::INFINITY },
        }
    }
}

pub struct CmaEs {
    dimension: usize,
    population_size: usize,
    mu: usize,
    weights: DVector<f64>,
    mu_eff: f64,
    c_c: f64,
    c_sigma: f64,
    c_1: f64,
    c_mu: f64,
    d_sigma: f64,
    expected_norm: f64,

    mean: DVector<f64>,
    sigma: f64,
    covariance: DMatrix<f64>,
    p_c: DVector<f64>,
    p_sigma: DVector<f64>,
    decomposition: Decomposition,

    generation: usize,
    max_generations: usize,
    tol_x: f64,
    tol_fun: f64,
    best_history: Vec<f64>,
    pending: Option<usize>,
    termination: Option<Termination>,
    rng: StdRng,
}

impl CmaEs {
    pub fn new(x0: &[f64], config: &OptimizerConfig) -> Result<Self, OptimizerError> {
        if x0.is_empty() {
            return Err(OptimizerError::InvalidSettings(
                "initial vector is empty".to_string(),
            ));
        }
        if let Some(v) = x0.iter().find(|v| !v.is_finite()) {
            return Err(OptimizerError::InvalidSettings(format!(
                "initial vector contains {v}"
            )));
        }

        let dimension = x0.len();
        let n = dimension as f64;
        let population_size = config
            .population_size
            .unwrap_or_else(|| default_population_size(dimension));
        if population_size == 0 {
            return Err(OptimizerError::InvalidSettings(
                "population size must be at least 1".to_string(),
            ));
        }
        let sigma = match config.initial_sigma {
            Some(s) if s.is_finite() && s > 0.0 => s,
            Some(s) => {
                return Err(OptimizerError::InvalidSettings(format!(
                    "initial sigma {s} is not positive"
                )));
            }
            None => default_initial_sigma(x0),
        };

        let mu = (population_size / 2).max(1);
        let raw_weights: Vec<f64> = (0..mu)
            .map(|i| (mu as f64 + 0.5).ln() - ((i + 1) as f64).ln())
            .collect();
        let w_sum: f64 = raw_weights.iter().sum();
        let weights = DVector::from_iterator(mu, raw_weights.iter().map(|w| w / w_sum));
        let mu_eff = 1.0 / weights.iter().map(|w| w * w).sum::<f64>();

        let c_sigma = (mu_eff + 2.0) / (n + mu_eff + 5.0);
        let d_sigma = 1.0 + 2.0 * (((mu_eff - 1.0) / (n + 1.0)).sqrt() - 1.0).max(0.0) + c_sigma;
        let c_c = (4.0 + mu_eff / n) / (n + 4.0 + 2.0 * mu_eff / n);
        let c_1 = 2.0 / ((n + 1.3).powi(2) + mu_eff);
        let c_mu =
            (2.0 * (mu_eff - 2.0 + 1.0 / mu_eff) / ((n + 2.0).powi(2) + mu_eff)).min(1.0 - c_1);
        let expected_norm = n.sqrt() * (1.0 - 1.0 / (4.0 * n) + 1.0 / (21.0 * n.powi(2)));

        let covariance = DMatrix::identity(dimension, dimension);
        let decomposition = Decomposition::new(&covariance);

        debug!(
            dimension,
            population_size, sigma, "Initialized CMA-ES search distribution."
        );

        Ok(Self {
            dimension,
            population_size,
            mu,
            weights,
            mu_eff,
            c_c,
            c_sigma,
            c_1,
            c_mu,
            d_sigma,
            expected_norm,
            mean: DVector::from_column_slice(x0),
            sigma,
            covariance,
            p_c: DVector::zeros(dimension),
            p_sigma: DVector::zeros(dimension),
            decomposition,
            generation: 0,
            max_generations: config.max_generations,
            tol_x: config.tol_x,
            tol_fun: config.tol_fun,
            best_history: Vec::new(),
            pending: None,
            termination: None,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn mean(&self) -> Vec<f64> {
        self.mean.iter().copied().collect()
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Generations of best-loss history inspected by the `tol_fun` criterion.
    fn history_window(&self) -> usize {
        10 + (30.0 * self.dimension as f64 / self.population_size as f64).ceil() as usize
    }

    fn validate_batch(&self, batch: &[Vec<f64>], losses: &[f64]) -> Result<(), OptimizerError> {
        let expected = self.pending.ok_or(OptimizerError::NotAsked)?;
        if batch.len() != expected {
            return Err(OptimizerError::BatchSizeMismatch {
                expected,
                actual: batch.len(),
            });
        }
        if losses.len() != batch.len() {
            return Err(OptimizerError::LossCountMismatch {
                expected: batch.len(),
                actual: losses.len(),
            });
        }
        if let Some((index, x)) = batch
            .iter()
            .enumerate()
            .find(|(_, x)| x.len() != self.dimension)
        {
            return Err(OptimizerError::DimensionMismatch {
                index,
                expected: self.dimension,
                actual: x.len(),
            });
        }
        if let Some((index, &value)) = losses.iter().enumerate().find(|(_, l)| !l.is_finite()) {
            return Err(OptimizerError::InvalidLoss { index, value });
        }
        Ok(())
    }

    fn update_distribution(&mut self, batch: &[Vec<f64>], losses: &[f64]) {
        let mut ranked: Vec<usize> = (0..batch.len()).collect();
        ranked.sort_by(|&a, &b| losses[a].total_cmp(&losses[b]));

        let old_mean = self.mean.clone();
        let selected: Vec<DVector<f64>> = ranked
            .iter()
            .take(self.mu)
            .map(|&i| DVector::from_column_slice(&batch[i]))
            .collect();
        // With fewer candidates than `mu` the weights are renormalized over what exists.
        let used = selected.len();
        let w_sum: f64 = self.weights.iter().take(used).sum();
        let weights: Vec<f64> = self.weights.iter().take(used).map(|w| w / w_sum).collect();

        let mut new_mean = DVector::<f64>::zeros(self.dimension);
        for (w, x) in weights.iter().zip(&selected) {
            new_mean += *w * x;
        }

        let mean_diff = (&new_mean - &old_mean) / self.sigma;
        self.p_sigma = (1.0 - self.c_sigma) * &self.p_sigma
            + (self.c_sigma * (2.0 - self.c_sigma) * self.mu_eff).sqrt()
                * &self.decomposition.c_inv_sqrt
                * &mean_diff;

        let gen_factor = 1.0 - (1.0 - self.c_sigma).powi(2 * (self.generation as i32 + 1));
        let p_sigma_norm = self.p_sigma.norm();
        let h_sigma_threshold =
            (1.4 + 2.0 / (self.dimension as f64 + 1.0)) * self.expected_norm * gen_factor.sqrt();
        let h_sigma = if p_sigma_norm < h_sigma_threshold {
            1.0
        } else {
            0.0
        };

        self.p_c = (1.0 - self.c_c) * &self.p_c
            + h_sigma * (self.c_c * (2.0 - self.c_c) * self.mu_eff).sqrt() * &mean_diff;

        let mut rank_mu = DMatrix::<f64>::zeros(self.dimension, self.dimension);
        for (w, x) in weights.iter().zip(&selected) {
            let y = (x - &old_mean) / self.sigma;
            rank_mu += *w * &y * y.transpose();
        }

        let delta_h_sigma = (1.0 - h_sigma) * self.c_c * (2.0 - self.c_c);
        let base_weight = 1.0 - self.c_1 - self.c_mu + self.c_1 * delta_h_sigma;
        self.covariance = base_weight * &self.covariance
            + self.c_1 * &self.p_c * self.p_c.transpose()
            + self.c_mu * &rank_mu;
        self.covariance = (&self.covariance + self.covariance.transpose()) * 0.5;

        self.sigma *=
            ((self.c_sigma / self.d_sigma) * (p_sigma_norm / self.expected_norm - 1.0)).exp();
        self.mean = new_mean;
    }

    fn check_termination(&mut self, losses: &[f64]) -> Option<Termination> {
        let state_finite = self.sigma.is_finite()
            && self.sigma > 0.0
            && self.mean.iter().all(|v| v.is_finite())
            && self.covariance.iter().all(|v| v.is_finite());
        if !state_finite {
            return Some(Termination::Degenerate(
                "non-finite distribution state".to_string(),
            ));
        }

        self.decomposition = Decomposition::new(&self.covariance);
        if !self.decomposition.condition.is_finite()
            || self.decomposition.condition > MAX_CONDITION
        {
            return Some(Termination::Degenerate(format!(
                "covariance condition number {:.3e}",
                self.decomposition.condition
            )));
        }

        if self.generation >= self.max_generations {
            return Some(Termination::MaxGenerations(self.max_generations));
        }

        let max_std = self
            .covariance
            .diagonal()
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.sqrt()));
        if self.sigma * max_std < self.tol_x {
            return Some(Termination::TolX);
        }

        let window = self.history_window();
        if self.best_history.len() >= window {
            let recent = &self.best_history[self.best_history.len() - window..];
            let range = |values: &mut dyn Iterator<Item = f64>| {
                let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                hi - lo
            };
            let history_range = range(&mut recent.iter().copied());
            let generation_range = range(&mut losses.iter().copied());
            if history_range < self.tol_fun && generation_range < self.tol_fun {
                return Some(Termination::TolFun);
            }
        }
        None
    }
}

impl Optimizer for CmaEs {
    fn ask(&mut self) -> Vec<Vec<f64>> {
        let bd = &self.decomposition.bd;
        let population: Vec<Vec<f64>> = (0..self.population_size)
            .map(|_| {
                let z = DVector::from_iterator(
                    self.dimension,
                    (0..self.dimension).map(|_| {
                        let v: f64 = StandardNormal.sample(&mut self.rng);
                        v
                    }),
                );
                let x = &self.mean + self.sigma * bd * z;
                x.iter().copied().collect()
            })
            .collect();
        self.pending = Some(population.len());
        population
    }

    fn tell(&mut self, batch: &[Vec<f64>], losses: &[f64]) -> Result<(), OptimizerError> {
        self.validate_batch(batch, losses)?;
        self.pending = None;

        let generation_best = losses.iter().copied().fold(f64::INFINITY, f64::min);
        self.best_history.push(generation_best);

        self.update_distribution(batch, losses);
        self.generation += 1;

        self.termination = self.check_termination(losses);
        match &self.termination {
            Some(Termination::Degenerate(reason)) => {
                warn!(
                    generation = self.generation,
                    "CMA-ES stopped: distribution is {}.", reason
                );
            }
            Some(reason) => debug!(generation = self.generation, "CMA-ES stopped: {}.", reason),
            None => {}
        }
        Ok(())
    }

    fn terminated(&self) -> bool {
        self.termination.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(population: Option<usize>, max_generations: usize, seed: u64) -> OptimizerConfig {
        OptimizerConfig {
            population_size: population,
            max_generations,
            seed,
            ..OptimizerConfig::default()
        }
    }

    fn sphere(x: &[f64]) -> f64 {
        x.iter().map(|v| v * v).sum()
    }

    #[test]
    fn default_population_follows_dimension() {
        assert_eq!(default_population_size(1), 4);
        assert_eq!(default_population_size(5), 8);
        assert_eq!(default_population_size(27), 13);
    }

    #[test]
    fn default_sigma_scales_with_initial_norm() {
        let sigma = default_initial_sigma(&[3.0, 4.0]);
        assert!((sigma - 0.3 * 5.0 / 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(default_initial_sigma(&[0.0, 0.0]), FALLBACK_SIGMA);

        let es = CmaEs::new(&[0.0; 4], &config(None, 10, 0)).unwrap();
        assert_eq!(es.sigma(), FALLBACK_SIGMA);
    }

    #[test]
    fn ask_produces_population_of_full_vectors() {
        let mut es = CmaEs::new(&[1.0, -2.0, 0.5], &config(Some(6), 10, 1)).unwrap();
        let batch = es.ask();
        assert_eq!(batch.len(), 6);
        assert!(batch.iter().all(|x| x.len() == 3 && x.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn same_seed_reproduces_the_search() {
        let run = |seed| {
            let mut es = CmaEs::new(&[1.0; 4], &config(Some(4), 5, seed)).unwrap();
            let mut batches = Vec::new();
            while !es.terminated() {
                let batch = es.ask();
                let losses: Vec<f64> = batch.iter().map(|x| sphere(x)).collect();
                es.tell(&batch, &losses).unwrap();
                batches.push(batch);
            }
            batches
        };
        assert_eq!(run(3), run(3));
        assert_ne!(run(3), run(4));
    }

    #[test]
    fn stops_at_generation_cap() {
        let mut es = CmaEs::new(&[1.0, 1.0], &config(Some(4), 3, 0)).unwrap();
        let mut generations = 0;
        while !es.terminated() {
            let batch = es.ask();
            let losses: Vec<f64> = batch.iter().map(|x| sphere(x)).collect();
            es.tell(&batch, &losses).unwrap();
            generations += 1;
        }
        assert_eq!(generations, 3);
        assert_eq!(es.termination(), Some(&Termination::MaxGenerations(3)));
    }

    #[test]
    fn converges_on_sphere() {
        let mut es = CmaEs::new(&[1.0; 5], &config(None, 1000, 42)).unwrap();
        let mut best = f64::INFINITY;
        while !es.terminated() {
            let batch = es.ask();
            let losses: Vec<f64> = batch.iter().map(|x| sphere(x)).collect();
            best = losses.iter().copied().fold(best, f64::min);
            es.tell(&batch, &losses).unwrap();
        }
        assert!(best < 1e-6, "best loss {best}");
        assert!(sphere(&es.mean()) < 1e-4);
        assert_ne!(es.termination(), Some(&Termination::MaxGenerations(1000)));
    }

    #[test]
    fn tell_validates_its_input() {
        let mut es = CmaEs::new(&[1.0, 1.0], &config(Some(4), 10, 0)).unwrap();
        assert_eq!(es.tell(&[], &[]), Err(OptimizerError::NotAsked));

        let batch = es.ask();
        assert!(matches!(
            es.tell(&batch[..3], &[1.0, 2.0, 3.0]),
            Err(OptimizerError::BatchSizeMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            es.tell(&batch, &[1.0, 2.0]),
            Err(OptimizerError::LossCountMismatch { .. })
        ));
        assert!(matches!(
            es.tell(&batch, &[1.0, f64::NAN, 2.0, 3.0]),
            Err(OptimizerError::InvalidLoss { index: 1, .. })
        ));
        es.tell(&batch, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(es.generation(), 1);
    }

    #[test]
    fn flat_losses_stop_on_tol_fun() {
        let mut es = CmaEs::new(&[1.0, 1.0], &config(Some(4), 1000, 0)).unwrap();
        let mut generations = 0;
        while !es.terminated() {
            let batch = es.ask();
            es.tell(&batch, &[0.0; 4]).unwrap();
            generations += 1;
        }
        assert_eq!(es.termination(), Some(&Termination::TolFun));
        assert_eq!(generations, es.history_window());
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(CmaEs::new(&[], &config(None, 10, 0)).is_err());
        assert!(CmaEs::new(&[f64::NAN], &config(None, 10, 0)).is_err());
        let bad_sigma = OptimizerConfig {
            initial_sigma: Some(0.0),
            ..OptimizerConfig::default()
        };
        assert!(CmaEs::new(&[1.0], &bad_sigma).is_err());
    }
}
