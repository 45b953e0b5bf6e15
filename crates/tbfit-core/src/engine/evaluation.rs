use super::cancel::CancellationToken;
use super::error::{EngineError, EvaluationError};
use super::progress::{Progress, ProgressReporter};
use super::sandbox::{Sandbox, TrialSandbox};
use super::solver::{Solver, SolverError, SolverInput};
use crate::core::io::bandstructure::BandStructure;
use crate::core::io::materials::MaterialDatabase;
use crate::core::io::user_input::{InputBindings, SolverInputTemplate};
use crate::core::loss::LossEvaluator;
use crate::core::params::ParameterCodec;
use std::path::PathBuf;
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Result of one candidate evaluated inside a caller-owned sandbox.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub loss: f64,
    pub output_path: PathBuf,
    pub band_structure: BandStructure,
}

/// Everything needed to turn a parameter vector into a loss.
///
/// Shared read-only by all workers of a batch; each candidate gets its own sandbox.
pub struct Evaluator {
    codec: ParameterCodec,
    database: MaterialDatabase,
    template: SolverInputTemplate,
    material: String,
    sandboxes: TrialSandbox,
    solver: Box<dyn Solver>,
    loss: LossEvaluator,
    cancel: CancellationToken,
    workers: usize,
    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl Evaluator {
    pub fn new(
        codec: ParameterCodec,
        database: MaterialDatabase,
        template: SolverInputTemplate,
        material: impl Into<String>,
        sandboxes: TrialSandbox,
        solver: Box<dyn Solver>,
        loss: LossEvaluator,
    ) -> Self {
        Self {
            codec,
            database,
            template,
            material: material.into(),
            sandboxes,
            solver,
            loss,
            cancel: CancellationToken::new(),
            workers: 1,
            #[cfg(feature = "parallel")]
            pool: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Evaluates batches on a dedicated pool of `workers` threads; `1` is sequential.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, EngineError> {
        let workers = workers.max(1);
        #[cfg(feature = "parallel")]
        {
            self.pool = if workers > 1 {
                Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(workers)
                        .thread_name(|i| format!("tbfit-eval-{i}"))
                        .build()
                        .map_err(|e| EngineError::WorkerPool(e.to_string()))?,
                )
            } else {
                None
            };
        }
        self.workers = workers;
        Ok(self)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn codec(&self) -> &ParameterCodec {
        &self.codec
    }

    pub fn material(&self) -> &str {
        &self.material
    }

    pub fn database(&self) -> &MaterialDatabase {
        &self.database
    }

    pub fn sandboxes(&self) -> &TrialSandbox {
        &self.sandboxes
    }

    pub fn loss(&self) -> &LossEvaluator {
        &self.loss
    }

    /// Runs the full pipeline in a fresh sandbox, which is dropped afterwards.
    pub fn evaluate(&self, vector: &[f64]) -> Result<f64, EvaluationError> {
        if self.cancel.is_cancelled() {
            return Err(SolverError::Cancelled.into());
        }
        let sandbox = self.sandboxes.create()?;
        self.evaluate_in(&sandbox, vector).map(|outcome| outcome.loss)
    }

    /// Runs the pipeline inside `sandbox`, leaving its lifetime to the caller.
    pub fn evaluate_in(
        &self,
        sandbox: &Sandbox,
        vector: &[f64],
    ) -> Result<TrialOutcome, EvaluationError> {
        let parameters = self.codec.encode(vector)?;

        let material_db_path = sandbox.materials_document(
            &self.database,
            &self.material,
            &parameters,
            std::slice::from_ref(&self.material),
        )?;
        let input_document = sandbox.write_input(
            &self.template,
            &InputBindings {
                material: self.material.clone(),
                material_db_path,
            },
        )?;

        let output_path = self.solver.invoke(&SolverInput {
            input_document,
            save_dir: sandbox.output_dir().to_path_buf(),
        })?;

        let band_structure = BandStructure::load(&output_path)?;
        let loss = self.loss.score(&band_structure)?;
        trace!(sandbox = %sandbox.path().display(), loss, "Candidate evaluated.");

        Ok(TrialOutcome {
            loss,
            output_path,
            band_structure,
        })
    }

    /// Evaluates every candidate; results come back in candidate order.
    pub fn evaluate_batch(
        &self,
        batch: &[Vec<f64>],
        reporter: &ProgressReporter,
    ) -> Vec<Result<f64, EvaluationError>> {
        let evaluate_one = |x: &Vec<f64>| {
            let result = self.evaluate(x);
            reporter.report(Progress::TaskIncrement { amount: 1 });
            result
        };

        #[cfg(feature = "parallel")]
        {
            if let Some(pool) = &self.pool {
                return pool.install(|| batch.par_iter().map(evaluate_one).collect());
            }
        }

        batch.iter().map(evaluate_one).collect()
    }
}
