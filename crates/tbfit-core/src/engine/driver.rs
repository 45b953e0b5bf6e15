use super::cancel::CancellationToken;
use super::error::EngineError;
use super::evaluation::Evaluator;
use super::optimizer::Optimizer;
use super::progress::{Progress, ProgressReporter};
use crate::core::io::npy;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initialized,
    Running,
    Terminated,
}

/// Best evaluation observed across all generations.
#[derive(Debug, Clone, PartialEq)]
pub struct BestCandidate {
    pub vector: Vec<f64>,
    pub loss: f64,
    /// 1-based.
    pub generation: usize,
    pub candidate: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    /// 1-based.
    pub generation: usize,
    pub best_loss: f64,
    pub mean_loss: f64,
    pub best_so_far: f64,
}

/// Runs the ask/evaluate/tell loop around an [`Optimizer`].
///
/// The driver never looks inside the optimizer. A generation's losses are all
/// known before they are told, and any failed candidate ends the run.
pub struct OptimizationDriver<'a, O: Optimizer> {
    optimizer: O,
    evaluator: &'a Evaluator,
    reporter: &'a ProgressReporter<'a>,
    cancel: CancellationToken,
    checkpoint: Option<PathBuf>,
    generation_limit: Option<usize>,
    state: DriverState,
    generation: usize,
    best: Option<BestCandidate>,
    history: Vec<GenerationSummary>,
}

impl<'a, O: Optimizer> OptimizationDriver<'a, O> {
    pub fn new(optimizer: O, evaluator: &'a Evaluator, reporter: &'a ProgressReporter<'a>) -> Self {
        Self {
            optimizer,
            evaluator,
            reporter,
            cancel: CancellationToken::new(),
            checkpoint: None,
            generation_limit: None,
            state: DriverState::Initialized,
            generation: 0,
            best: None,
            history: Vec::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Writes the best vector to `path` (NPY) every time it improves.
    pub fn with_checkpoint(mut self, path: PathBuf) -> Self {
        self.checkpoint = Some(path);
        self
    }

    /// Only used for progress display.
    pub fn with_generation_limit(mut self, limit: usize) -> Self {
        self.generation_limit = Some(limit);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn best(&self) -> Option<&BestCandidate> {
        self.best.as_ref()
    }

    pub fn history(&self) -> &[GenerationSummary] {
        &self.history
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn into_optimizer(self) -> O {
        self.optimizer
    }

    /// Runs one generation. Returns `None` once the optimizer has terminated.
    pub fn step(&mut self) -> Result<Option<GenerationSummary>, EngineError> {
        if self.state == DriverState::Terminated {
            return Ok(None);
        }
        if self.optimizer.terminated() {
            self.state = DriverState::Terminated;
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            self.state = DriverState::Terminated;
            return Err(EngineError::Cancelled);
        }
        self.state = DriverState::Running;
        self.generation += 1;
        let generation = self.generation;

        let batch = self.optimizer.ask();
        if batch.is_empty() {
            self.state = DriverState::Terminated;
            return Err(EngineError::Internal(format!(
                "optimizer proposed an empty batch in generation {generation}"
            )));
        }
        self.reporter.report(Progress::StatusUpdate {
            text: match self.generation_limit {
                Some(limit) => format!("generation {generation}/{limit}"),
                None => format!("generation {generation}"),
            },
        });
        self.reporter.report(Progress::TaskStart {
            total: batch.len() as u64,
        });
        let results = self.evaluator.evaluate_batch(&batch, self.reporter);
        self.reporter.report(Progress::TaskFinish);

        let mut successes = Vec::with_capacity(results.len());
        let mut failure = None;
        for (candidate, result) in results.into_iter().enumerate() {
            match result {
                Ok(loss) => successes.push((candidate, loss)),
                Err(e) if e.is_cancellation() => {
                    failure.get_or_insert(EngineError::Cancelled);
                }
                Err(e) => {
                    if failure.is_none() || matches!(failure, Some(EngineError::Cancelled)) {
                        failure = Some(EngineError::Evaluation {
                            generation,
                            candidate,
                            stage: e.stage(),
                            source: e,
                        });
                    }
                }
            }
        }
        if failure.is_some() && self.cancel.is_cancelled() {
            failure = Some(EngineError::Cancelled);
        }
        // Successful candidates of a failing generation still count towards the best.
        self.record(generation, &batch, &successes)?;
        if let Some(err) = failure {
            self.state = DriverState::Terminated;
            warn!(generation, "Generation failed: {}", err);
            return Err(err);
        }

        let losses: Vec<f64> = successes.iter().map(|&(_, loss)| loss).collect();
        self.optimizer.tell(&batch, &losses)?;
        let summary = self.summarize(generation, &losses);
        info!(
            "gen {}{} best RMS {:.6} eV (best so far {:.6} eV)",
            generation,
            self.generation_limit
                .map(|l| format!("/{l}"))
                .unwrap_or_default(),
            summary.best_loss,
            summary.best_so_far
        );
        self.history.push(summary.clone());

        if self.optimizer.terminated() {
            self.state = DriverState::Terminated;
        }
        Ok(Some(summary))
    }

    /// Loops [`Self::step`] until the optimizer terminates.
    pub fn run(&mut self) -> Result<BestCandidate, EngineError> {
        while self.step()?.is_some() {}
        self.best
            .clone()
            .ok_or_else(|| EngineError::Internal("no generation was evaluated".to_string()))
    }

    fn record(
        &mut self,
        generation: usize,
        batch: &[Vec<f64>],
        successes: &[(usize, f64)],
    ) -> Result<(), EngineError> {
        let Some(&(candidate, loss)) = successes.iter().min_by(|a, b| a.1.total_cmp(&b.1)) else {
            return Ok(());
        };
        if self.best.as_ref().is_some_and(|best| best.loss <= loss) {
            return Ok(());
        }
        debug!(generation, candidate, loss, "New best candidate.");
        self.best = Some(BestCandidate {
            vector: batch[candidate].clone(),
            loss,
            generation,
            candidate,
        });
        if let Some(path) = &self.checkpoint {
            npy::write_vector(path, &batch[candidate])?;
        }
        Ok(())
    }

    fn summarize(&self, generation: usize, losses: &[f64]) -> GenerationSummary {
        let best_loss = losses.iter().copied().fold(f64::INFINITY, f64::min);
        let mean_loss = losses.iter().sum::<f64>() / losses.len() as f64;
        GenerationSummary {
            generation,
            best_loss,
            mean_loss,
            best_so_far: self.best.as_ref().map_or(best_loss, |b| b.loss),
        }
    }
}
