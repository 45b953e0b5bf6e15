use super::problem::Problem;
use crate::core::io::npy;
use crate::engine::cancel::CancellationToken;
use crate::engine::config::FitConfig;
use crate::engine::driver::{BestCandidate, GenerationSummary, OptimizationDriver};
use crate::engine::error::EngineError;
use crate::engine::evaluation::Evaluator;
use crate::engine::optimizer::CmaEs;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sandbox::TrialSandbox;
use crate::engine::solver::{ExternalSolver, Solver};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

pub const BEST_PARAMS_FILE: &str = "best_params.npy";
pub const BEST_MATERIALS_FILE: &str = "materials_best.xml";
pub const OVERLAY_FILE: &str = "overlay_best_fit.csv";
pub const SUMMARY_FILE: &str = "fit_summary.toml";
pub const FINAL_SANDBOX_PREFIX: &str = "final_";

#[derive(Debug, Clone, PartialEq)]
pub struct FitArtifacts {
    pub best_params: PathBuf,
    pub best_materials: PathBuf,
    pub final_run_dir: PathBuf,
    pub overlay: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub best: BestCandidate,
    /// Best vector by parameter name, in codec order.
    pub parameters: Vec<(String, f64)>,
    pub confirmatory_loss: f64,
    pub history: Vec<GenerationSummary>,
    pub termination: Option<String>,
    pub artifacts: FitArtifacts,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct FitSummary<'a> {
    material: &'a str,
    best_loss: f64,
    confirmatory_loss: f64,
    generations: usize,
    best_generation: usize,
    best_candidate: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    termination: Option<&'a str>,
    parameters: BTreeMap<&'a str, f64>,
    history: Vec<HistoryRow>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct HistoryRow {
    generation: usize,
    best_loss: f64,
    mean_loss: f64,
    best_so_far: f64,
}

/// Runs a full fit against the external solver configured in `config`.
pub fn run(
    config: &FitConfig,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<FitResult, EngineError> {
    let cancel = match config.execution.wall_clock_limit {
        Some(limit) => cancel.limited_to(limit),
        None => cancel.clone(),
    };
    let solver =
        ExternalSolver::new(config.problem.solver.clone())?.with_cancellation(cancel.clone());
    run_with_solver(config, Box::new(solver), reporter, &cancel)
}

#[instrument(skip_all, name = "fit_workflow")]
pub fn run_with_solver(
    config: &FitConfig,
    solver: Box<dyn Solver>,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<FitResult, EngineError> {
    // === Phase 1: Preparation ===
    reporter.phase("Preparation");
    info!(material = %config.problem.material, "Preparing fit.");

    let problem = Problem::load(&config.problem)?;
    let x0 = problem.resolve_vector(
        &config.initial_guess,
        &config.problem.material,
        config.optimizer.seed,
    )?;
    let optimizer = CmaEs::new(&x0, &config.optimizer)?;
    info!(
        dimension = x0.len(),
        population = optimizer.population_size(),
        sigma0 = optimizer.sigma(),
        "Initialized CMA-ES."
    );

    std::fs::create_dir_all(&config.output_dir)
        .map_err(|e| EngineError::io(&config.output_dir, e))?;
    let sandboxes = TrialSandbox::new(&config.problem.scratch_dir)?
        .with_retention(config.execution.retain_sandboxes);
    let workers = config
        .execution
        .workers
        .unwrap_or(optimizer.population_size());
    let Problem {
        codec,
        database,
        template,
        loss,
    } = problem;
    let evaluator = Evaluator::new(
        codec,
        database,
        template,
        config.problem.material.clone(),
        sandboxes,
        solver,
        loss,
    )
    .with_cancellation(cancel.clone())
    .with_workers(workers)?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Optimization ===
    reporter.phase("Optimization");
    let best_params = config.output_dir.join(BEST_PARAMS_FILE);
    let mut driver = OptimizationDriver::new(optimizer, &evaluator, reporter)
        .with_cancellation(cancel.clone())
        .with_generation_limit(config.optimizer.max_generations);
    if config.execution.checkpoint {
        driver = driver.with_checkpoint(best_params.clone());
    }
    let outcome = driver.run();
    if let Err(e) = &outcome {
        if let Some(best) = driver.best() {
            warn!(
                loss = best.loss,
                "Run aborted ({}); best vector so far is in the checkpoint if enabled.", e
            );
        }
    }
    let best = outcome?;
    let history = driver.history().to_vec();
    let termination = driver
        .optimizer()
        .termination()
        .map(|t| t.to_string());
    reporter.report(Progress::PhaseFinish);
    info!(
        loss = best.loss,
        generation = best.generation,
        "Optimization finished{}.",
        termination
            .as_deref()
            .map(|t| format!(": {t}"))
            .unwrap_or_default()
    );

    // === Phase 3: Persistence and confirmation ===
    reporter.phase("Finalization");
    npy::write_vector(&best_params, &best.vector)?;
    let parameter_map = evaluator.codec().encode(&best.vector)?;

    let best_materials = config.output_dir.join(BEST_MATERIALS_FILE);
    let mut fitted_database = evaluator.database().clone();
    fitted_database.apply(evaluator.material(), &parameter_map)?;
    fitted_database.retain_materials(&[evaluator.material()]);
    fitted_database.save(&best_materials)?;

    let final_sandbox = TrialSandbox::new(&config.output_dir)?
        .with_prefix(FINAL_SANDBOX_PREFIX)
        .with_retention(true)
        .create()?;
    let confirmation = evaluator
        .evaluate_in(&final_sandbox, &best.vector)
        .map_err(|e| EngineError::Confirmation {
            stage: e.stage(),
            source: e,
        })?;
    let final_run_dir = final_sandbox.keep();
    if (confirmation.loss - best.loss).abs() > 1e-9 * best.loss.abs().max(1.0) {
        warn!(
            best = best.loss,
            confirmed = confirmation.loss,
            "Confirmatory loss differs from the loss observed during the search."
        );
    }

    let overlay = config.output_dir.join(OVERLAY_FILE);
    evaluator
        .loss()
        .reference()
        .write_overlay(&confirmation.band_structure, &overlay)?;

    let parameters: Vec<(String, f64)> = evaluator
        .codec()
        .names()
        .iter()
        .cloned()
        .zip(best.vector.iter().copied())
        .collect();
    let summary = config.output_dir.join(SUMMARY_FILE);
    write_summary(
        &summary,
        &FitSummary {
            material: evaluator.material(),
            best_loss: best.loss,
            confirmatory_loss: confirmation.loss,
            generations: history.len(),
            best_generation: best.generation,
            best_candidate: best.candidate,
            termination: termination.as_deref(),
            parameters: parameters.iter().map(|(n, v)| (n.as_str(), *v)).collect(),
            history: history
                .iter()
                .map(|g| HistoryRow {
                    generation: g.generation,
                    best_loss: g.best_loss,
                    mean_loss: g.mean_loss,
                    best_so_far: g.best_so_far,
                })
                .collect(),
        },
    )?;
    reporter.report(Progress::PhaseFinish);
    info!(
        "Fit complete. Best RMS {:.6} eV, confirmed {:.6} eV.",
        best.loss, confirmation.loss
    );

    Ok(FitResult {
        best,
        parameters,
        confirmatory_loss: confirmation.loss,
        history,
        termination,
        artifacts: FitArtifacts {
            best_params,
            best_materials,
            final_run_dir,
            overlay,
            summary,
        },
    })
}

fn write_summary(path: &Path, summary: &FitSummary) -> Result<(), EngineError> {
    let content = toml::to_string(summary).map_err(|e| EngineError::Report(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| EngineError::io(path, e))
}
