use super::problem::Problem;
use crate::engine::cancel::CancellationToken;
use crate::engine::config::EvaluateConfig;
use crate::engine::error::EngineError;
use crate::engine::evaluation::Evaluator;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sandbox::TrialSandbox;
use crate::engine::solver::{ExternalSolver, Solver};
use std::path::PathBuf;
use tracing::{info, instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub loss: f64,
    pub vector: Vec<f64>,
    /// Solver output, only present when the sandbox was retained.
    pub output_path: Option<PathBuf>,
    pub sandbox_dir: Option<PathBuf>,
    pub overlay_path: Option<PathBuf>,
}

pub fn run(
    config: &EvaluateConfig,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<EvaluationReport, EngineError> {
    let solver =
        ExternalSolver::new(config.problem.solver.clone())?.with_cancellation(cancel.clone());
    run_with_solver(config, Box::new(solver), reporter, cancel)
}

#[instrument(skip_all, name = "evaluate_workflow")]
pub fn run_with_solver(
    config: &EvaluateConfig,
    solver: Box<dyn Solver>,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<EvaluationReport, EngineError> {
    reporter.phase("Evaluation");

    let problem = Problem::load(&config.problem)?;
    let vector = problem.resolve_vector(&config.parameters, &config.problem.material, 0)?;
    let sandboxes = TrialSandbox::new(&config.problem.scratch_dir)?;
    let evaluator = Evaluator::new(
        problem.codec,
        problem.database,
        problem.template,
        config.problem.material.clone(),
        sandboxes,
        solver,
        problem.loss,
    )
    .with_cancellation(cancel.clone());

    let sandbox = evaluator.sandboxes().create()?;
    let outcome = evaluator
        .evaluate_in(&sandbox, &vector)
        .map_err(|e| {
            if e.is_cancellation() {
                EngineError::Cancelled
            } else {
                EngineError::Trial {
                    stage: e.stage(),
                    source: e,
                }
            }
        })?;

    if let Some(path) = &config.overlay_path {
        evaluator
            .loss()
            .reference()
            .write_overlay(&outcome.band_structure, path)?;
    }

    let (output_path, sandbox_dir) = if config.retain_sandbox {
        (Some(outcome.output_path.clone()), Some(sandbox.keep()))
    } else {
        (None, None)
    };
    reporter.report(Progress::PhaseFinish);
    info!(loss = outcome.loss, "Evaluated {} parameters.", vector.len());

    Ok(EvaluationReport {
        loss: outcome.loss,
        vector,
        output_path,
        sandbox_dir,
        overlay_path: config.overlay_path.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::npy;
    use crate::engine::config::{EvaluateConfigBuilder, InitialGuess};
    use crate::engine::error::Stage;
    use crate::engine::evaluation::test_support::*;
    use crate::engine::solver::{FailureReason, SolverError, SolverInput};
    use std::fs;
    use tempfile::tempdir;

    fn builder(root: &std::path::Path) -> EvaluateConfigBuilder {
        fs::write(root.join("reference.csv"), ZERO_REFERENCE).unwrap();
        fs::write(root.join("materials.xml"), DATABASE).unwrap();
        fs::write(root.join("user_input.xml"), TEMPLATE).unwrap();
        EvaluateConfigBuilder::new()
            .reference_path(root.join("reference.csv"))
            .materials_path(root.join("materials.xml"))
            .template_path(root.join("user_input.xml"))
            .material("Silicon")
            .parameter_names(vec!["E_s_a".to_string(), "E_p_a".to_string()])
            .solver_executable(root.join("sdt"))
            .scratch_dir(root.join("scratch"))
    }

    #[test]
    fn evaluates_current_database_values() {
        let dir = tempdir().unwrap();
        let config = builder(dir.path()).build().unwrap();

        let report = run_with_solver(
            &config,
            Box::new(EchoSolver),
            &ProgressReporter::new(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.vector, vec![1.0, 2.0]);
        assert!((report.loss - 2.5f64.sqrt()).abs() < 1e-12);
        assert!(report.output_path.is_none());
        assert_eq!(fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }

    #[test]
    fn evaluates_a_vector_file_and_keeps_outputs() {
        let dir = tempdir().unwrap();
        let vector_path = dir.path().join("best_params.npy");
        npy::write_vector(&vector_path, &[0.0, 0.0]).unwrap();
        let overlay = dir.path().join("overlay.csv");
        let config = builder(dir.path())
            .parameters(InitialGuess::NpyFile(vector_path))
            .retain_sandbox(true)
            .overlay_path(Some(overlay.clone()))
            .build()
            .unwrap();

        let report = run_with_solver(
            &config,
            Box::new(EchoSolver),
            &ProgressReporter::new(),
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(report.loss, 0.0);
        assert!(report.output_path.unwrap().is_file());
        assert!(report.sandbox_dir.unwrap().is_dir());
        assert!(overlay.is_file());
    }

    #[test]
    fn wrong_vector_length_is_rejected() {
        let dir = tempdir().unwrap();
        let config = builder(dir.path())
            .parameters(InitialGuess::Vector(vec![1.0]))
            .build()
            .unwrap();
        let result = run_with_solver(
            &config,
            Box::new(EchoSolver),
            &ProgressReporter::new(),
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(EngineError::Codec(_))));
    }

    struct CrashingSolver;

    impl Solver for CrashingSolver {
        fn invoke(&self, _: &SolverInput) -> Result<PathBuf, SolverError> {
            Err(SolverError::SolverExecutionFailed {
                reason: FailureReason::ExitStatus(Some(139)),
                stderr_tail: None,
            })
        }
    }

    #[test]
    fn solver_failure_is_reported_with_its_stage() {
        let dir = tempdir().unwrap();
        let config = builder(dir.path()).build().unwrap();

        let err = run_with_solver(
            &config,
            Box::new(CrashingSolver),
            &ProgressReporter::new(),
            &CancellationToken::new(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Trial {
                stage: Stage::Solve,
                ..
            }
        ));
        let message = err.to_string();
        assert!(message.starts_with("Evaluation failed at stage 'solve'"));
        assert!(!message.contains("Confirmatory"));
        assert_eq!(fs::read_dir(dir.path().join("scratch")).unwrap().count(), 0);
    }
}
