use crate::core::params::names::default_parameter_names;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// How the external solver is launched.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverConfig {
    pub executable: PathBuf,
    /// Program and arguments placed in front of the executable, e.g. `["/bin/sh"]`.
    pub launcher: Vec<String>,
    /// Appended as `--key=value` after the fixed arguments.
    pub extra_args: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Keep the solver's stdout/stderr as log files in the sandbox.
    pub capture_output: bool,
}

impl SolverConfig {
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            launcher: Vec::new(),
            extra_args: Vec::new(),
            env: Vec::new(),
            timeout: None,
            capture_output: true,
        }
    }
}

/// Everything that defines one fitting problem, shared by fit and evaluate runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProblemConfig {
    pub reference_path: PathBuf,
    pub materials_path: PathBuf,
    pub template_path: PathBuf,
    pub material: String,
    pub parameter_names: Vec<String>,
    pub loss_weights_path: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub solver: SolverConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    /// `None` selects `4 + floor(3 ln n)`.
    pub population_size: Option<usize>,
    pub max_generations: usize,
    pub seed: u64,
    /// `None` selects `0.3 * ||x0|| / sqrt(n)`.
    pub initial_sigma: Option<f64>,
    pub tol_x: f64,
    pub tol_fun: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: None,
            max_generations: 200,
            seed: 0,
            initial_sigma: None,
            tol_x: 1e-11,
            tol_fun: 1e-11,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionConfig {
    /// `None` uses one worker per candidate.
    pub workers: Option<usize>,
    pub retain_sandboxes: bool,
    pub wall_clock_limit: Option<Duration>,
    pub checkpoint: bool,
}

/// Source of the first mean of the search.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InitialGuess {
    Vector(Vec<f64>),
    NpyFile(PathBuf),
    /// The material's current values in the parameter database.
    Database,
    /// Standard-normal sample drawn from the optimizer seed.
    #[default]
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitConfig {
    pub problem: ProblemConfig,
    pub optimizer: OptimizerConfig,
    pub execution: ExecutionConfig,
    pub initial_guess: InitialGuess,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluateConfig {
    pub problem: ProblemConfig,
    pub parameters: InitialGuess,
    pub retain_sandbox: bool,
    pub overlay_path: Option<PathBuf>,
}

#[derive(Default)]
struct ProblemBuilder {
    reference_path: Option<PathBuf>,
    materials_path: Option<PathBuf>,
    template_path: Option<PathBuf>,
    material: Option<String>,
    parameter_names: Option<Vec<String>>,
    loss_weights_path: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    solver_executable: Option<PathBuf>,
    solver_launcher: Vec<String>,
    solver_args: Vec<(String, String)>,
    solver_env: Vec<(String, String)>,
    solver_timeout: Option<Duration>,
    capture_output: Option<bool>,
}

impl ProblemBuilder {
    fn build(self, default_scratch: Option<PathBuf>) -> Result<ProblemConfig, ConfigError> {
        let parameter_names = self.parameter_names.unwrap_or_else(default_parameter_names);
        if parameter_names.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "parameter_names",
                reason: "at least one free parameter is required".to_string(),
            });
        }
        let material = self
            .material
            .ok_or(ConfigError::MissingParameter("material"))?;
        if material.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "material",
                reason: "material name is empty".to_string(),
            });
        }
        let solver = SolverConfig {
            executable: self
                .solver_executable
                .ok_or(ConfigError::MissingParameter("solver_executable"))?,
            launcher: self.solver_launcher,
            extra_args: self.solver_args,
            env: self.solver_env,
            timeout: self.solver_timeout,
            capture_output: self.capture_output.unwrap_or(true),
        };
        Ok(ProblemConfig {
            reference_path: self
                .reference_path
                .ok_or(ConfigError::MissingParameter("reference_path"))?,
            materials_path: self
                .materials_path
                .ok_or(ConfigError::MissingParameter("materials_path"))?,
            template_path: self
                .template_path
                .ok_or(ConfigError::MissingParameter("template_path"))?,
            material,
            parameter_names,
            loss_weights_path: self.loss_weights_path,
            scratch_dir: self
                .scratch_dir
                .or(default_scratch)
                .ok_or(ConfigError::MissingParameter("scratch_dir"))?,
            solver,
        })
    }
}

macro_rules! problem_setters {
    () => {
        pub fn reference_path(mut self, path: PathBuf) -> Self {
            self.problem.reference_path = Some(path);
            self
        }
        pub fn materials_path(mut self, path: PathBuf) -> Self {
            self.problem.materials_path = Some(path);
            self
        }
        pub fn template_path(mut self, path: PathBuf) -> Self {
            self.problem.template_path = Some(path);
            self
        }
        pub fn material(mut self, material: impl Into<String>) -> Self {
            self.problem.material = Some(material.into());
            self
        }
        pub fn parameter_names(mut self, names: Vec<String>) -> Self {
            self.problem.parameter_names = Some(names);
            self
        }
        pub fn loss_weights_path(mut self, path: Option<PathBuf>) -> Self {
            self.problem.loss_weights_path = path;
            self
        }
        pub fn scratch_dir(mut self, path: PathBuf) -> Self {
            self.problem.scratch_dir = Some(path);
            self
        }
        pub fn solver_executable(mut self, path: PathBuf) -> Self {
            self.problem.solver_executable = Some(path);
            self
        }
        pub fn solver_launcher(mut self, launcher: Vec<String>) -> Self {
            self.problem.solver_launcher = launcher;
            self
        }
        pub fn solver_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.problem.solver_args.push((key.into(), value.into()));
            self
        }
        pub fn solver_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
            self.problem.solver_env.push((key.into(), value.into()));
            self
        }
        pub fn solver_timeout(mut self, timeout: Option<Duration>) -> Self {
            self.problem.solver_timeout = timeout;
            self
        }
        pub fn capture_solver_output(mut self, capture: bool) -> Self {
            self.problem.capture_output = Some(capture);
            self
        }
    };
}

#[derive(Default)]
pub struct FitConfigBuilder {
    problem: ProblemBuilder,
    output_dir: Option<PathBuf>,
    optimizer: OptimizerConfig,
    execution: ExecutionConfig,
    initial_guess: InitialGuess,
}

impl FitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    problem_setters!();

    pub fn output_dir(mut self, path: PathBuf) -> Self {
        self.output_dir = Some(path);
        self
    }
    pub fn population_size(mut self, size: Option<usize>) -> Self {
        self.optimizer.population_size = size;
        self
    }
    pub fn max_generations(mut self, generations: usize) -> Self {
        self.optimizer.max_generations = generations;
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.optimizer.seed = seed;
        self
    }
    pub fn initial_sigma(mut self, sigma: Option<f64>) -> Self {
        self.optimizer.initial_sigma = sigma;
        self
    }
    pub fn tolerances(mut self, tol_x: f64, tol_fun: f64) -> Self {
        self.optimizer.tol_x = tol_x;
        self.optimizer.tol_fun = tol_fun;
        self
    }
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.execution.workers = workers;
        self
    }
    pub fn retain_sandboxes(mut self, retain: bool) -> Self {
        self.execution.retain_sandboxes = retain;
        self
    }
    pub fn wall_clock_limit(mut self, limit: Option<Duration>) -> Self {
        self.execution.wall_clock_limit = limit;
        self
    }
    pub fn checkpoint(mut self, enabled: bool) -> Self {
        self.execution.checkpoint = enabled;
        self
    }
    pub fn initial_guess(mut self, guess: InitialGuess) -> Self {
        self.initial_guess = guess;
        self
    }

    pub fn build(self) -> Result<FitConfig, ConfigError> {
        let output_dir = self
            .output_dir
            .ok_or(ConfigError::MissingParameter("output_dir"))?;
        if self.optimizer.population_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "population_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.optimizer.max_generations == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_generations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.execution.workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                name: "workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(sigma) = self.optimizer.initial_sigma {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(ConfigError::InvalidValue {
                    name: "initial_sigma",
                    reason: format!("{sigma} is not a positive number"),
                });
            }
        }
        Ok(FitConfig {
            problem: self.problem.build(Some(output_dir.clone()))?,
            optimizer: self.optimizer,
            execution: self.execution,
            initial_guess: self.initial_guess,
            output_dir,
        })
    }
}

#[derive(Default)]
pub struct EvaluateConfigBuilder {
    problem: ProblemBuilder,
    parameters: Option<InitialGuess>,
    retain_sandbox: bool,
    overlay_path: Option<PathBuf>,
}

impl EvaluateConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    problem_setters!();

    /// Defaults to the material's current database values.
    pub fn parameters(mut self, parameters: InitialGuess) -> Self {
        self.parameters = Some(parameters);
        self
    }
    pub fn retain_sandbox(mut self, retain: bool) -> Self {
        self.retain_sandbox = retain;
        self
    }
    pub fn overlay_path(mut self, path: Option<PathBuf>) -> Self {
        self.overlay_path = path;
        self
    }

    pub fn build(self) -> Result<EvaluateConfig, ConfigError> {
        let parameters = self.parameters.unwrap_or(InitialGuess::Database);
        if parameters == InitialGuess::Random {
            return Err(ConfigError::InvalidValue {
                name: "parameters",
                reason: "a random vector cannot be evaluated".to_string(),
            });
        }
        Ok(EvaluateConfig {
            problem: self.problem.build(None)?,
            parameters,
            retain_sandbox: self.retain_sandbox,
            overlay_path: self.overlay_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::SP3D5S_STAR_PARAMETERS;

    fn complete_fit_builder() -> FitConfigBuilder {
        FitConfigBuilder::new()
            .reference_path("ref.csv".into())
            .materials_path("materials.xml".into())
            .template_path("user_input.xml".into())
            .material("Silicon")
            .solver_executable("sdt".into())
            .output_dir("results".into())
    }

    #[test]
    fn fit_builder_fills_defaults() {
        let config = complete_fit_builder().build().unwrap();
        assert_eq!(config.problem.parameter_names.len(), SP3D5S_STAR_PARAMETERS.len());
        assert_eq!(config.problem.scratch_dir, PathBuf::from("results"));
        assert!(config.problem.solver.capture_output);
        assert_eq!(config.optimizer, OptimizerConfig::default());
        assert_eq!(config.initial_guess, InitialGuess::Random);
    }

    #[test]
    fn fit_builder_reports_first_missing_parameter() {
        let err = FitConfigBuilder::new()
            .output_dir("results".into())
            .material("Silicon")
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("solver_executable"));

        let err = FitConfigBuilder::new().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingParameter("output_dir"));
    }

    #[test]
    fn fit_builder_rejects_degenerate_values() {
        assert!(matches!(
            complete_fit_builder().population_size(Some(0)).build(),
            Err(ConfigError::InvalidValue { name: "population_size", .. })
        ));
        assert!(matches!(
            complete_fit_builder().max_generations(0).build(),
            Err(ConfigError::InvalidValue { name: "max_generations", .. })
        ));
        assert!(matches!(
            complete_fit_builder().initial_sigma(Some(-1.0)).build(),
            Err(ConfigError::InvalidValue { name: "initial_sigma", .. })
        ));
        assert!(matches!(
            complete_fit_builder().parameter_names(Vec::new()).build(),
            Err(ConfigError::InvalidValue { name: "parameter_names", .. })
        ));
    }

    #[test]
    fn solver_settings_are_collected() {
        let config = complete_fit_builder()
            .solver_launcher(vec!["/bin/sh".to_string()])
            .solver_arg("nk", "64")
            .solver_env("OMP_NUM_THREADS", "1")
            .solver_timeout(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let solver = &config.problem.solver;
        assert_eq!(solver.launcher, vec!["/bin/sh"]);
        assert_eq!(solver.extra_args, vec![("nk".to_string(), "64".to_string())]);
        assert_eq!(solver.env.len(), 1);
        assert_eq!(solver.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn evaluate_builder_requires_explicit_scratch_and_defaults_to_database() {
        let builder = EvaluateConfigBuilder::new()
            .reference_path("ref.csv".into())
            .materials_path("materials.xml".into())
            .template_path("user_input.xml".into())
            .material("Silicon")
            .solver_executable("sdt".into());
        assert_eq!(
            builder.build().unwrap_err(),
            ConfigError::MissingParameter("scratch_dir")
        );

        let config = EvaluateConfigBuilder::new()
            .reference_path("ref.csv".into())
            .materials_path("materials.xml".into())
            .template_path("user_input.xml".into())
            .material("Silicon")
            .solver_executable("sdt".into())
            .scratch_dir("scratch".into())
            .build()
            .unwrap();
        assert_eq!(config.parameters, InitialGuess::Database);
    }
}
