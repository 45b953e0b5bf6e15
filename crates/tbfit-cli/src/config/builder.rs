use super::defaults::DefaultsConfig;
use super::file::FileConfig;
use super::models::ResolvedProblem;
use crate::cli::{EvaluateArgs, FitArgs, ProblemArgs};
use crate::error::{CliError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tbfit::engine::config as core_config;

macro_rules! with_problem {
    ($builder:expr, $problem:expr) => {{
        let problem: ResolvedProblem = $problem;
        let mut builder = $builder
            .reference_path(problem.reference)
            .materials_path(problem.materials)
            .template_path(problem.user_input)
            .material(problem.material)
            .loss_weights_path(problem.weights)
            .solver_executable(problem.solver)
            .solver_launcher(problem.solver_launcher)
            .solver_timeout(problem.solver_timeout)
            .capture_solver_output(problem.capture_output);
        if let Some(names) = problem.parameters {
            builder = builder.parameter_names(names);
        }
        if let Some(scratch) = problem.scratch_dir {
            builder = builder.scratch_dir(scratch);
        }
        for (key, value) in problem.solver_args {
            builder = builder.solver_arg(key, value);
        }
        for (key, value) in problem.solver_env {
            builder = builder.solver_env(key, value);
        }
        builder
    }};
}

pub fn build_fit_config(args: &FitArgs) -> Result<core_config::FitConfig> {
    let defaults = DefaultsConfig::default();
    let mut file_config = load_file_config(&args.problem)?;

    apply_problem_args(&mut file_config, &args.problem);
    overlay(&mut file_config.paths_mut().out_dir, &args.out_dir);
    {
        let optimizer = file_config.optimizer_mut();
        overlay(&mut optimizer.popsize, &args.popsize);
        overlay(&mut optimizer.max_generations, &args.max_generations);
        overlay(&mut optimizer.seed, &args.seed);
        overlay(&mut optimizer.sigma, &args.sigma);
        if let Some(x0) = &args.initial.x0 {
            optimizer.x0 = Some(x0.clone());
            optimizer.from_database = Some(false);
        } else if args.initial.from_database {
            optimizer.x0 = None;
            optimizer.from_database = Some(true);
        }
    }
    {
        let execution = file_config.execution_mut();
        overlay(&mut execution.workers, &args.workers);
        overlay(&mut execution.time_limit_secs, &args.time_limit);
        if args.keep_sandboxes {
            execution.keep_sandboxes = Some(true);
        }
        if args.checkpoint {
            execution.checkpoint = Some(true);
        }
    }
    apply_set_values(&mut file_config, &args.problem.set_values)?;

    let out_dir = file_config
        .paths
        .as_ref()
        .and_then(|p| p.out_dir.clone())
        .unwrap_or_else(|| defaults.out_dir.clone());
    let optimizer = file_config.optimizer.take().unwrap_or_default();
    let execution = file_config.execution.take().unwrap_or_default();
    let initial_guess = match (optimizer.x0, optimizer.from_database.unwrap_or(false)) {
        (Some(_), true) => {
            return Err(CliError::Config(
                "`optimizer.x0` and `optimizer.from-database` are mutually exclusive.".to_string(),
            ));
        }
        (Some(path), false) => core_config::InitialGuess::NpyFile(path),
        (None, true) => core_config::InitialGuess::Database,
        (None, false) => core_config::InitialGuess::Random,
    };
    let wall_clock_limit = execution
        .time_limit_secs
        .map(|secs| seconds("execution.time-limit-secs", secs))
        .transpose()?;

    let problem = resolve_problem(&file_config, &defaults)?;
    with_problem!(core_config::FitConfigBuilder::new(), problem)
        .output_dir(out_dir)
        .population_size(Some(optimizer.popsize.unwrap_or(defaults.popsize)))
        .max_generations(
            optimizer
                .max_generations
                .unwrap_or(defaults.max_generations),
        )
        .seed(optimizer.seed.unwrap_or(defaults.seed))
        .initial_sigma(optimizer.sigma)
        .tolerances(
            optimizer.tol_x.unwrap_or(defaults.tol_x),
            optimizer.tol_fun.unwrap_or(defaults.tol_fun),
        )
        .initial_guess(initial_guess)
        .workers(execution.workers)
        .retain_sandboxes(execution.keep_sandboxes.unwrap_or(false))
        .checkpoint(execution.checkpoint.unwrap_or(false))
        .wall_clock_limit(wall_clock_limit)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))
}

pub fn build_evaluate_config(args: &EvaluateArgs) -> Result<core_config::EvaluateConfig> {
    let defaults = DefaultsConfig::default();
    let mut file_config = load_file_config(&args.problem)?;
    apply_problem_args(&mut file_config, &args.problem);
    apply_set_values(&mut file_config, &args.problem.set_values)?;

    let mut problem = resolve_problem(&file_config, &defaults)?;
    if problem.scratch_dir.is_none() {
        let out_dir = file_config
            .paths
            .as_ref()
            .and_then(|p| p.out_dir.clone())
            .unwrap_or(defaults.out_dir);
        problem.scratch_dir = Some(out_dir);
    }
    let parameters = match &args.vector {
        Some(path) => core_config::InitialGuess::NpyFile(path.clone()),
        None => core_config::InitialGuess::Database,
    };

    with_problem!(core_config::EvaluateConfigBuilder::new(), problem)
        .parameters(parameters)
        .retain_sandbox(args.keep_sandbox)
        .overlay_path(args.overlay.clone())
        .build()
        .map_err(|e| CliError::Config(e.to_string()))
}

/// Database used by the `params` commands: the flag if given, else the default location.
pub fn materials_path(cli_arg: Option<&Path>) -> PathBuf {
    cli_arg
        .map(Path::to_path_buf)
        .unwrap_or_else(|| DefaultsConfig::default().materials)
}

fn load_file_config(args: &ProblemArgs) -> Result<FileConfig> {
    match &args.config {
        Some(path) => FileConfig::from_file(path),
        None => Ok(FileConfig::default()),
    }
}

fn overlay<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *slot = value.clone();
    }
}

fn apply_problem_args(config: &mut FileConfig, args: &ProblemArgs) {
    overlay(&mut config.material, &args.material);
    overlay(&mut config.parameters, &args.params);

    let paths = config.paths_mut();
    overlay(&mut paths.reference, &args.reference);
    overlay(&mut paths.materials, &args.materials);
    overlay(&mut paths.user_input, &args.user_input);
    overlay(&mut paths.scratch_dir, &args.scratch_dir);

    let solver = config.solver_mut();
    overlay(&mut solver.executable, &args.solver);
    overlay(&mut solver.timeout_secs, &args.solver_timeout);

    overlay(&mut config.loss_mut().weights, &args.weights);
}

fn resolve_problem(config: &FileConfig, defaults: &DefaultsConfig) -> Result<ResolvedProblem> {
    let paths = config.paths.clone().unwrap_or_default();
    let solver = config.solver.clone().unwrap_or_default();
    let reference = paths.reference.ok_or_else(|| {
        CliError::Config(
            "A reference band structure is required (`--reference` or `paths.reference`)."
                .to_string(),
        )
    })?;
    let solver_timeout = solver
        .timeout_secs
        .map(|secs| seconds("solver.timeout-secs", secs))
        .transpose()?;

    Ok(ResolvedProblem {
        reference,
        materials: paths.materials.unwrap_or_else(|| defaults.materials.clone()),
        user_input: paths
            .user_input
            .unwrap_or_else(|| defaults.user_input.clone()),
        material: config
            .material
            .clone()
            .unwrap_or_else(|| defaults.material.clone()),
        parameters: config.parameters.clone(),
        weights: config.loss.as_ref().and_then(|l| l.weights.clone()),
        scratch_dir: paths.scratch_dir,
        solver: solver.executable.unwrap_or_else(|| defaults.solver.clone()),
        solver_launcher: solver.launcher.unwrap_or_default(),
        solver_args: solver.args.into_iter().collect(),
        solver_env: solver.env.into_iter().collect(),
        solver_timeout,
        capture_output: solver.capture_output.unwrap_or(defaults.capture_output),
    })
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return Err(CliError::Config(format!(
            "`{}` must be a positive number of seconds, got {}",
            key, secs
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| CliError::Config(format!("Invalid duration for {}: {}", key, e)))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn apply_set_values(config: &mut FileConfig, set_values: &[String]) -> Result<()> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };
        let key = key.trim();
        let value = value.trim();

        if let Some(arg) = key.strip_prefix("solver.args.") {
            config
                .solver_mut()
                .args
                .insert(arg.to_string(), value.to_string());
            continue;
        }
        if let Some(var) = key.strip_prefix("solver.env.") {
            config
                .solver_mut()
                .env
                .insert(var.to_string(), value.to_string());
            continue;
        }

        match key {
            "material" => config.material = Some(value.to_string()),
            "parameters" => config.parameters = Some(parse_list(value)),
            "paths.reference" => config.paths_mut().reference = Some(value.into()),
            "paths.materials" => config.paths_mut().materials = Some(value.into()),
            "paths.user-input" => config.paths_mut().user_input = Some(value.into()),
            "paths.out-dir" => config.paths_mut().out_dir = Some(value.into()),
            "paths.scratch-dir" => config.paths_mut().scratch_dir = Some(value.into()),
            "solver.executable" => config.solver_mut().executable = Some(value.into()),
            "solver.launcher" => {
                config.solver_mut().launcher =
                    Some(value.split_whitespace().map(str::to_string).collect())
            }
            "solver.timeout-secs" => {
                config.solver_mut().timeout_secs = Some(parse_value(key, value)?)
            }
            "solver.capture-output" => {
                config.solver_mut().capture_output = Some(parse_value(key, value)?)
            }
            "optimizer.popsize" => config.optimizer_mut().popsize = Some(parse_value(key, value)?),
            "optimizer.max-generations" => {
                config.optimizer_mut().max_generations = Some(parse_value(key, value)?)
            }
            "optimizer.seed" => config.optimizer_mut().seed = Some(parse_value(key, value)?),
            "optimizer.sigma" => config.optimizer_mut().sigma = Some(parse_value(key, value)?),
            "optimizer.tol-x" => config.optimizer_mut().tol_x = Some(parse_value(key, value)?),
            "optimizer.tol-fun" => config.optimizer_mut().tol_fun = Some(parse_value(key, value)?),
            "optimizer.x0" => config.optimizer_mut().x0 = Some(value.into()),
            "optimizer.from-database" => {
                config.optimizer_mut().from_database = Some(parse_value(key, value)?)
            }
            "execution.workers" => config.execution_mut().workers = Some(parse_value(key, value)?),
            "execution.keep-sandboxes" => {
                config.execution_mut().keep_sandboxes = Some(parse_value(key, value)?)
            }
            "execution.time-limit-secs" => {
                config.execution_mut().time_limit_secs = Some(parse_value(key, value)?)
            }
            "execution.checkpoint" => {
                config.execution_mut().checkpoint = Some(parse_value(key, value)?)
            }
            "loss.weights" => config.loss_mut().weights = Some(value.into()),
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(())
}
