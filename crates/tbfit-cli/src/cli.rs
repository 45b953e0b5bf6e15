use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "tbfit - Fit tight-binding parameters so that an external band-structure solver reproduces a reference band structure.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit the free parameters of a material against a reference band structure.
    Fit(FitArgs),
    /// Run the solver once for a single parameter set and report its RMS loss.
    Evaluate(EvaluateArgs),
    /// Inspect the materials and parameters of a parameter database.
    Params(ParamsArgs),
}

/// Options shared by `fit` and `evaluate`: where the problem lives and how the solver runs.
#[derive(Args, Debug, Clone, Default)]
pub struct ProblemArgs {
    /// Path to the configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Reference band structure CSV.
    #[arg(short, long = "reference", value_name = "PATH")]
    pub reference: Option<PathBuf>,

    /// Parameter database XML holding the starting parameters.
    #[arg(long, value_name = "PATH")]
    pub materials: Option<PathBuf>,

    /// Solver input template XML.
    #[arg(long, value_name = "PATH")]
    pub user_input: Option<PathBuf>,

    /// Tight-binding solver executable.
    #[arg(long, value_name = "PATH")]
    pub solver: Option<PathBuf>,

    /// Material whose parameters are fitted.
    #[arg(short, long, value_name = "NAME")]
    pub material: Option<String>,

    /// Comma-separated list of free parameter names.
    #[arg(short, long, value_name = "NAMES", value_delimiter = ',')]
    pub params: Option<Vec<String>>,

    /// Per-entry loss weights as a CSV matrix shaped like the reference energies.
    #[arg(long, value_name = "PATH")]
    pub weights: Option<PathBuf>,

    /// Directory where trial sandboxes are created.
    #[arg(long, value_name = "PATH")]
    pub scratch_dir: Option<PathBuf>,

    /// Kill a solver run after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    pub solver_timeout: Option<f64>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S optimizer.popsize=16
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

/// Arguments for the `fit` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct FitArgs {
    #[command(flatten)]
    pub problem: ProblemArgs,

    /// Directory receiving the fit artifacts.
    #[arg(short, long, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    // --- Optimizer Overrides ---
    /// Candidates per generation.
    #[arg(long, value_name = "INT")]
    pub popsize: Option<usize>,

    /// Maximum number of generations.
    #[arg(long, value_name = "INT")]
    pub max_generations: Option<usize>,

    /// Seed for the search and for a random initial vector.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Initial step size of the search.
    #[arg(long, value_name = "FLOAT")]
    pub sigma: Option<f64>,

    #[command(flatten)]
    pub initial: InitialVectorArgs,

    // --- Execution Overrides ---
    /// Number of concurrent solver runs. Defaults to the population size.
    #[arg(short, long, value_name = "INT")]
    pub workers: Option<usize>,

    /// Stop the search after this many seconds of wall-clock time.
    #[arg(long, value_name = "SECONDS")]
    pub time_limit: Option<f64>,

    /// Keep every trial sandbox on disk after it has been scored.
    #[arg(long)]
    pub keep_sandboxes: bool,

    /// Rewrite best_params.npy whenever the best loss improves.
    #[arg(long)]
    pub checkpoint: bool,
}

/// Mutually exclusive sources for the first mean of the search.
#[derive(Args, Debug, Clone, Default)]
#[group(required = false, multiple = false)]
pub struct InitialVectorArgs {
    /// Start from a vector stored as a 1-D NPY file.
    #[arg(long, value_name = "PATH")]
    pub x0: Option<PathBuf>,

    /// Start from the material's current values in the parameter database.
    #[arg(long)]
    pub from_database: bool,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct EvaluateArgs {
    #[command(flatten)]
    pub problem: ProblemArgs,

    /// Evaluate this NPY vector instead of the database values.
    #[arg(long, value_name = "PATH")]
    pub vector: Option<PathBuf>,

    /// Keep the sandbox with the solver inputs and outputs.
    #[arg(long)]
    pub keep_sandbox: bool,

    /// Write a reference/trial overlay CSV to this path.
    #[arg(long, value_name = "PATH")]
    pub overlay: Option<PathBuf>,
}

/// Arguments for the `params` subcommand.
#[derive(Args, Debug)]
pub struct ParamsArgs {
    #[command(subcommand)]
    pub command: ParamsCommands,
}

#[derive(Subcommand, Debug)]
pub enum ParamsCommands {
    /// List the materials defined in a parameter database.
    List {
        /// Parameter database XML.
        #[arg(long, value_name = "PATH")]
        materials: Option<PathBuf>,
    },
    /// Print the parameters of one material.
    Show {
        /// Material name.
        #[arg(required = true)]
        material: String,

        /// Parameter database XML.
        #[arg(long, value_name = "PATH")]
        materials: Option<PathBuf>,

        /// Only print these comma-separated parameters.
        #[arg(short, long, value_name = "NAMES", value_delimiter = ',')]
        params: Option<Vec<String>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_global_flags() {
        let cli = Cli::parse_from([
            "tbfit", "-vv", "-j", "4", "fit", "-r", "ref.csv", "--popsize", "8", "-p",
            "E_s_a,E_p_a", "-S", "optimizer.seed=3",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.threads, Some(4));
        let Commands::Fit(args) = cli.command else {
            panic!("Expected 'fit' subcommand");
        };
        assert_eq!(args.problem.reference, Some(PathBuf::from("ref.csv")));
        assert_eq!(args.popsize, Some(8));
        assert_eq!(
            args.problem.params,
            Some(vec!["E_s_a".to_string(), "E_p_a".to_string()])
        );
        assert_eq!(args.problem.set_values, vec!["optimizer.seed=3"]);
    }

    #[test]
    fn initial_vector_sources_are_exclusive() {
        let result = Cli::try_parse_from(["tbfit", "fit", "--x0", "x.npy", "--from-database"]);
        assert!(result.is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["tbfit", "-q", "-v", "params", "list"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_params_show() {
        let cli = Cli::parse_from(["tbfit", "params", "show", "Silicon", "-p", "E_s_a"]);
        let Commands::Params(ParamsArgs {
            command: ParamsCommands::Show {
                material, params, ..
            },
        }) = cli.command
        else {
            panic!("Expected 'params show' subcommand");
        };
        assert_eq!(material, "Silicon");
        assert_eq!(params, Some(vec!["E_s_a".to_string()]));
    }
}
