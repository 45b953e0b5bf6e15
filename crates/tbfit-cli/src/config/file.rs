use crate::error::{CliError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Contents of a `tbfit` TOML configuration file. Every field is optional;
/// whatever is left unset falls back to the command line or the built-in
/// defaults.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub material: Option<String>,
    pub parameters: Option<Vec<String>>,
    pub paths: Option<FilePathsConfig>,
    pub solver: Option<FileSolverConfig>,
    pub optimizer: Option<FileOptimizerConfig>,
    pub execution: Option<FileExecutionConfig>,
    pub loss: Option<FileLossConfig>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FilePathsConfig {
    pub reference: Option<PathBuf>,
    pub materials: Option<PathBuf>,
    pub user_input: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSolverConfig {
    pub executable: Option<PathBuf>,
    pub launcher: Option<Vec<String>>,
    pub timeout_secs: Option<f64>,
    pub capture_output: Option<bool>,
    /// Extra `--key=value` solver arguments.
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileOptimizerConfig {
    pub popsize: Option<usize>,
    pub max_generations: Option<usize>,
    pub seed: Option<u64>,
    pub sigma: Option<f64>,
    pub tol_x: Option<f64>,
    pub tol_fun: Option<f64>,
    pub x0: Option<PathBuf>,
    pub from_database: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileExecutionConfig {
    pub workers: Option<usize>,
    pub keep_sandboxes: Option<bool>,
    pub time_limit_secs: Option<f64>,
    pub checkpoint: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileLossConfig {
    pub weights: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn paths_mut(&mut self) -> &mut FilePathsConfig {
        self.paths.get_or_insert_with(Default::default)
    }

    pub fn solver_mut(&mut self) -> &mut FileSolverConfig {
        self.solver.get_or_insert_with(Default::default)
    }

    pub fn optimizer_mut(&mut self) -> &mut FileOptimizerConfig {
        self.optimizer.get_or_insert_with(Default::default)
    }

    pub fn execution_mut(&mut self) -> &mut FileExecutionConfig {
        self.execution.get_or_insert_with(Default::default)
    }

    pub fn loss_mut(&mut self) -> &mut FileLossConfig {
        self.loss.get_or_insert_with(Default::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_every_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fit.toml");
        fs::write(
            &path,
            r#"
            material = "GaAs"
            parameters = ["E_s_a", "E_p_a"]

            [paths]
            reference = "ref.csv"
            user-input = "template.xml"

            [solver]
            executable = "bin/sdt"
            launcher = ["mpirun", "-n", "1"]
            timeout-secs = 90.0

            [solver.args]
            nk = "64"

            [optimizer]
            popsize = 16
            max-generations = 50
            from-database = true

            [execution]
            workers = 4
            keep-sandboxes = true

            [loss]
            weights = "weights.csv"
            "#,
        )
        .unwrap();

        let config = FileConfig::from_file(&path).unwrap();
        assert_eq!(config.material.as_deref(), Some("GaAs"));
        assert_eq!(config.parameters.as_ref().map(Vec::len), Some(2));
        let paths = config.paths.unwrap();
        assert_eq!(paths.reference, Some(PathBuf::from("ref.csv")));
        assert_eq!(paths.user_input, Some(PathBuf::from("template.xml")));
        let solver = config.solver.unwrap();
        assert_eq!(solver.launcher.as_ref().map(Vec::len), Some(3));
        assert_eq!(solver.args.get("nk").map(String::as_str), Some("64"));
        assert_eq!(solver.timeout_secs, Some(90.0));
        let optimizer = config.optimizer.unwrap();
        assert_eq!(optimizer.popsize, Some(16));
        assert_eq!(optimizer.from_database, Some(true));
        assert_eq!(config.execution.unwrap().workers, Some(4));
        assert_eq!(
            config.loss.unwrap().weights,
            Some(PathBuf::from("weights.csv"))
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[optimizer]\npopulation = 8\n").unwrap();

        let result = FileConfig::from_file(&path);
        assert!(matches!(result, Err(CliError::FileParsing { .. })));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        let result = FileConfig::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
