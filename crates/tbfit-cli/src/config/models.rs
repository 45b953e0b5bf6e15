use std::path::PathBuf;
use std::time::Duration;

/// Problem settings after defaults, file, flags and `--set` have been merged.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProblem {
    pub reference: PathBuf,
    pub materials: PathBuf,
    pub user_input: PathBuf,
    pub material: String,
    /// `None` keeps the library's default sp3d5s* list.
    pub parameters: Option<Vec<String>>,
    pub weights: Option<PathBuf>,
    pub scratch_dir: Option<PathBuf>,
    pub solver: PathBuf,
    pub solver_launcher: Vec<String>,
    pub solver_args: Vec<(String, String)>,
    pub solver_env: Vec<(String, String)>,
    pub solver_timeout: Option<Duration>,
    pub capture_output: bool,
}
