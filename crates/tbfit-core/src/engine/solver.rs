use super::cancel::CancellationToken;
use super::config::SolverConfig;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const OUTPUT_FILE_NAME: &str = "bandstructure.csv";
pub const STDOUT_LOG_NAME: &str = "solver.stdout.log";
pub const STDERR_LOG_NAME: &str = "solver.stderr.log";
pub const SOLVER_MODE: &str = "tight-binding";

const STDERR_TAIL_LINES: usize = 20;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(2);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Spawn(String),
    ExitStatus(Option<i32>),
    TimedOut(Duration),
    Wait(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "could not start process: {e}"),
            Self::ExitStatus(Some(code)) => write!(f, "exited with status {code}"),
            Self::ExitStatus(None) => write!(f, "terminated by a signal"),
            Self::TimedOut(limit) => write!(f, "timed out after {:.1}s", limit.as_secs_f64()),
            Self::Wait(e) => write!(f, "failed while waiting for process: {e}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Solver executable '{0}' does not exist")]
    ExecutableNotFound(String),
    #[error("Solver execution failed: {reason}{}", stderr_suffix(stderr_tail))]
    SolverExecutionFailed {
        reason: FailureReason,
        stderr_tail: Option<String>,
    },
    #[error("Solver finished but did not write '{path}'")]
    MissingOutputArtifact { path: String },
    #[error("Solver run was cancelled")]
    Cancelled,
}

fn stderr_suffix(tail: &Option<String>) -> String {
    tail.as_deref()
        .map(|t| format!("\n--- solver stderr (tail) ---\n{t}"))
        .unwrap_or_default()
}

/// Paths handed to one solver run.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverInput {
    pub input_document: PathBuf,
    pub save_dir: PathBuf,
}

/// A black-box band-structure solver.
///
/// On success returns the path of the `bandstructure.csv` it produced inside
/// `input.save_dir`.
pub trait Solver: Send + Sync {
    fn invoke(&self, input: &SolverInput) -> Result<PathBuf, SolverError>;
}

/// Runs the solver as a child process:
/// `[launcher...] <executable> tight-binding --user_input=<path> --save_dir=<path> [--key=value...]`.
#[derive(Debug, Clone)]
pub struct ExternalSolver {
    config: SolverConfig,
    cancel: CancellationToken,
}

impl ExternalSolver {
    pub fn new(config: SolverConfig) -> Result<Self, SolverError> {
        if !executable_exists(&config.executable) {
            return Err(SolverError::ExecutableNotFound(
                config.executable.to_string_lossy().to_string(),
            ));
        }
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn command(&self, input: &SolverInput) -> Command {
        let mut command = match self.config.launcher.split_first() {
            Some((program, args)) => {
                let mut command = Command::new(program);
                command.args(args).arg(&self.config.executable);
                command
            }
            None => Command::new(&self.config.executable),
        };
        command
            .arg(SOLVER_MODE)
            .arg(format!("--user_input={}", input.input_document.display()))
            .arg(format!("--save_dir={}", input.save_dir.display()))
            .args(
                self.config
                    .extra_args
                    .iter()
                    .map(|(key, value)| format!("--{key}={value}")),
            )
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&input.save_dir)
            .stdin(Stdio::null());
        // Launchers fork the real solver; a group lets one signal reach both.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }

    fn output_streams(&self, save_dir: &Path) -> Result<(Stdio, Stdio), std::io::Error> {
        if !self.config.capture_output {
            return Ok((Stdio::null(), Stdio::null()));
        }
        let stdout = File::create(save_dir.join(STDOUT_LOG_NAME))?;
        let stderr = File::create(save_dir.join(STDERR_LOG_NAME))?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, WaitError> {
        let started = Instant::now();
        let mut interval = MIN_POLL_INTERVAL;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => {
                    kill_and_reap(child);
                    return Err(WaitError::Failed(FailureReason::Wait(e.to_string())));
                }
            }
            if self.cancel.is_cancelled() {
                kill_and_reap(child);
                return Err(WaitError::Cancelled);
            }
            if let Some(limit) = self.config.timeout {
                if started.elapsed() >= limit {
                    kill_and_reap(child);
                    return Err(WaitError::Failed(FailureReason::TimedOut(limit)));
                }
            }
            std::thread::sleep(interval);
            interval = (interval * 2).min(MAX_POLL_INTERVAL);
        }
    }

    fn failure(&self, reason: FailureReason, save_dir: &Path) -> SolverError {
        let stderr_tail = self
            .config
            .capture_output
            .then(|| read_tail(&save_dir.join(STDERR_LOG_NAME)))
            .flatten();
        SolverError::SolverExecutionFailed {
            reason,
            stderr_tail,
        }
    }
}

enum WaitError {
    Failed(FailureReason),
    Cancelled,
}

impl Solver for ExternalSolver {
    fn invoke(&self, input: &SolverInput) -> Result<PathBuf, SolverError> {
        if self.cancel.is_cancelled() {
            return Err(SolverError::Cancelled);
        }
        let mut command = self.command(input);
        let (stdout, stderr) = self.output_streams(&input.save_dir).map_err(|e| {
            SolverError::SolverExecutionFailed {
                reason: FailureReason::Spawn(format!("could not create log files: {e}")),
                stderr_tail: None,
            }
        })?;
        command.stdout(stdout).stderr(stderr);

        trace!(command = ?command, "Spawning solver.");
        let mut child = command.spawn().map_err(|e| SolverError::SolverExecutionFailed {
            reason: FailureReason::Spawn(e.to_string()),
            stderr_tail: None,
        })?;

        let status = match self.wait(&mut child) {
            Ok(status) => status,
            Err(WaitError::Cancelled) => {
                debug!(save_dir = %input.save_dir.display(), "Solver killed after cancellation.");
                return Err(SolverError::Cancelled);
            }
            Err(WaitError::Failed(reason)) => {
                warn!(save_dir = %input.save_dir.display(), "Solver run failed: {}", reason);
                return Err(self.failure(reason, &input.save_dir));
            }
        };

        if !status.success() {
            return Err(self.failure(FailureReason::ExitStatus(status.code()), &input.save_dir));
        }

        let output = input.save_dir.join(OUTPUT_FILE_NAME);
        if !output.is_file() {
            return Err(SolverError::MissingOutputArtifact {
                path: output.to_string_lossy().to_string(),
            });
        }
        Ok(output)
    }
}

/// Kills the solver together with every process it started, then reaps it.
fn kill_and_reap(child: &mut Child) {
    if let Err(e) = kill_process_group(child) {
        debug!("Failed to kill solver process group: {}", e);
        if let Err(e) = child.kill() {
            debug!("Failed to kill solver process: {}", e);
        }
    }
    if let Err(e) = child.wait() {
        debug!("Failed to reap solver process: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<(), String> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|e| e.to_string())?;
    killpg(Pid::from_raw(pid), Signal::SIGKILL).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<(), String> {
    child.kill().map_err(|e| e.to_string())
}

fn read_tail(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let lines: Vec<&str> = content.lines().collect();
    let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
    (!tail.trim().is_empty()).then_some(tail)
}

/// Bare names are looked up on `PATH`; anything with a directory part must exist.
fn executable_exists(executable: &Path) -> bool {
    let is_bare = executable.parent().is_none_or(|p| p.as_os_str().is_empty());
    if !is_bare {
        return executable.is_file();
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(executable).is_file())
    })
}
