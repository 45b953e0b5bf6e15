use crate::core::io::materials::MaterialDatabase;
use crate::core::io::user_input::{InputBindings, SolverInputTemplate};
use crate::core::io::xml::DocumentError;
use crate::core::params::ParameterMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_PREFIX: &str = "tbf_";
pub const DEFAULT_MAX_ATTEMPTS: usize = 16;
pub const INPUT_FILE_NAME: &str = "user_input.xml";
pub const MATERIALS_FILE_NAME: &str = "materials.xml";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox path '{path}' already exists ({attempts} attempts)")]
    PathCollision { path: String, attempts: usize },
    #[error("Template field missing: {0}")]
    TemplateFieldMissing(String),
    #[error("Sandbox I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to write sandbox document: {0}")]
    Document(DocumentError),
}

impl From<DocumentError> for SandboxError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::MissingField(field) => Self::TemplateFieldMissing(format!("<{field}>")),
            DocumentError::MaterialNotFound(material) => {
                Self::TemplateFieldMissing(format!("material '{material}'"))
            }
            other => Self::Document(other),
        }
    }
}

static SANDBOX_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_name(prefix: &str) -> String {
    let count = SANDBOX_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!(
        "{prefix}{}_{count}_{:08x}",
        std::process::id(),
        rand::random::<u32>()
    )
}

/// Factory for per-trial scratch directories below one root.
#[derive(Clone)]
pub struct TrialSandbox {
    root: PathBuf,
    prefix: String,
    retain: bool,
    max_attempts: usize,
    name_source: fn(&str) -> String,
}

impl std::fmt::Debug for TrialSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialSandbox")
            .field("root", &self.root)
            .field("prefix", &self.prefix)
            .field("retain", &self.retain)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl TrialSandbox {
    /// Creates `root` (and its parents) if needed. The root is made absolute, as
    /// the solver runs with its sandbox as working directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let root = root.into();
        let io_error = |e: std::io::Error| SandboxError::Io {
            path: root.to_string_lossy().to_string(),
            source: e,
        };
        std::fs::create_dir_all(&root).map_err(io_error)?;
        let root = std::path::absolute(&root).map_err(io_error)?;
        Ok(Self {
            root,
            prefix: DEFAULT_PREFIX.to_string(),
            retain: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            name_source: unique_name,
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_retention(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh directory; an existing path is never reused.
    pub fn create(&self) -> Result<Sandbox, SandboxError> {
        let mut last_path = self.root.clone();
        for attempt in 1..=self.max_attempts {
            let path = self.root.join((self.name_source)(&self.prefix));
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Created sandbox.");
                    return Ok(Sandbox {
                        path,
                        retained: self.retain,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), attempt, "Sandbox path collision, retrying.");
                    last_path = path;
                }
                Err(e) => {
                    return Err(SandboxError::Io {
                        path: path.to_string_lossy().to_string(),
                        source: e,
                    });
                }
            }
        }
        Err(SandboxError::PathCollision {
            path: last_path.to_string_lossy().to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// One trial's scratch directory. Removed with its contents on drop unless retained.
#[derive(Debug)]
pub struct Sandbox {
    path: PathBuf,
    retained: bool,
}

impl Sandbox {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `save_dir` handed to the solver.
    pub fn output_dir(&self) -> &Path {
        &self.path
    }

    pub fn is_retained(&self) -> bool {
        self.retained
    }

    pub fn retain(&mut self) {
        self.retained = true;
    }

    /// Gives up ownership of the directory; it survives the handle.
    pub fn keep(mut self) -> PathBuf {
        self.retained = true;
        std::mem::take(&mut self.path)
    }

    /// Renders the solver input template into `user_input.xml`.
    pub fn write_input(
        &self,
        template: &SolverInputTemplate,
        bindings: &InputBindings,
    ) -> Result<PathBuf, SandboxError> {
        let path = self.path.join(INPUT_FILE_NAME);
        template.render(bindings)?.save(&path)?;
        Ok(path)
    }

    /// Writes `materials.xml`: `database` with `parameters` applied to `material`,
    /// pruned to the `keep_only` materials.
    pub fn materials_document<S: AsRef<str>>(
        &self,
        database: &MaterialDatabase,
        material: &str,
        parameters: &ParameterMap,
        keep_only: &[S],
    ) -> Result<PathBuf, SandboxError> {
        let mut document = database.clone();
        document.apply(material, parameters)?;
        document.retain_materials(keep_only);
        let path = self.path.join(MATERIALS_FILE_NAME);
        document.save(&path)?;
        Ok(path)
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if self.retained || self.path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "Failed to remove sandbox: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    const TEMPLATE: &str = "<input><material>X</material><material_db_path/><nk>8</nk></input>";
    const DATABASE: &str = r#"<materials>
  <material name="Silicon"><E_s_a val="-2.0"/><E_s_c val="-2.0"/></material>
  <material name="Germanium"><E_s_a val="-1.0"/></material>
</materials>"#;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn new_creates_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("scratch");
        let sandboxes = TrialSandbox::new(&root).unwrap();
        assert!(root.is_dir());
        assert_eq!(sandboxes.root(), root);
    }

    #[test]
    fn sandbox_is_removed_on_drop() {
        let dir = tempdir().unwrap();
        let sandboxes = TrialSandbox::new(dir.path()).unwrap();
        let sandbox = sandboxes.create().unwrap();
        let path = sandbox.path().to_path_buf();
        std::fs::write(path.join("bandstructure.csv"), "x").unwrap();
        assert!(path.is_dir());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with(DEFAULT_PREFIX));

        drop(sandbox);
        assert!(!path.exists());
    }

    #[test]
    fn sandbox_is_removed_when_a_panic_unwinds() {
        let dir = tempdir().unwrap();
        let sandboxes = TrialSandbox::new(dir.path()).unwrap();
        let result = std::panic::catch_unwind(|| {
            let _sandbox = sandboxes.create().unwrap();
            panic!("solver wrapper exploded");
        });
        assert!(result.is_err());
        assert_eq!(entries(dir.path()), 0);
    }

    #[test]
    fn retained_and_kept_sandboxes_survive() {
        let dir = tempdir().unwrap();
        let retaining = TrialSandbox::new(dir.path()).unwrap().with_retention(true);
        let retained = retaining.create().unwrap();
        let retained_path = retained.path().to_path_buf();
        drop(retained);
        assert!(retained_path.is_dir());

        let sandboxes = TrialSandbox::new(dir.path()).unwrap().with_prefix("final_");
        let kept_path = sandboxes.create().unwrap().keep();
        assert!(kept_path.is_dir());
        assert!(kept_path.file_name().unwrap().to_string_lossy().starts_with("final_"));
    }

    fn always_taken(_: &str) -> String {
        "taken".to_string()
    }

    #[test]
    fn persistent_collision_fails_after_max_attempts() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("taken")).unwrap();
        let mut sandboxes = TrialSandbox::new(dir.path()).unwrap().with_max_attempts(3);
        sandboxes.name_source = always_taken;

        match sandboxes.create() {
            Err(SandboxError::PathCollision { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected PathCollision, got {other:?}"),
        }
        assert!(dir.path().join("taken").is_dir());
    }

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn taken_then_fresh(_: &str) -> String {
        match CALLS.fetch_add(1, Ordering::SeqCst) {
            0 => "taken".to_string(),
            n => format!("fresh_{n}"),
        }
    }

    #[test]
    fn collision_is_retried_with_a_new_name() {
        let dir = tempdir().unwrap();
        let taken = dir.path().join("taken");
        std::fs::create_dir(&taken).unwrap();
        std::fs::write(taken.join("marker"), "owned by someone else").unwrap();
        let mut sandboxes = TrialSandbox::new(dir.path()).unwrap();
        sandboxes.name_source = taken_then_fresh;

        let sandbox = sandboxes.create().unwrap();
        assert_ne!(sandbox.path(), taken);
        drop(sandbox);
        assert!(taken.join("marker").exists());
    }

    #[test]
    fn concurrent_creation_yields_distinct_directories() {
        let dir = tempdir().unwrap();
        let sandboxes = TrialSandbox::new(dir.path()).unwrap();

        let paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..125)
                            .map(|_| sandboxes.create().unwrap().keep())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        let unique: HashSet<_> = paths.iter().collect();
        assert_eq!(paths.len(), 1000);
        assert_eq!(unique.len(), 1000);
        assert_eq!(entries(dir.path()), 1000);
    }

    #[test]
    fn documents_are_written_inside_the_sandbox() {
        let dir = tempdir().unwrap();
        let sandbox = TrialSandbox::new(dir.path()).unwrap().create().unwrap();
        let database = MaterialDatabase::parse(DATABASE).unwrap();
        let template = SolverInputTemplate::parse(TEMPLATE).unwrap();
        let params: ParameterMap = [("E_s_a", -3.5)].into_iter().collect();

        let db_path = sandbox
            .materials_document(&database, "Silicon", &params, &["Silicon"])
            .unwrap();
        let input_path = sandbox
            .write_input(
                &template,
                &InputBindings {
                    material: "Silicon".to_string(),
                    material_db_path: db_path.clone(),
                },
            )
            .unwrap();

        assert!(db_path.starts_with(sandbox.path()));
        assert!(input_path.starts_with(sandbox.path()));
        let written = MaterialDatabase::load(&db_path).unwrap();
        assert_eq!(written.list_materials(), vec!["Silicon"]);
        assert_eq!(written.parameter("Silicon", "E_s_c").unwrap(), Some(-3.5));
        let input = std::fs::read_to_string(&input_path).unwrap();
        assert!(input.contains("<nk>8</nk>"));
        assert!(input.contains(&db_path.to_string_lossy().to_string()));
    }

    #[test]
    fn missing_template_fields_are_reported() {
        let dir = tempdir().unwrap();
        let sandbox = TrialSandbox::new(dir.path()).unwrap().create().unwrap();
        let database = MaterialDatabase::parse(DATABASE).unwrap();
        let template = SolverInputTemplate::parse("<input><material/></input>").unwrap();
        let bindings = InputBindings {
            material: "Silicon".to_string(),
            material_db_path: PathBuf::from("materials.xml"),
        };

        assert!(matches!(
            sandbox.write_input(&template, &bindings),
            Err(SandboxError::TemplateFieldMissing(_))
        ));
        assert!(matches!(
            sandbox.materials_document(&database, "Carbon", &ParameterMap::new(), &["Carbon"]),
            Err(SandboxError::TemplateFieldMissing(_))
        ));
    }
}
