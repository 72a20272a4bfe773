//! Project layout provider.
//!
//! Resolves a user's project to its working directory on disk and answers
//! the questions the Job Supervisor and Run Ledger ask about it: how many
//! run artifacts exist, how many runs are required, and how to clear the
//! previous run's outputs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;

use crate::error::CoreError;

/// Subdirectory of a project holding solver outputs.
pub const OUTPUT_DIR: &str = "output";

/// Solver input parameter file inside a project directory.
pub const INPUT_FILE: &str = "input.dat";

/// Parameter in [`INPUT_FILE`] holding the number of required runs.
const REQUIRED_RUNS_KEY: &str = "NUMREPS";

/// Default pattern for per-run output artifacts (`output_r00001.csv`).
pub const DEFAULT_ARTIFACT_PATTERN: &str = r"^output_r\d+\.(csv|txt|dat)$";

/// Maximum length of a user or project name.
const MAX_NAME_LEN: usize = 128;

/// Access to the on-disk layout of user projects.
#[async_trait]
pub trait ProjectLayout: Send + Sync {
    /// Resolve the working directory of `project` owned by `user`.
    ///
    /// Fails with `Validation` for malformed names and `NotFound` when the
    /// project directory does not exist.
    async fn resolve_working_directory(
        &self,
        user: &str,
        project: &str,
    ) -> Result<PathBuf, CoreError>;

    /// Count the completed-run artifacts under `dir`. Unreadable directories count as zero.
    async fn count_artifacts(&self, dir: &Path) -> usize;

    /// Delete the output files left by a previous run in `dir`.
    async fn clear_outputs(&self, dir: &Path) -> Result<(), CoreError>;

    /// Number of solver runs the project in `dir` is configured for.
    async fn required_runs(&self, dir: &Path) -> Result<u32, CoreError>;
}

/// Validate a user or project name before it is used as a path component.
pub fn validate_name(kind: &str, name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(format!("{kind} name must not be empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "{kind} name must not exceed {MAX_NAME_LEN} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::Validation(format!(
            "{kind} name may only contain letters, digits, underscore or hyphen"
        )));
    }
    Ok(())
}

/// Filesystem layout: `<root>/<user>/<project>/{input.dat,output/}`.
#[derive(Debug, Clone)]
pub struct FsProjectLayout {
    root: PathBuf,
    artifact_pattern: Regex,
}

impl FsProjectLayout {
    pub fn new(root: impl Into<PathBuf>, artifact_pattern: Regex) -> Self {
        Self {
            root: root.into(),
            artifact_pattern,
        }
    }

    /// Layout using [`DEFAULT_ARTIFACT_PATTERN`].
    pub fn with_default_pattern(root: impl Into<PathBuf>) -> Self {
        let pattern =
            Regex::new(DEFAULT_ARTIFACT_PATTERN).expect("default artifact pattern is valid");
        Self::new(root, pattern)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn output_dir(dir: &Path) -> PathBuf {
        dir.join(OUTPUT_DIR)
    }
}

#[async_trait]
impl ProjectLayout for FsProjectLayout {
    async fn resolve_working_directory(
        &self,
        user: &str,
        project: &str,
    ) -> Result<PathBuf, CoreError> {
        validate_name("User", user)?;
        validate_name("Project", project)?;

        let dir = self.root.join(user).join(project);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            _ => Err(CoreError::NotFound {
                entity: "Project",
                id: format!("{user}/{project}"),
            }),
        }
    }

    async fn count_artifacts(&self, dir: &Path) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(Self::output_dir(dir)).await else {
            return 0;
        };

        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && self.artifact_pattern.is_match(&entry.file_name().to_string_lossy()) {
                count += 1;
            }
        }
        count
    }

    async fn clear_outputs(&self, dir: &Path) -> Result<(), CoreError> {
        let output = Self::output_dir(dir);
        let mut entries = match tokio::fs::read_dir(&output).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return tokio::fs::create_dir_all(&output).await.map_err(|e| {
                    CoreError::Internal(format!("Failed to create {}: {e}", output.display()))
                });
            }
            Err(e) => {
                return Err(CoreError::Internal(format!(
                    "Failed to read {}: {e}",
                    output.display()
                )))
            }
        };

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CoreError::Internal(format!("Failed to list outputs: {e}")))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                tokio::fs::remove_file(entry.path()).await.map_err(|e| {
                    CoreError::Internal(format!(
                        "Failed to remove {}: {e}",
                        entry.path().display()
                    ))
                })?;
                removed += 1;
            }
        }

        tracing::debug!(dir = %output.display(), removed, "Cleared previous run outputs");
        Ok(())
    }

    async fn required_runs(&self, dir: &Path) -> Result<u32, CoreError> {
        let path = dir.join(INPUT_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| CoreError::NotFound {
                entity: "Input file",
                id: path.display().to_string(),
            })?;

        let value = contents
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                (parts.next() == Some(REQUIRED_RUNS_KEY)).then(|| parts.next())
            })
            .next()
            .flatten()
            .ok_or_else(|| {
                CoreError::Validation(format!("{INPUT_FILE} does not define {REQUIRED_RUNS_KEY}"))
            })?;

        match value.parse::<u32>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(CoreError::Validation(format!(
                "{REQUIRED_RUNS_KEY} must be a positive integer, got '{value}'"
            ))),
        }
    }
}
