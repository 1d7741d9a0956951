//! Per-job scratch directories.
//!
//! ## Why one directory per job?
//!
//! Both backends read and write files, and LibreOffice additionally keeps a
//! user profile that it locks while running. Giving every job its own
//! directory (input, output, and profile inside it) means two concurrent
//! jobs can never see each other's files or fight over a profile lock.
//!
//! The directory is a [`tempfile::TempDir`], so it is removed when the
//! [`Workspace`] is dropped: on success, on error, on timeout, when the
//! request future is cancelled, and during unwinding. [`Workspace::release`]
//! is the explicit path, which also reports removal failures.

use crate::error::{ConvertError, SetupError};
use crate::format::DocumentFormat;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Name prefix of every job directory under the workspace root.
pub const JOB_DIR_PREFIX: &str = "docbridge-job-";

/// Creates job workspaces under a fixed root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Prepare the root directory, creating it if needed.
    ///
    /// The root is canonicalised: LibreOffice needs an absolute `file://`
    /// URL for its profile, and stderr sanitising matches on the exact path
    /// handed to the backends.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SetupError> {
        let root = root.into();
        let prepare = |root: &Path| {
            std::fs::create_dir_all(root)?;
            std::fs::canonicalize(root)
        };
        let root = prepare(&root).map_err(|source| SetupError::WorkspaceRoot {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh, uniquely named directory for one job.
    pub fn acquire(&self) -> Result<Workspace, ConvertError> {
        let dir = tempfile::Builder::new()
            .prefix(JOB_DIR_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| {
                ConvertError::Internal(format!(
                    "failed to create workspace in {}: {e}",
                    self.root.display()
                ))
            })?;
        debug!("Acquired workspace {}", dir.path().display());
        Ok(Workspace { dir })
    }

    /// Remove job directories older than `max_age`.
    ///
    /// A crashed process cannot run destructors, so its workspaces survive.
    /// Called once at startup; returns how many directories were removed.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan workspace root {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(JOB_DIR_PREFIX) {
                continue;
            }
            let age = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if !matches!(age, Some(age) if age >= max_age) {
                continue;
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove stale workspace {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            info!("Removed {} stale workspace(s) from {}", removed, self.root.display());
        }
        removed
    }
}

/// A job's private directory. Deleted on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where the source document is written: `input.<ext>`.
    pub fn input_path(&self, format: DocumentFormat) -> PathBuf {
        self.path().join(format!("input.{}", format.extension()))
    }

    /// Where pandoc writes its result: `output.<ext>`.
    pub fn output_path(&self, format: DocumentFormat) -> PathBuf {
        self.path().join(format!("output.{}", format.extension()))
    }

    /// LibreOffice `--outdir`.
    pub fn out_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    /// LibreOffice user profile for this job only.
    pub fn profile_dir(&self) -> PathBuf {
        self.path().join("profile")
    }

    /// Write the source document into the workspace.
    pub async fn write_input(
        &self,
        format: DocumentFormat,
        bytes: &[u8],
    ) -> Result<PathBuf, ConvertError> {
        let path = self.input_path(format);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ConvertError::Internal(format!("failed to write {}: {e}", path.display())))?;
        Ok(path)
    }

    /// Remove the directory now, logging (not returning) any failure.
    pub async fn release(self) {
        let path = self.dir.path().to_path_buf();
        let result = tokio::task::spawn_blocking(move || self.dir.close()).await;
        match result {
            Ok(Ok(())) => debug!("Released workspace {}", path.display()),
            Ok(Err(e)) => warn!("Failed to delete workspace {}: {}", path.display(), e),
            Err(e) => warn!("Workspace cleanup task for {} failed: {}", path.display(), e),
        }
    }
}
