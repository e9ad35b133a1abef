//! Workspace directories: create, check, and busy-aware delete.
//!
//! A workspace is a named directory under the configured root. It either
//! exists or it does not; deleting a missing workspace succeeds.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::model::ProjectRecord;
use crate::telemetry::metrics;

const BUSY_SUGGESTION: &str = "Close any editors, terminals, or test runners using these files \
     (antivirus and file indexers can also hold handles), then retry.";

// ---------------------------------------------------------------------------
// File probe
// ---------------------------------------------------------------------------

/// Detects whether another process currently holds a file.
///
/// The deletion algorithm only asks "is this file blocked?"; how that is
/// answered is swappable.
pub trait FileProbe: Send + Sync {
    fn is_blocked(&self, path: &Path) -> bool;
}

/// Opens the file for read-write and closes it straight away. A busy or
/// permission error counts as blocked; any other error does not.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenProbe;

impl FileProbe for OpenProbe {
    fn is_blocked(&self, path: &Path) -> bool {
        match std::fs::OpenOptions::new().read(true).write(true).open(path) {
            Ok(_file) => false,
            Err(e) => is_lock_signal(&e),
        }
    }
}

fn is_lock_signal(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::ResourceBusy
            | io::ErrorKind::ExecutableFileBusy
    )
}

// ---------------------------------------------------------------------------
// Delete policy
// ---------------------------------------------------------------------------

/// Retry budget for deleting trees that may contain blocked files.
#[derive(Debug, Clone, Copy)]
pub struct DeletePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the workspaces root.
pub struct WorkspaceManager {
    root: PathBuf,
    probe: Arc<dyn FileProbe>,
    policy: DeletePolicy,
}

impl WorkspaceManager {
    /// Manager over `root` using the open-for-write probe.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_probe(root, Arc::new(OpenProbe))
    }

    pub fn with_probe(root: impl Into<PathBuf>, probe: Arc<dyn FileProbe>) -> Self {
        Self {
            root: root.into(),
            probe,
            policy: DeletePolicy::default(),
        }
    }

    pub fn delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a workspace name. No I/O.
    pub fn workspace_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the workspace directory and return its path.
    ///
    /// Fails with `AlreadyExists` rather than reusing an existing directory,
    /// so two creators racing on one name cannot both succeed.
    pub async fn create_workspace(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let path = self.workspace_path(name);

        tokio::fs::create_dir_all(&self.root).await?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(path));
            }
            Err(e) => return Err(e.into()),
        }

        info!(workspace = name, path = %path.display(), "workspace created");
        Ok(path)
    }

    /// The workspace directory for a stored project.
    ///
    /// The record's `workspace_path` must be the path this manager derives
    /// from its name; a record pointing anywhere else is refused rather than
    /// generated into (or cleaned up) outside the root.
    pub fn project_workspace(&self, project: &ProjectRecord) -> Result<PathBuf> {
        validate_name(&project.name)?;
        let expected = self.workspace_path(&project.name);
        if project.workspace_path != expected {
            return Err(Error::Config(format!(
                "project {} records workspace {} but the workspaces root places it at {}",
                project.name,
                project.workspace_path.display(),
                expected.display()
            )));
        }
        Ok(expected)
    }

    pub async fn workspace_exists(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        Ok(tokio::fs::try_exists(self.workspace_path(name)).await?)
    }

    /// Delete a workspace and everything in it. Missing is success.
    pub async fn delete_workspace(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let path = self.workspace_path(name);
        self.remove_path(&path).await?;
        info!(workspace = name, "workspace deleted");
        Ok(())
    }

    /// Remove a file or directory tree once nothing in it is blocked.
    ///
    /// Scans every regular file with the probe. If any are blocked, waits
    /// out the backoff and rescans, up to the policy's attempt count. A
    /// missing path is success.
    pub async fn remove_path(&self, path: &Path) -> Result<()> {
        let attempts = self.policy.attempts.max(1);
        let mut blocked = Vec::new();

        for attempt in 1..=attempts {
            if !tokio::fs::try_exists(path).await? {
                debug!(path = %path.display(), "nothing to remove");
                return Ok(());
            }

            blocked = self.scan_blocked(path).await?;
            if blocked.is_empty() {
                return remove_ignoring_missing(path).await;
            }

            metrics::blocked_delete_retries().add(1, &[]);
            warn!(
                path = %path.display(),
                attempt,
                attempts,
                blocked = blocked.len(),
                "files held open by another process"
            );
            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff).await;
            }
        }

        Err(Error::ResourceBusy {
            path: path.to_path_buf(),
            blocked,
            suggestion: BUSY_SUGGESTION.to_string(),
        })
    }

    /// Blocked regular files under `path`, relative to `path`.
    async fn scan_blocked(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let probe = Arc::clone(&self.probe);
        let base = path.to_path_buf();
        tokio::task::spawn_blocking(move || scan_blocked(&base, probe.as_ref()))
            .await
            .map_err(|e| Error::Other(format!("blocked-file scan panicked: {e}")))
    }
}

fn scan_blocked(base: &Path, probe: &dyn FileProbe) -> Vec<PathBuf> {
    WalkDir::new(base)
        .into_iter()
        // Entries that vanish mid-walk are not blocking anything.
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| probe.is_blocked(entry.path()))
        .map(|entry| relative_to(base, entry.path()))
        .collect()
}

fn relative_to(base: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
        // `base` is the file itself
        _ => path.file_name().map(PathBuf::from).unwrap_or_default(),
    }
}

async fn remove_ignoring_missing(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let removed = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Workspace names are single path components.
fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: name.to_string(),
        reason,
    })
}
