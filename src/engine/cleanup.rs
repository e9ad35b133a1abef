//! Failure cleanup cascade.
//!
//! After a failed generation the workspace is stripped of generated
//! artifacts, dependency caches, and run output, then given a minimal
//! manifest and runner config so it can be regenerated. If any of that
//! fails, the whole workspace is deleted instead. Nothing here returns an
//! error: the worst case is a logged emergency-wipe failure.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{TimeDelta, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::model::{ProjectRecord, ProjectStatus};
use crate::store::ProjectStore;
use crate::telemetry::metrics;
use crate::template::{self, MANIFEST_PATH, RUNNER_CONFIG_PATH, TemplateRenderer};
use crate::workspace::WorkspaceManager;

/// Dependency cache and its lock file.
const DEPENDENCY_CACHE: [&str; 2] = ["node_modules", "package-lock.json"];

/// Output left behind by test runs.
const TRANSIENT_DIRS: [&str; 5] = [
    "test-results",
    "playwright-report",
    "blob-report",
    "reports",
    ".cache",
];

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// PENDING records older than this are treated as orphaned.
    pub orphan_threshold: TimeDelta,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            orphan_threshold: TimeDelta::minutes(30),
        }
    }
}

/// How a cleanup run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The workspace directory did not exist.
    NothingToClean,
    /// The cascade completed; the workspace holds minimal config.
    Restored,
    /// The cascade failed and the workspace was deleted.
    EmergencyWiped,
    /// The cascade failed and so did the wipe. Logged only.
    EmergencyFailed,
}

impl CleanupOutcome {
    fn label(self) -> &'static str {
        match self {
            CleanupOutcome::NothingToClean => "nothing",
            CleanupOutcome::Restored => "restored",
            CleanupOutcome::EmergencyWiped => "emergency_wiped",
            CleanupOutcome::EmergencyFailed => "emergency_failed",
        }
    }
}

pub struct CleanupPipeline {
    workspaces: Arc<WorkspaceManager>,
    store: Arc<dyn ProjectStore>,
    templates: Arc<TemplateRenderer>,
    config: CleanupConfig,
}

impl CleanupPipeline {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        store: Arc<dyn ProjectStore>,
        templates: Arc<TemplateRenderer>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            workspaces,
            store,
            templates,
            config,
        }
    }

    /// Run the cascade for a project whose generation failed with `cause`.
    pub async fn cleanup_failed_project(
        &self,
        project: &ProjectRecord,
        cause: &Error,
    ) -> CleanupOutcome {
        let start = Instant::now();
        info!(project = %project.name, %cause, "cleaning up failed project");

        let outcome = match self.workspaces.project_workspace(project) {
            Err(e) => {
                // nothing under the root belongs to this record
                warn!(
                    project = %project.name,
                    error = %e,
                    "not cleaning outside the workspaces root"
                );
                CleanupOutcome::NothingToClean
            }
            Ok(dir) => match tokio::fs::try_exists(&dir).await {
                Ok(false) => CleanupOutcome::NothingToClean,
                _ => self.cascade_or_wipe(project, &dir).await,
            },
        };

        metrics::cleanups().add(1, &[KeyValue::new("result", outcome.label())]);
        metrics::operation_duration_ms().record(
            start.elapsed().as_millis() as f64,
            &[KeyValue::new("operation", "cleanup")],
        );
        info!(project = %project.name, outcome = outcome.label(), "cleanup finished");
        outcome
    }

    /// Clean up every PENDING record older than the orphan threshold and
    /// mark it FAILED. Returns how many were swept.
    pub async fn cleanup_orphaned_projects(&self, records: &[ProjectRecord]) -> usize {
        let now = Utc::now();
        let mut swept = 0;

        for record in records {
            let age = now - record.updated_at;
            if record.status != ProjectStatus::Pending || age <= self.config.orphan_threshold {
                continue;
            }

            warn!(project = %record.name, age_minutes = age.num_minutes(), "orphaned project");
            let cause = Error::Orphaned {
                minutes: age.num_minutes(),
            };
            self.cleanup_failed_project(record, &cause).await;

            if let Err(e) = self
                .store
                .update_status(record.id, ProjectStatus::Failed)
                .await
            {
                warn!(project = %record.name, error = %e, "failed to mark orphan as FAILED");
            }
            swept += 1;
        }

        swept
    }

    /// Pull PENDING records from the store and sweep the orphans among them.
    pub async fn sweep_orphans(&self) -> Result<usize> {
        let pending = self.store.list_pending().await?;
        Ok(self.cleanup_orphaned_projects(&pending).await)
    }

    async fn cascade_or_wipe(&self, project: &ProjectRecord, dir: &Path) -> CleanupOutcome {
        match self.cascade(project, dir).await {
            Ok(()) => CleanupOutcome::Restored,
            Err(e) => {
                error!(
                    project = %project.name,
                    error = %e,
                    "cleanup cascade failed, deleting workspace"
                );
                self.emergency_cleanup(project).await
            }
        }
    }

    async fn cascade(&self, project: &ProjectRecord, dir: &Path) -> Result<()> {
        // 1. generated artifacts, with the blocked-file retry
        for artifact in template::removable_artifacts() {
            self.workspaces.remove_path(&dir.join(artifact.path)).await?;
        }
        debug!(project = %project.name, "generated artifacts removed");

        // 2. dependency cache
        for entry in DEPENDENCY_CACHE {
            remove_if_present(&dir.join(entry)).await?;
        }

        // 3. run output
        for entry in TRANSIENT_DIRS {
            remove_if_present(&dir.join(entry)).await?;
        }

        // 4. safe defaults
        tokio::fs::write(dir.join(MANIFEST_PATH), template::minimal_manifest(&project.name))
            .await?;
        let runner_config = self.templates.minimal_runner_config(&project.base_url)?;
        tokio::fs::write(dir.join(RUNNER_CONFIG_PATH), runner_config).await?;
        debug!(project = %project.name, "minimal config restored");

        Ok(())
    }

    async fn emergency_cleanup(&self, project: &ProjectRecord) -> CleanupOutcome {
        match self.workspaces.delete_workspace(&project.name).await {
            Ok(()) => {
                warn!(project = %project.name, "emergency cleanup deleted workspace");
                CleanupOutcome::EmergencyWiped
            }
            Err(e) => {
                error!(project = %project.name, error = %e, "emergency cleanup failed");
                CleanupOutcome::EmergencyFailed
            }
        }
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}
