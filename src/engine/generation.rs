//! Generation pipeline: turn an empty workspace into a health-checked project.
//!
//! Stages run in order (see [`Stage`]). The record becomes READY only after
//! the health check passes. Any stage failure marks it FAILED, runs the
//! cleanup cascade, and hands the error back to the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use opentelemetry::KeyValue;
use tracing::{info, warn};

use crate::config::ToolchainConfig;
use crate::error::{Error, Result};
use crate::model::{ProjectRecord, ProjectStatus, Stage};
use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use crate::store::ProjectStore;
use crate::telemetry::metrics;
use crate::template::{SUPPLEMENTARY_DIRS, TemplateRenderer, TemplateVars};
use crate::workspace::WorkspaceManager;

use super::cleanup::CleanupPipeline;

/// What the execution queue drives.
#[async_trait]
pub trait ProjectGenerator: Send + Sync {
    /// Run one full generation attempt.
    async fn generate(&self, project: &ProjectRecord) -> Result<()>;

    /// The queue stopped waiting on an attempt (its deadline fired). The
    /// attempt's future has already been dropped.
    async fn abandon(&self, _project: &ProjectRecord, _cause: &Error) {}
}

pub struct GenerationPipeline {
    workspaces: Arc<WorkspaceManager>,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn ProjectStore>,
    cleanup: Arc<CleanupPipeline>,
    templates: Arc<TemplateRenderer>,
    toolchain: ToolchainConfig,
}

impl GenerationPipeline {
    pub fn new(
        workspaces: Arc<WorkspaceManager>,
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn ProjectStore>,
        cleanup: Arc<CleanupPipeline>,
        templates: Arc<TemplateRenderer>,
        toolchain: ToolchainConfig,
    ) -> Self {
        Self {
            workspaces,
            runner,
            store,
            cleanup,
            templates,
            toolchain,
        }
    }

    /// Generate a project end to end, driving its status field.
    pub async fn generate_project(&self, project: &ProjectRecord) -> Result<()> {
        let start = Instant::now();

        let ready = match self.run_stages(project).await {
            Ok(dir) => self
                .store
                .update_status(project.id, ProjectStatus::Ready)
                .await
                .map(|()| dir),
            Err(e) => Err(e),
        };

        match ready {
            Ok(dir) => {
                metrics::operation_duration_ms().record(
                    start.elapsed().as_millis() as f64,
                    &[KeyValue::new("operation", "generation")],
                );
                info!(
                    project = %project.name,
                    dir = %dir.display(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "project ready"
                );
                Ok(())
            }
            Err(e) => {
                self.fail(project, &e).await;
                Err(e)
            }
        }
    }

    /// Mark the record FAILED and run the cleanup cascade. Never fails.
    async fn fail(&self, project: &ProjectRecord, cause: &Error) {
        warn!(project = %project.name, error = %cause, "generation failed");
        if let Err(e) = self
            .store
            .update_status(project.id, ProjectStatus::Failed)
            .await
        {
            warn!(project = %project.name, error = %e, "failed to mark project FAILED");
        }
        self.cleanup.cleanup_failed_project(project, cause).await;
    }

    async fn run_stages(&self, project: &ProjectRecord) -> Result<PathBuf> {
        let dir = in_stage(project, Stage::Workspace, self.prepare_workspace(project)).await?;

        in_stage(
            project,
            Stage::Scaffold,
            self.run_tool(&self.toolchain.scaffold, &dir),
        )
        .await?;

        in_stage(project, Stage::Directories, create_directories(&dir)).await?;

        let vars = TemplateVars::new(project, &dir);
        in_stage(project, Stage::Templates, self.write_templates(&dir, &vars)).await?;

        in_stage(
            project,
            Stage::Dependencies,
            self.run_tool(&self.toolchain.install, &dir),
        )
        .await?;

        in_stage(project, Stage::HealthCheck, self.health_check(&dir)).await?;

        Ok(dir)
    }

    /// Reuse the project's workspace if it is already there (a retry, or a
    /// workspace the caller created up front), otherwise create it.
    async fn prepare_workspace(&self, project: &ProjectRecord) -> Result<PathBuf> {
        let dir = self.workspaces.project_workspace(project)?;
        if tokio::fs::try_exists(&dir).await? {
            return Ok(dir);
        }
        self.workspaces.create_workspace(&project.name).await
    }

    async fn write_templates(&self, dir: &Path, vars: &TemplateVars) -> Result<()> {
        for file in self.templates.render_all(vars)? {
            let path = dir.join(file.artifact.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, file.contents).await?;
        }
        Ok(())
    }

    async fn run_tool(&self, command: &str, dir: &Path) -> Result<CommandOutput> {
        let spec = CommandSpec::new(command, dir)
            .envs(&self.toolchain.env)
            .timeout(self.toolchain.command_timeout());
        self.runner.run(&spec).await
    }

    async fn health_check(&self, dir: &Path) -> Result<()> {
        match self.run_tool(&self.toolchain.health_check, dir).await {
            Ok(_) => Ok(()),
            Err(Error::CommandFailed { code, stderr, .. }) => Err(Error::HealthCheckFailed(
                format!("exit status {code}: {stderr}"),
            )),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ProjectGenerator for GenerationPipeline {
    async fn generate(&self, project: &ProjectRecord) -> Result<()> {
        self.generate_project(project).await
    }

    async fn abandon(&self, project: &ProjectRecord, cause: &Error) {
        self.fail(project, cause).await;
    }
}

/// Run one stage, logging its duration and tagging any error with the stage.
async fn in_stage<T>(
    project: &ProjectRecord,
    stage: Stage,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let start = Instant::now();
    let result = fut.await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(value) => {
            info!(project = %project.name, %stage, duration_ms, "stage completed");
            Ok(value)
        }
        Err(e) => {
            warn!(project = %project.name, %stage, duration_ms, error = %e, "stage failed");
            Err(Error::StageFailed {
                stage,
                source: Box::new(e),
            })
        }
    }
}

async fn create_directories(dir: &Path) -> Result<()> {
    for sub in SUPPLEMENTARY_DIRS {
        tokio::fs::create_dir_all(dir.join(sub)).await?;
    }
    Ok(())
}
