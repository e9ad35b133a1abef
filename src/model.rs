//! Core data model.
//!
//! A project record is owned by the external store; this crate only reads it
//! and writes its status. A queue item wraps a record with scheduling state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Project Record
// ---------------------------------------------------------------------------

/// A generated test project as seen by the provisioning core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,

    /// Display name. Doubles as the workspace directory name, so it is unique.
    pub name: String,

    /// Base URL of the API under test.
    pub base_url: String,

    /// Absolute path of the project's workspace directory.
    pub workspace_path: PathBuf,

    pub description: Option<String>,

    /// The only field this crate mutates.
    pub status: ProjectStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    /// A fresh PENDING record.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            name: name.into(),
            base_url: base_url.into(),
            workspace_path: workspace_path.into(),
            description: None,
            status: ProjectStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Newtype for project IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Externally visible lifecycle of a project. No other states exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Pending,
    Ready,
    Failed,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::Ready => "READY",
            ProjectStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ProjectStatus::Pending),
            "READY" => Ok(ProjectStatus::Ready),
            "FAILED" => Ok(ProjectStatus::Failed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stage
// ---------------------------------------------------------------------------

/// Ordered stages of one generation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Workspace,
    Scaffold,
    Directories,
    Templates,
    Dependencies,
    HealthCheck,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Workspace,
        Stage::Scaffold,
        Stage::Directories,
        Stage::Templates,
        Stage::Dependencies,
        Stage::HealthCheck,
    ];
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Workspace => "workspace",
            Stage::Scaffold => "scaffold",
            Stage::Directories => "directories",
            Stage::Templates => "templates",
            Stage::Dependencies => "dependencies",
            Stage::HealthCheck => "health-check",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Attempt Outcome
// ---------------------------------------------------------------------------

/// How a single generation attempt ended. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    HealthCheckFailed,
    StepFailed { stage: Option<Stage>, cause: String },
    TimedOut,
}

impl AttemptOutcome {
    pub fn from_result(result: &Result<()>) -> Self {
        let Err(err) = result else {
            return AttemptOutcome::Success;
        };
        match err.root_cause() {
            Error::HealthCheckFailed(_) => AttemptOutcome::HealthCheckFailed,
            Error::AttemptTimedOut(_) => AttemptOutcome::TimedOut,
            cause => AttemptOutcome::StepFailed {
                stage: err.stage(),
                cause: cause.to_string(),
            },
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::HealthCheckFailed => "health_check_failed",
            AttemptOutcome::StepFailed { .. } => "step_failed",
            AttemptOutcome::TimedOut => "timed_out",
        }
    }
}

// ---------------------------------------------------------------------------
// Queue Item
// ---------------------------------------------------------------------------

/// A pending or retried generation request.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub project: ProjectRecord,
    /// Higher is served first.
    pub priority: u32,
    pub retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(project: ProjectRecord, priority: u32) -> Self {
        Self {
            project,
            priority,
            retries: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Record a failed attempt: one more retry, one less priority (floor 1).
    pub fn demote(&mut self) {
        self.retries += 1;
        self.priority = self.priority.saturating_sub(1).max(1);
    }

    pub fn snapshot(&self) -> QueueItemSnapshot {
        QueueItemSnapshot {
            name: self.project.name.clone(),
            priority: self.priority,
            retries: self.retries,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Read-only view of a queued item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItemSnapshot {
    pub name: String,
    pub priority: u32,
    pub retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Point-in-time view of the execution queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub is_processing: bool,
    pub queue_length: usize,
    pub items: Vec<QueueItemSnapshot>,
}
