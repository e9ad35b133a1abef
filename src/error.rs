//! Error types for testforge-rs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::Stage;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("workspace already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("invalid workspace name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Files under `path` stayed open in another process for every delete attempt.
    #[error(
        "{} is in use: {} blocked file(s) [{}]. {suggestion}",
        .path.display(),
        .blocked.len(),
        join_paths(.blocked)
    )]
    ResourceBusy {
        path: PathBuf,
        /// Blocked files, relative to `path`.
        blocked: Vec<PathBuf>,
        suggestion: String,
    },

    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("tool not found: `{tool}` (is it installed and on PATH?)")]
    ToolNotFound { tool: String },

    #[error("`{command}` exited with status {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error("generation attempt timed out after {}s", .0.as_secs())]
    AttemptTimedOut(Duration),

    #[error("generation attempt panicked: {0}")]
    AttemptPanicked(String),

    #[error("orphaned: pending for {minutes} minutes")]
    Orphaned { minutes: i64 },

    #[error("template registration failed: {0}")]
    TemplateSyntax(#[from] handlebars::TemplateError),

    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("invalid project status: {0}")]
    InvalidStatus(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Missing tools, bad config, invalid names and template errors fail the
    /// same way every time, so the queue gives up on them immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ToolNotFound { .. }
            | Error::Config(_)
            | Error::InvalidName { .. }
            | Error::TemplateSyntax(_)
            | Error::Render(_) => false,
            Error::StageFailed { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// The pipeline stage this error came from, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Unwrap stage context down to the originating error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::StageFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
