//! Project status store.
//!
//! The relational store owns project records; the provisioning core only
//! needs to write a status and find PENDING records. `PgProjectStore` talks
//! to the real table, `MemoryStore` backs tests and one-off runs.

pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::model::{ProjectId, ProjectRecord, ProjectStatus};

pub use postgres::PgProjectStore;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Set a project's status. Writing the current status again is a no-op.
    async fn update_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()>;

    /// All records currently PENDING.
    async fn list_pending(&self) -> Result<Vec<ProjectRecord>>;

    async fn get(&self, id: ProjectId) -> Result<ProjectRecord>;
}

/// In-process store keyed by project ID.
#[derive(Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectId, ProjectRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: ProjectRecord) {
        self.projects.lock().insert(project.id, project);
    }

    /// Current status, if the project is known.
    pub fn status(&self, id: ProjectId) -> Option<ProjectStatus> {
        self.projects.lock().get(&id).map(|p| p.status)
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn update_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()> {
        let mut projects = self.projects.lock();
        let project = projects
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("project {id}")))?;
        if project.status != status {
            project.status = status;
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ProjectRecord>> {
        let mut pending: Vec<_> = self
            .projects
            .lock()
            .values()
            .filter(|p| p.status == ProjectStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn get(&self, id: ProjectId) -> Result<ProjectRecord> {
        self.projects
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("project {id}")))
    }
}
