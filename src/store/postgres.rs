//! Postgres-backed project store.
//!
//! Reads and updates the `projects` table owned by the application's
//! relational layer. No migrations run from here.

use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::debug;
use uuid::Uuid;

use super::ProjectStore;
use crate::error::{Error, Result};
use crate::model::{ProjectId, ProjectRecord, ProjectStatus};

const SELECT_PROJECT: &str = "SELECT id, name, base_url, workspace_path, description, status, created_at, updated_at
     FROM projects";

/// Store handle. Owns the connection pool.
pub struct PgProjectStore {
    pool: PgPool,
}

impl PgProjectStore {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for PgProjectStore {
    async fn update_status(&self, id: ProjectId, status: ProjectStatus) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE projects SET status = $1, updated_at = now()
             WHERE id = $2 AND status IS DISTINCT FROM $1",
        )
        .bind(status.to_string())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Either already in this status or missing; only missing is an error.
            let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM projects WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
            if exists.is_none() {
                return Err(Error::NotFound(format!("project {id}")));
            }
        }

        debug!(project_id = %id, %status, "status updated");
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<ProjectRecord>> {
        let rows: Vec<ProjectRow> =
            sqlx::query_as(&format!("{SELECT_PROJECT} WHERE status = $1 ORDER BY created_at ASC"))
                .bind(ProjectStatus::Pending.to_string())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(ProjectRow::try_into_record).collect()
    }

    async fn get(&self, id: ProjectId) -> Result<ProjectRecord> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!("{SELECT_PROJECT} WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or_else(|| Error::NotFound(format!("project {id}")))?
            .try_into_record()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    base_url: String,
    workspace_path: String,
    description: Option<String>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ProjectRow {
    fn try_into_record(self) -> Result<ProjectRecord> {
        Ok(ProjectRecord {
            id: ProjectId(self.id),
            name: self.name,
            base_url: self.base_url,
            workspace_path: PathBuf::from(self.workspace_path),
            description: self.description,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
