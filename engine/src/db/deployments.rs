/// Deployment persistence operations
///
/// Rows mirror `DeploymentRecord` plus the PID of the owning launchpad process.
/// Timestamps are stored as unix milliseconds.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sdk::{DeploymentRecord, DeploymentStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;

const COLUMNS: &str = "id, bundle_id, bundle_root, backend_port, frontend_port, backend_pid, \
                       frontend_pid, owner_pid, status, backend_url, frontend_url, created_at, stopped_at";

/// A persisted deployment and the process that owns its child handles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDeployment {
    pub record: DeploymentRecord,
    pub owner_pid: Option<u32>,
}

/// Deployment repository for database operations
#[derive(Clone)]
pub struct DeploymentRepository {
    pool: SqlitePool,
}

impl DeploymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a deployment row
    pub async fn upsert(&self, record: &DeploymentRecord, owner_pid: Option<u32>) -> Result<()> {
        sqlx::query(
            "INSERT INTO deployments (id, bundle_id, bundle_root, backend_port, frontend_port, \
             backend_pid, frontend_pid, owner_pid, status, backend_url, frontend_url, created_at, stopped_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             backend_pid = excluded.backend_pid, frontend_pid = excluded.frontend_pid, \
             owner_pid = excluded.owner_pid, status = excluded.status, stopped_at = excluded.stopped_at",
        )
        .bind(&record.id)
        .bind(&record.bundle_id)
        .bind(record.bundle_root.to_string_lossy().to_string())
        .bind(record.backend_port as i64)
        .bind(record.frontend_port as i64)
        .bind(record.backend_pid.map(i64::from))
        .bind(record.frontend_pid.map(i64::from))
        .bind(owner_pid.map(i64::from))
        .bind(record.status.as_str())
        .bind(&record.backend_url)
        .bind(&record.frontend_url)
        .bind(record.created_at.timestamp_millis())
        .bind(record.stopped_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .context("Failed to upsert deployment")?;

        Ok(())
    }

    /// Mark a deployment stopped
    ///
    /// Returns true only for the caller that performed the transition.
    pub async fn mark_stopped(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE deployments SET status = 'stopped', stopped_at = ?, owner_pid = NULL \
             WHERE id = ? AND status != 'stopped'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to mark deployment stopped")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_failed(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET status = 'failed', owner_pid = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to mark deployment failed")?;

        Ok(())
    }

    /// Hand a deployment over to no process
    pub async fn clear_owner(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET owner_pid = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to clear deployment owner")?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<StoredDeployment>> {
        let query = format!("SELECT {} FROM deployments WHERE id = ?", COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch deployment")?;

        row.as_ref().map(from_row).transpose()
    }

    /// All deployments, newest first
    pub async fn list(&self) -> Result<Vec<StoredDeployment>> {
        let query = format!("SELECT {} FROM deployments ORDER BY created_at DESC", COLUMNS);
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list deployments")?;

        rows.iter().map(from_row).collect()
    }

    /// Deployments whose services may still be running
    pub async fn list_active(&self) -> Result<Vec<StoredDeployment>> {
        let query = format!(
            "SELECT {} FROM deployments WHERE status IN ('starting', 'running') ORDER BY created_at",
            COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active deployments")?;

        rows.iter().map(from_row).collect()
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).context("Invalid timestamp in deployments table")
}

fn optional_u32(row: &SqliteRow, column: &str) -> Result<Option<u32>> {
    row.try_get::<Option<i64>, _>(column)?
        .map(u32::try_from)
        .transpose()
        .with_context(|| format!("Invalid {} in deployments table", column))
}

fn port(row: &SqliteRow, column: &str) -> Result<u16> {
    u16::try_from(row.try_get::<i64, _>(column)?)
        .with_context(|| format!("Invalid {} in deployments table", column))
}

fn from_row(row: &SqliteRow) -> Result<StoredDeployment> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<DeploymentStatus>()
        .map_err(anyhow::Error::msg)?;

    let record = DeploymentRecord {
        id: row.try_get("id")?,
        bundle_id: row.try_get("bundle_id")?,
        bundle_root: PathBuf::from(row.try_get::<String, _>("bundle_root")?),
        backend_port: port(row, "backend_port")?,
        frontend_port: port(row, "frontend_port")?,
        backend_pid: optional_u32(row, "backend_pid")?,
        frontend_pid: optional_u32(row, "frontend_pid")?,
        status,
        backend_url: row.try_get("backend_url")?,
        frontend_url: row.try_get("frontend_url")?,
        created_at: timestamp(row.try_get("created_at")?)?,
        stopped_at: row
            .try_get::<Option<i64>, _>("stopped_at")?
            .map(timestamp)
            .transpose()?,
    };

    Ok(StoredDeployment {
        record,
        owner_pid: optional_u32(row, "owner_pid")?,
    })
}
