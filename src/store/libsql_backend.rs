//! libSQL backend: jobs table in a local database file.
//!
//! Every `connect()` opens a new connection to the same file, so several
//! workers (tasks or processes) compete through SQLite's own locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{JOB_COLUMNS, JobRow, JobSnapshot, JobStatus, JobUpdate, NewJob};
use crate::store::traits::{JobConnection, JobStore};

/// How long a connection waits on a locked database file, in milliseconds.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// libSQL job store.
pub struct LibSqlJobStore {
    db: Arc<LibSqlDatabase>,
    path: PathBuf,
}

impl LibSqlJobStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to open libSQL database: {e}"))
            })?;

        let store = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };

        let conn = store.open_connection().await?;
        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Job store opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a job the way a producer would. Returns the new id.
    pub async fn insert_job(&self, job: &NewJob) -> Result<u64, DatabaseError> {
        let conn = self.open_connection().await?;
        conn.execute(
            "INSERT INTO jobs (status, command, task, priority) VALUES (?1, ?2, ?3, ?4)",
            params![
                opt_text(job.status.as_deref()),
                opt_text(job.command.as_deref()),
                opt_text(job.task.as_deref()),
                opt_text(job.priority.as_deref()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        Ok(conn.last_insert_rowid() as u64)
    }

    async fn open_connection(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        // PRAGMA busy_timeout answers with a row; drain it.
        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to set busy timeout: {e}")))?;
        while rows
            .next()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to set busy timeout: {e}")))?
            .is_some()
        {}

        Ok(conn)
    }
}

#[async_trait]
impl JobStore for LibSqlJobStore {
    async fn connect(&self) -> Result<Box<dyn JobConnection>, DatabaseError> {
        let conn = self.open_connection().await?;
        Ok(Box::new(LibSqlJobConnection { conn }))
    }
}

/// One libSQL connection, scoped to a worker cycle.
pub struct LibSqlJobConnection {
    conn: Connection,
}

// ── Helper functions ────────────────────────────────────────────────

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<i64>` to libsql Value.
fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to a JobRow. Column order matches `JOB_COLUMNS`.
///
/// NULL columns fail `get` and become `None`.
fn row_to_job(row: &libsql::Row) -> Result<JobRow, libsql::Error> {
    let id: i64 = row.get(0)?;
    Ok(JobRow {
        id: id as u64,
        error: row.get(1).ok(),
        errordescription: row.get(2).ok(),
        command: row.get(3).ok(),
        status: row.get(4).ok(),
        complete: row.get(5).ok(),
        task: row.get(6).ok(),
        priority: row.get(7).ok(),
        resulturl: row.get(8).ok(),
        resultsurl: row.get(9).ok(),
        duration: row.get(10).ok(),
        outobjects: row.get(11).ok(),
    })
}

impl LibSqlJobConnection {
    async fn query_one(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Option<JobSnapshot>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let job = row_to_job(&row)
                    .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
                Ok(Some(job.into_snapshot()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

#[async_trait]
impl JobConnection for LibSqlJobConnection {
    async fn ping(&mut self) -> Result<(), DatabaseError> {
        let mut rows = self
            .conn
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Connection(format!("ping: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Connection(format!("ping: {e}")))?;
        Ok(())
    }

    async fn select_min_wait_job(&mut self) -> Result<Option<JobSnapshot>, DatabaseError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = (SELECT MIN(id) FROM jobs WHERE status = ?1)"
        );
        self.query_one(&sql, params![JobStatus::Wait.as_str()], "select_min_wait_job")
            .await
    }

    async fn claim(&mut self, id: u64) -> Result<u64, DatabaseError> {
        let count = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1 WHERE id = ?2 AND status = ?3",
                params![
                    JobStatus::InProgress.as_str(),
                    id as i64,
                    JobStatus::Wait.as_str()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim: {e}")))?;

        debug!(job_id = id, rows = count, "Claim update applied");
        Ok(count)
    }

    async fn write_status(&mut self, id: u64, update: &JobUpdate) -> Result<(), DatabaseError> {
        update.ensure_legal()?;

        let count = self
            .conn
            .execute(
                "UPDATE jobs SET status = ?1, complete = ?2, duration = ?3, resulturl = ?4, \
                 resultsurl = ?5, outobjects = ?6, error = ?7, errordescription = ?8 \
                 WHERE id = ?9 AND status = ?10",
                params![
                    update.status.as_str(),
                    update.complete,
                    update.duration,
                    opt_text(update.resulturl.as_deref()),
                    opt_text(update.resultsurl.as_deref()),
                    opt_text(update.outobjects.as_deref()),
                    opt_int(update.error),
                    opt_text(update.errordescription.as_deref()),
                    id as i64,
                    JobStatus::InProgress.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_status: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "in-progress job".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&mut self, id: u64) -> Result<Option<JobSnapshot>, DatabaseError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        self.query_one(&sql, params![id as i64], "fetch").await
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        // libsql connections close on drop.
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, LibSqlJobStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = LibSqlJobStore::open(&tmp.path().join("jobs.db")).await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("dir").join("jobs.db");
        let store = LibSqlJobStore::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let (_tmp, store) = test_store().await;
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn min_wait_job_skips_other_statuses() {
        let (_tmp, store) = test_store().await;
        let done = store.insert_job(&NewJob::with_status("done")).await.unwrap();
        let first_wait = store.insert_job(&NewJob::waiting("echo a")).await.unwrap();
        let _second_wait = store.insert_job(&NewJob::waiting("echo b")).await.unwrap();
        assert!(done < first_wait);

        let mut conn = store.connect().await.unwrap();
        let job = conn.select_min_wait_job().await.unwrap().unwrap();
        assert_eq!(job.id, first_wait);
        assert_eq!(job.command, "echo a");
        assert_eq!(job.status, "wait");
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn empty_table_yields_no_row() {
        let (_tmp, store) = test_store().await;
        store.insert_job(&NewJob::with_status("done")).await.unwrap();

        let mut conn = store.connect().await.unwrap();
        assert!(conn.select_min_wait_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_columns_project_to_defaults() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::with_status("wait")).await.unwrap();

        let mut conn = store.connect().await.unwrap();
        let job = conn.select_min_wait_job().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.error, 0);
        assert_eq!(job.complete, 0);
        assert_eq!(job.duration, 0.0);
        assert_eq!(job.command, "");
        assert_eq!(job.task, "");
        assert_eq!(job.priority, "");
        assert_eq!(job.resulturl, "");
        assert_eq!(job.outobjects, "");
    }

    #[tokio::test]
    async fn claim_is_conditional() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::waiting("true")).await.unwrap();

        let mut first = store.connect().await.unwrap();
        let mut second = store.connect().await.unwrap();

        assert_eq!(first.claim(id).await.unwrap(), 1);
        assert_eq!(second.claim(id).await.unwrap(), 0);

        let job = second.fetch(id).await.unwrap().unwrap();
        assert_eq!(job.state(), Some(JobStatus::InProgress));
    }

    #[tokio::test]
    async fn write_status_requires_ownership() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::waiting("true")).await.unwrap();
        let mut conn = store.connect().await.unwrap();

        let update = JobUpdate::failed(0.1, 5, "boom");
        let err = conn.write_status(id, &update).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        conn.claim(id).await.unwrap();
        conn.write_status(id, &update).await.unwrap();

        let job = conn.fetch(id).await.unwrap().unwrap();
        assert_eq!(job.status, "error");
        assert_eq!(job.error, 5);
        assert_eq!(job.errordescription, "boom");
        assert!((job.duration - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn write_status_rejects_rewind_to_wait() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::waiting("true")).await.unwrap();
        let mut conn = store.connect().await.unwrap();
        conn.claim(id).await.unwrap();

        let mut update = JobUpdate::failed(0.1, 5, "boom");
        update.status = JobStatus::Wait;
        let err = conn.write_status(id, &update).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));

        let job = conn.fetch(id).await.unwrap().unwrap();
        assert_eq!(job.state(), Some(JobStatus::InProgress));
    }

    #[tokio::test]
    async fn connections_carry_busy_timeout() {
        let (_tmp, store) = test_store().await;
        let conn = store.open_connection().await.unwrap();

        let mut rows = conn.query("PRAGMA busy_timeout", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let timeout: i64 = row.get(0).unwrap();
        assert_eq!(timeout, BUSY_TIMEOUT_MS as i64);
    }

    #[tokio::test]
    async fn done_update_persists_results() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_job(&NewJob::waiting("true")).await.unwrap();
        let mut conn = store.connect().await.unwrap();
        conn.claim(id).await.unwrap();

        let links = vec!["http://minio:9000/results/1-out.txt?sig".to_string()];
        let objects = vec!["1-out.txt".to_string()];
        conn.write_status(id, &JobUpdate::done(2.0, &links, &objects))
            .await
            .unwrap();

        let job = conn.fetch(id).await.unwrap().unwrap();
        assert_eq!(job.status, "done");
        assert_eq!(job.complete, 1);
        assert_eq!(job.resulturl, links[0]);
        assert_eq!(job.outobjects, r#"["1-out.txt"]"#);
        assert_eq!(job.error, 0);
    }

    #[tokio::test]
    async fn fetch_missing_returns_none() {
        let (_tmp, store) = test_store().await;
        let mut conn = store.connect().await.unwrap();
        assert!(conn.fetch(42).await.unwrap().is_none());
    }
}
