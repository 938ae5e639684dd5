//! PostgreSQL backend: the shared jobs table used in production.
//!
//! One `PgConnection` per worker cycle, closed at the end of the cycle.
//! Columns are cast in the select list so `serial`/`bigserial` ids and
//! `real`/`double precision` durations decode alike.

use std::str::FromStr;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{ConnectOptions, Connection, Row};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::DatabaseError;
use crate::store::model::{JobRow, JobSnapshot, JobStatus, JobUpdate};
use crate::store::traits::{JobConnection, JobStore};

const SELECT_COLUMNS: &str = "id::bigint AS id, error::bigint AS error, \
     errordescription::text AS errordescription, command::text AS command, \
     status::text AS status, complete::bigint AS complete, task::text AS task, \
     priority::text AS priority, resulturl::text AS resulturl, \
     resultsurl::text AS resultsurl, duration::float8 AS duration, \
     outobjects::text AS outobjects";

/// PostgreSQL job store.
pub struct PgJobStore {
    options: PgConnectOptions,
}

impl PgJobStore {
    pub fn new(
        host: &str,
        port: u16,
        database: &str,
        user: &str,
        password: &SecretString,
        ssl_mode: &str,
    ) -> Result<Self, DatabaseError> {
        let ssl_mode = PgSslMode::from_str(ssl_mode)
            .map_err(|e| DatabaseError::Connection(format!("Invalid sslmode '{ssl_mode}': {e}")))?;

        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database)
            .username(user)
            .password(password.expose_secret())
            .ssl_mode(ssl_mode);

        Ok(Self { options })
    }

    /// Build from a `StoreConfig::Postgres`.
    pub fn from_config(config: &StoreConfig) -> Result<Self, DatabaseError> {
        match config {
            StoreConfig::Postgres {
                host,
                port,
                database,
                user,
                password,
                ssl_mode,
            } => Self::new(host, *port, database, user, password, ssl_mode),
            StoreConfig::LibSql { .. } => Err(DatabaseError::Connection(
                "store config does not describe a PostgreSQL database".into(),
            )),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn connect(&self) -> Result<Box<dyn JobConnection>, DatabaseError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        Ok(Box::new(PgJobConnection { conn }))
    }
}

/// One PostgreSQL connection, scoped to a worker cycle.
pub struct PgJobConnection {
    conn: PgConnection,
}

fn row_to_job(row: &PgRow) -> Result<JobRow, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    Ok(JobRow {
        id: id as u64,
        error: row.try_get("error")?,
        errordescription: row.try_get("errordescription")?,
        command: row.try_get("command")?,
        status: row.try_get("status")?,
        complete: row.try_get("complete")?,
        task: row.try_get("task")?,
        priority: row.try_get("priority")?,
        resulturl: row.try_get("resulturl")?,
        resultsurl: row.try_get("resultsurl")?,
        duration: row.try_get("duration")?,
        outobjects: row.try_get("outobjects")?,
    })
}

#[async_trait]
impl JobConnection for PgJobConnection {
    async fn ping(&mut self) -> Result<(), DatabaseError> {
        self.conn
            .ping()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }

    async fn select_min_wait_job(&mut self) -> Result<Option<JobSnapshot>, DatabaseError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE id = (SELECT MIN(id) FROM jobs WHERE status = $1)"
        );
        let row = sqlx::query(&sql)
            .bind(JobStatus::Wait.as_str())
            .fetch_optional(&mut self.conn)
            .await?;

        row.map(|r| row_to_job(&r).map(JobRow::into_snapshot))
            .transpose()
            .map_err(DatabaseError::from)
    }

    async fn claim(&mut self, id: u64) -> Result<u64, DatabaseError> {
        let count = sqlx::query("UPDATE jobs SET status = $1 WHERE id = $2 AND status = $3")
            .bind(JobStatus::InProgress.as_str())
            .bind(id as i64)
            .bind(JobStatus::Wait.as_str())
            .execute(&mut self.conn)
            .await?
            .rows_affected();

        debug!(job_id = id, rows = count, "Claim update applied");
        Ok(count)
    }

    async fn write_status(&mut self, id: u64, update: &JobUpdate) -> Result<(), DatabaseError> {
        update.ensure_legal()?;

        let count = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1,
                complete = $2,
                duration = $3,
                resulturl = $4,
                resultsurl = $5,
                outobjects = $6,
                error = $7,
                errordescription = $8
            WHERE id = $9
              AND status = $10
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.complete)
        .bind(update.duration)
        .bind(update.resulturl.as_deref())
        .bind(update.resultsurl.as_deref())
        .bind(update.outobjects.as_deref())
        .bind(update.error)
        .bind(update.errordescription.as_deref())
        .bind(id as i64)
        .bind(JobStatus::InProgress.as_str())
        .execute(&mut self.conn)
        .await?
        .rows_affected();

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "in-progress job".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch(&mut self, id: u64) -> Result<Option<JobSnapshot>, DatabaseError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id as i64)
            .fetch_optional(&mut self.conn)
            .await?;

        row.map(|r| row_to_job(&r).map(JobRow::into_snapshot))
            .transpose()
            .map_err(DatabaseError::from)
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_sslmode() {
        let err = PgJobStore::new(
            "postgresql",
            5432,
            "jobs",
            "worker",
            &SecretString::from("pw"),
            "sometimes",
        )
        .err()
        .unwrap();
        assert!(matches!(err, DatabaseError::Connection(_)));
    }

    #[test]
    fn accepts_disable_sslmode() {
        let store = PgJobStore::new(
            "postgresql",
            5432,
            "jobs",
            "worker",
            &SecretString::from("pw"),
            "disable",
        );
        assert!(store.is_ok());
    }

    #[test]
    fn from_config_rejects_libsql() {
        let cfg = StoreConfig::LibSql {
            path: "jobs.db".into(),
        };
        assert!(PgJobStore::from_config(&cfg).is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a running PostgreSQL with a jobs table
    async fn ping_live_database() {
        let store = PgJobStore::from_config(&StoreConfig::from_env().unwrap()).unwrap();
        store.ping().await.unwrap();
    }
}
