//! Error types for the job worker.

use std::time::Duration;

/// Startup errors surfaced from `main`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                Self::Connection(e.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

/// Object-storage transport errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{operation} returned HTTP {status}: {message}")]
    Status {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Link expiry {0:?} is outside 1s..=7 days")]
    InvalidExpiry(Duration),
}

/// Artifact publication errors.
///
/// The numeric codes are recorded in the `error` column of the jobs table and
/// must stay stable across worker versions.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("{0}")]
    ClientConstruction(String),

    #[error("{0}")]
    BucketProvisioning(String),

    #[error("{0}")]
    Upload(String),

    #[error("{0}")]
    LinkGeneration(String),
}

impl PublishError {
    /// Stable error code written back to the job row.
    pub fn code(&self) -> i64 {
        match self {
            Self::ClientConstruction(_) => 1,
            Self::BucketProvisioning(_) => 2,
            Self::Upload(_) => 3,
            Self::LinkGeneration(_) => 4,
        }
    }
}

/// Task execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Job has neither a command nor a task to run")]
    EmptyCommand,

    #[error("Failed to prepare output directory: {0}")]
    Workdir(#[source] std::io::Error),

    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Command exited with status {code}: {output}")]
    NonZeroExit { code: i32, output: String },

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to collect artifacts: {0}")]
    Collect(#[source] std::io::Error),
}

impl ExecError {
    /// Error code written back to the job row for execution failures.
    ///
    /// Follows the publisher codes (1-4).
    pub const CODE: i64 = 5;
}

/// Result type alias for startup.
pub type Result<T> = std::result::Result<T, Error>;
