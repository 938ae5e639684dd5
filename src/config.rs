//! Configuration types, loaded from environment variables.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Default retrieval link lifetime: 24 hours.
pub const DEFAULT_LINK_TTL_SECS: u64 = 24 * 60 * 60;

/// Default upper bound of the pre-claim jitter, in seconds.
pub const DEFAULT_JITTER_MAX_SECS: u64 = 5;

/// Where the jobs table lives.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// Shared PostgreSQL database.
    Postgres {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: SecretString,
        /// libpq `sslmode`; `disable` unless overridden.
        ssl_mode: String,
    },
    /// Local libSQL database file.
    LibSql { path: PathBuf },
}

impl StoreConfig {
    /// Read the store location from the environment.
    ///
    /// `JOB_STORE_PATH` selects a local libSQL file; otherwise the PostgreSQL
    /// variables are used.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("JOB_STORE_PATH") {
            return Ok(Self::LibSql {
                path: PathBuf::from(path),
            });
        }

        Ok(Self::Postgres {
            host: std::env::var("POSTGRES_HOST").unwrap_or_else(|_| "postgresql".to_string()),
            port: env_parse("POSTGRES_PORT", 5432)?,
            database: std::env::var("POSTGRES_DB").unwrap_or_default(),
            user: std::env::var("POSTGRES_USER").unwrap_or_default(),
            password: SecretString::from(std::env::var("POSTGRES_PASSWORD").unwrap_or_default()),
            ssl_mode: std::env::var("POSTGRES_SSLMODE").unwrap_or_else(|_| "disable".to_string()),
        })
    }

    /// Short human-readable description, without secrets.
    pub fn describe(&self) -> String {
        match self {
            Self::Postgres {
                host,
                port,
                database,
                user,
                ssl_mode,
                ..
            } => format!("postgres://{user}@{host}:{port}/{database} (sslmode={ssl_mode})"),
            Self::LibSql { path } => format!("libsql:{}", path.display()),
        }
    }
}

/// Object-storage endpoint and credentials.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub host: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: SecretString,
    /// TLS transport; off by default.
    pub use_ssl: bool,
    /// Signing region.
    pub region: String,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: std::env::var("S3_HOST").unwrap_or_default(),
            port: env_parse("S3_PORT", 9000)?,
            access_key: std::env::var("MINIO_ACCESS_KEY").unwrap_or_default(),
            secret_key: SecretString::from(std::env::var("MINIO_SECRET_KEY").unwrap_or_default()),
            use_ssl: parse_bool("S3_USE_SSL", std::env::var("S3_USE_SSL").ok(), false)?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }

    /// Base URL of the endpoint, e.g. `http://minio:9000`.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }

    /// Check that the endpoint and credentials are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("S3_HOST".into()));
        }
        if self.access_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("MINIO_ACCESS_KEY".into()));
        }
        if self.secret_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingEnvVar("MINIO_SECRET_KEY".into()));
        }
        Ok(())
    }
}

/// Where and how results are published.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub bucket: String,
    pub location: String,
    pub link_ttl: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            bucket: "results".to_string(),
            location: "us-east-1".to_string(),
            link_ttl: Duration::from_secs(DEFAULT_LINK_TTL_SECS),
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bucket: std::env::var("JOB_BUCKET").unwrap_or(defaults.bucket),
            location: std::env::var("JOB_BUCKET_LOCATION").unwrap_or(defaults.location),
            link_ttl: env_secs("RESULT_LINK_TTL_SECS", defaults.link_ttl)?,
        })
    }
}

/// Settings for the shell task executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Parent directory of the per-job output directories.
    pub work_dir: PathBuf,
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("job-worker"),
            timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl ExecutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            timeout: env_secs("WORKER_TASK_TIMEOUT_SECS", defaults.timeout)?,
        })
    }
}

/// Worker loop settings.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Upper bound of the pre-claim jitter.
    pub jitter_max: Duration,
    /// Cap of the optional exponential backoff after store failures.
    /// Zero disables backoff.
    pub max_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            jitter_max: Duration::from_secs(DEFAULT_JITTER_MAX_SECS),
            max_backoff: Duration::ZERO,
        }
    }
}

impl LoopConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            jitter_max: env_secs("WORKER_JITTER_MAX_SECS", defaults.jitter_max)?,
            max_backoff: env_secs("WORKER_MAX_BACKOFF_SECS", defaults.max_backoff)?,
        })
    }
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub store: StoreConfig,
    pub storage: StorageConfig,
    pub publish: PublishConfig,
    pub executor: ExecutorConfig,
    pub run: LoopConfig,
}

impl WorkerConfig {
    /// Read every section. A variable that is set but unparsable is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            store: StoreConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            publish: PublishConfig::from_env()?,
            executor: ExecutorConfig::from_env()?,
            run: LoopConfig::from_env()?,
        })
    }
}

/// Parse an optional raw value; absent means `default`.
fn parse_value<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(s) if matches!(s.as_str(), "1" | "true" | "yes") => Ok(true),
        Some(s) if matches!(s.as_str(), "0" | "false" | "no" | "") => Ok(false),
        Some(s) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{s}' is not a boolean"),
        }),
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(key, std::env::var(key).ok(), default)
}

/// Whole seconds from the environment.
fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}
