//! Job store: the shared jobs table behind per-cycle connections.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod postgres_backend;
pub mod traits;

pub use libsql_backend::LibSqlJobStore;
pub use model::{JobRow, JobSnapshot, JobStatus, JobUpdate, NewJob};
pub use postgres_backend::PgJobStore;
pub use traits::{JobConnection, JobStore};
