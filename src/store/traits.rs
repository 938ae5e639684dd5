//! Job store capability traits.
//!
//! A `JobStore` hands out one `JobConnection` per worker cycle. Connections
//! are never pooled across cycles, so a restarted store is picked up again on
//! the next cycle without any reconnect logic.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::store::model::{JobSnapshot, JobUpdate};

/// Factory for per-cycle store connections.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Open a fresh connection.
    async fn connect(&self) -> Result<Box<dyn JobConnection>, DatabaseError>;

    /// Startup connectivity check: open, ping, close.
    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut conn = self.connect().await?;
        conn.ping().await?;
        conn.close().await
    }
}

/// One open connection to the jobs table.
///
/// Dropping a connection releases it; `close` does so explicitly and reports
/// errors.
#[async_trait]
pub trait JobConnection: Send {
    /// Round-trip to the store.
    async fn ping(&mut self) -> Result<(), DatabaseError>;

    /// Read the `wait` job with the lowest id.
    ///
    /// Single statement: `id = (SELECT MIN(id) FROM jobs WHERE status = 'wait')`.
    /// Does not claim the row.
    async fn select_min_wait_job(&mut self) -> Result<Option<JobSnapshot>, DatabaseError>;

    /// Move `id` from `wait` to `in-progress` only if it is still `wait`.
    ///
    /// Returns the number of rows affected: 1 when this connection won the
    /// claim, 0 when another worker got there first.
    async fn claim(&mut self, id: u64) -> Result<u64, DatabaseError>;

    /// Write the terminal status and results of a job this worker owns.
    async fn write_status(&mut self, id: u64, update: &JobUpdate) -> Result<(), DatabaseError>;

    /// Read a job by id.
    async fn fetch(&mut self, id: u64) -> Result<Option<JobSnapshot>, DatabaseError>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}
