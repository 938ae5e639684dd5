//! Worker system: the per-process job loop.
//!
//! Core components:
//! - `worker`: claim, execute, publish, finalise
//! - `backoff`: optional delay after consecutive store failures

pub mod backoff;
pub mod worker;

pub use backoff::Backoff;
pub use worker::{CycleOutcome, Worker, WorkerDeps, object_name};
