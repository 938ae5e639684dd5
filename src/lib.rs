//! Job worker: claims jobs from a shared table, runs them, publishes results.

pub mod claim;
pub mod config;
pub mod error;
pub mod executor;
pub mod publish;
pub mod store;
pub mod worker;
