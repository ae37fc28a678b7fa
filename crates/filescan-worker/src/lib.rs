//! Filescan Worker
//!
//! The scan job queue contract with in-memory and PostgreSQL implementations,
//! the per-attempt scan state machine, and the fixed-size worker pool that drives
//! it.

pub mod memory;
pub mod pool;
pub mod postgres;
pub mod queue;
pub mod worker;

pub use memory::InMemoryJobQueue;
pub use pool::{WorkerPool, WorkerPoolConfig};
pub use postgres::PgJobQueue;
pub use queue::{JobQueue, JobQueueConfig, QueueError};
pub use worker::{ScanFailure, ScanServices, ScanWorker, Stage};
