//! Job queue contract
//!
//! Delivery is at-least-once. A worker holds a [`Lease`] while it processes a job;
//! the lease is the only exclusivity mechanism and every settle call (`ack`,
//! `fail`, `progress`) is checked against it.

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use filescan_core::models::{
    JobPayload, JobType, Lease, PayloadError, RetryDecision, ScanJob, ScanJobPayload, SubmitOptions,
};
use filescan_core::Config;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The durability layer could not be reached.
    #[error("job queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("invalid job payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    /// The lease expired and the job was redelivered, or the lease already
    /// settled the job in a different way.
    #[error("lease on job {0} is no longer current")]
    LeaseLost(Uuid),

    #[error("job not found: {0}")]
    NotFound(Uuid),
}

impl QueueError {
    pub(crate) fn unavailable(error: anyhow::Error) -> Self {
        QueueError::QueueUnavailable(format!("{:#}", error))
    }
}

#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// How long an acquired job stays exclusively leased.
    pub lease_duration: Duration,
    /// Upper bound on how long an idle `acquire` waits before re-checking the
    /// backing store. Only the PostgreSQL queue polls.
    pub poll_interval: Duration,
    pub retain_completed: usize,
    pub retain_failed: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            retain_completed: 100,
            retain_failed: 100,
        }
    }
}

impl From<&Config> for JobQueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            lease_duration: config.scan_lease_duration(),
            poll_interval: config.scan_poll_interval(),
            retain_completed: config.job_retain_completed,
            retain_failed: config.job_retain_failed,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Never waits for a worker.
    async fn submit(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<Uuid, QueueError>;

    /// Wait until a job of `job_type` can be leased, then lease it. Dropping the
    /// returned future before it resolves never loses a job.
    async fn acquire(&self, job_type: JobType) -> Result<(ScanJob, Lease), QueueError>;

    /// Complete the job. Repeating the call with the same lease is a no-op.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Record a failed attempt and decide whether it will be retried. A lease
    /// that already failed the job gets the recorded decision back.
    async fn fail(&self, lease: &Lease, error: &str) -> Result<RetryDecision, QueueError>;

    /// Best-effort progress report; never lowers the stored value.
    async fn progress(&self, lease: &Lease, percent: i32) -> Result<(), QueueError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>, QueueError>;

    async fn submit_scan(
        &self,
        payload: &ScanJobPayload,
        options: SubmitOptions,
    ) -> Result<Uuid, QueueError> {
        let value = serde_json::to_value(payload)
            .map_err(|e| QueueError::InvalidPayload(PayloadError::Malformed(e.to_string())))?;
        self.submit(ScanJobPayload::job_type(), value, options).await
    }
}

/// Validate a raw submission and build the job record for it.
pub fn build_job(
    job_type: JobType,
    payload: &serde_json::Value,
    options: SubmitOptions,
) -> Result<ScanJob, QueueError> {
    match job_type {
        JobType::Scan => {
            let payload = ScanJobPayload::from_value(payload)?;
            Ok(ScanJob::new(&payload, options)?)
        }
    }
}
