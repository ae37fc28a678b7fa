//! Scan worker
//!
//! One attempt walks `Acquired → Reading → Inspecting → Classifying → Persisting`
//! and ends `Completed` (acked) or `Failed` (reported through `fail`). A single
//! job's failure never stops the worker loop.

use chrono::Utc;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use filescan_core::models::{JobType, Lease, MarkOutcome, RetryDecision, ScanJob, ScanResult};
use filescan_core::notify::{InfectionAlert, Notifier};
use filescan_db::{MetadataStore, StoreError};
use filescan_services::{InspectionError, Inspector};
use filescan_storage::{Storage, StorageError};

use crate::queue::{JobQueue, QueueError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquired,
    Reading,
    Inspecting,
    Classifying,
    Persisting,
    Completed,
    Failed,
}

impl Stage {
    /// Progress reported for the stage, if any. Persisting reports on entry,
    /// every other stage once it has finished.
    pub fn progress(&self) -> Option<i32> {
        match self {
            Stage::Acquired => Some(10),
            Stage::Reading => Some(30),
            Stage::Inspecting => Some(60),
            Stage::Persisting => Some(80),
            Stage::Completed => Some(100),
            Stage::Classifying | Stage::Failed => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Stage::Acquired => "acquired",
            Stage::Reading => "reading",
            Stage::Inspecting => "inspecting",
            Stage::Classifying => "classifying",
            Stage::Persisting => "persisting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Why an attempt failed. Every variant is retried until attempts run out.
#[derive(Debug, thiserror::Error)]
pub enum ScanFailure {
    #[error("failed to read '{path}': {source}")]
    ReadFailure {
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("inspection failed: {0}")]
    InspectionFailure(#[from] InspectionError),

    #[error("failed to persist scan result: {0}")]
    PersistFailure(#[from] StoreError),

    #[error("attempt exceeded lease duration of {0:?}")]
    Timeout(Duration),
}

impl ScanFailure {
    pub fn stage(&self) -> Stage {
        match self {
            ScanFailure::ReadFailure { .. } => Stage::Reading,
            ScanFailure::InspectionFailure(_) => Stage::Inspecting,
            ScanFailure::PersistFailure(_) => Stage::Persisting,
            ScanFailure::Timeout(_) => Stage::Failed,
        }
    }
}

/// Collaborators shared by every worker in a pool.
#[derive(Clone)]
pub struct ScanServices {
    pub queue: Arc<dyn JobQueue>,
    pub store: Arc<dyn MetadataStore>,
    pub storage: Arc<dyn Storage>,
    pub inspector: Arc<dyn Inspector>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

pub struct ScanWorker {
    id: usize,
    services: ScanServices,
    lease_duration: Duration,
    error_backoff: Duration,
}

impl ScanWorker {
    pub fn new(
        id: usize,
        services: ScanServices,
        lease_duration: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            id,
            services,
            lease_duration,
            error_backoff,
        }
    }

    /// Acquire and process jobs until `shutdown` flips to true. An attempt in
    /// flight when shutdown is requested runs to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = self.id, "Scan worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let acquired = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                acquired = self.services.queue.acquire(JobType::Scan) => acquired,
            };

            let result = match acquired {
                Ok((job, lease)) => self.process(job, lease).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                tracing::error!(
                    worker = self.id,
                    error = %e,
                    backoff_ms = self.error_backoff.as_millis() as u64,
                    "Job queue error, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.error_backoff) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }

        tracing::info!(worker = self.id, "Scan worker stopped");
    }

    /// Run one attempt and settle it with the queue. Only queue failures are
    /// returned; everything else is reported through `fail`.
    #[tracing::instrument(
        skip(self, job, lease),
        fields(
            worker = self.id,
            job.id = %job.id,
            file.id = %job.file_reference,
            attempt = lease.attempt,
        )
    )]
    pub async fn process(&self, job: ScanJob, lease: Lease) -> Result<(), QueueError> {
        tracing::debug!(stage = %Stage::Acquired, "Scan attempt started");
        self.report(&lease, Stage::Acquired).await;

        let attempt = tokio::time::timeout(self.lease_duration, self.scan(&job, &lease)).await;
        let outcome = match attempt {
            Ok(outcome) => outcome,
            Err(_) => Err(ScanFailure::Timeout(self.lease_duration)),
        };

        match outcome {
            Ok(outcome) => self.complete(&lease, outcome).await,
            Err(failure) => self.fail(&job, &lease, failure).await,
        }
    }

    async fn scan(&self, job: &ScanJob, lease: &Lease) -> Result<MarkOutcome, ScanFailure> {
        tracing::debug!(stage = %Stage::Reading, path = %job.storage_path, "Reading file");
        let bytes = self
            .services
            .storage
            .read(&job.storage_path)
            .await
            .map_err(|source| ScanFailure::ReadFailure {
                path: job.storage_path.clone(),
                source,
            })?;
        self.report(lease, Stage::Reading).await;

        tracing::debug!(
            stage = %Stage::Inspecting,
            inspector = self.services.inspector.name(),
            size = bytes.len(),
            "Inspecting file"
        );
        let classification = self.services.inspector.inspect(&bytes).await?;
        self.report(lease, Stage::Inspecting).await;

        let result = ScanResult::from(classification);
        tracing::debug!(stage = %Stage::Classifying, result = %result, "File classified");

        self.report(lease, Stage::Persisting).await;
        let outcome = self
            .services
            .store
            .mark_scanned(job.file_reference, result, Utc::now())
            .await?;
        tracing::debug!(
            stage = %Stage::Persisting,
            updated = outcome.was_updated(),
            "Scan result persisted"
        );

        Ok(outcome)
    }

    async fn complete(&self, lease: &Lease, outcome: MarkOutcome) -> Result<(), QueueError> {
        if let MarkOutcome::Updated(record) = &outcome {
            if record.result == Some(ScanResult::Infected) {
                self.notify(record).await;
            }
        }

        self.report(lease, Stage::Completed).await;
        let record = outcome.record();
        match self.services.queue.ack(lease).await {
            Ok(()) => {
                tracing::info!(
                    stage = %Stage::Completed,
                    result = ?record.result,
                    "Scan job completed"
                );
                Ok(())
            }
            Err(QueueError::LeaseLost(_)) => {
                tracing::warn!(
                    "Lease lost before ack; the redelivered attempt will settle the job"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn notify(&self, record: &filescan_core::models::FileMetadata) {
        let Some(notifier) = &self.services.notifier else {
            return;
        };
        let alert = InfectionAlert {
            file_id: record.id,
            filename: record.filename.clone(),
            path: record.path.clone(),
            scanned_at: record.scanned_at.unwrap_or_else(Utc::now),
        };
        if let Err(e) = notifier.notify_infected(&alert).await {
            tracing::warn!(error = %e, "Infection notification failed");
        }
    }

    async fn fail(
        &self,
        job: &ScanJob,
        lease: &Lease,
        failure: ScanFailure,
    ) -> Result<(), QueueError> {
        tracing::warn!(
            stage = %failure.stage(),
            error = %failure,
            "Scan attempt failed"
        );

        match self.services.queue.fail(lease, &failure.to_string()).await {
            Ok(RetryDecision::WillRetry {
                delay,
                next_attempt,
            }) => {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    next_attempt,
                    "Scan job scheduled for retry"
                );
                Ok(())
            }
            Ok(RetryDecision::Exhausted) => {
                tracing::error!(
                    stage = %Stage::Failed,
                    max_attempts = job.max_attempts,
                    error = %failure,
                    "Scan job exhausted; file stays pending"
                );
                Ok(())
            }
            Err(QueueError::LeaseLost(_)) => {
                tracing::warn!("Lease lost before fail; the job was already redelivered");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn report(&self, lease: &Lease, stage: Stage) {
        let Some(percent) = stage.progress() else {
            return;
        };
        if let Err(e) = self.services.queue.progress(lease, percent).await {
            tracing::debug!(error = %e, stage = %stage, "Progress update ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_progress_is_increasing() {
        let reported: Vec<i32> = [
            Stage::Acquired,
            Stage::Reading,
            Stage::Inspecting,
            Stage::Classifying,
            Stage::Persisting,
            Stage::Completed,
        ]
        .iter()
        .filter_map(Stage::progress)
        .collect();
        assert_eq!(reported, vec![10, 30, 60, 80, 100]);
    }

    #[test]
    fn test_failure_stage() {
        let failure = ScanFailure::ReadFailure {
            path: "1-a.pdf".to_string(),
            source: StorageError::NotFound("1-a.pdf".to_string()),
        };
        assert_eq!(failure.stage(), Stage::Reading);
        assert!(failure.to_string().contains("1-a.pdf"));
        assert_eq!(
            ScanFailure::InspectionFailure(InspectionError::Timeout(5)).stage(),
            Stage::Inspecting
        );
    }
}
