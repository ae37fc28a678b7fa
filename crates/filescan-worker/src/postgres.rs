//! Durable job queue on PostgreSQL
//!
//! Rows are claimed with `FOR UPDATE SKIP LOCKED`. Idle consumers wake on a
//! `LISTEN/NOTIFY` signal from `submit`, on a timer for the earliest delayed job
//! or lease expiry, and at least every poll interval in case a notification was
//! missed.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use filescan_core::models::{JobState, JobType, Lease, RetryDecision, ScanJob, SubmitOptions};
use filescan_db::db::scan_job::NEW_JOB_CHANNEL;
use filescan_db::{AckResult, ScanJobRepository};

use crate::queue::{build_job, JobQueue, JobQueueConfig, QueueError};

pub struct PgJobQueue {
    repository: ScanJobRepository,
    config: JobQueueConfig,
    wake: Arc<Notify>,
    listener: JoinHandle<()>,
}

impl PgJobQueue {
    /// Build the queue and start listening for new-job notifications.
    pub fn new(repository: ScanJobRepository, config: JobQueueConfig) -> Self {
        let wake = Arc::new(Notify::new());
        let listener = tokio::spawn(Self::listen(repository.pool().clone(), wake.clone()));

        tracing::info!(
            lease_secs = config.lease_duration.as_secs(),
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            "PostgreSQL job queue started"
        );

        Self {
            repository,
            config,
            wake,
            listener,
        }
    }

    async fn listen(pool: sqlx::PgPool, wake: Arc<Notify>) {
        loop {
            match sqlx::postgres::PgListener::connect_with(&pool).await {
                Ok(mut listener) => {
                    if let Err(e) = listener.listen(NEW_JOB_CHANNEL).await {
                        tracing::warn!(error = %e, "LISTEN failed, will retry");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                    while listener.recv().await.is_ok() {
                        wake.notify_waiters();
                    }
                    tracing::warn!("Job notification listener disconnected, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "PgListener connect failed, will retry");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn prune(&self, state: JobState) {
        let retain = match state {
            JobState::Completed => self.config.retain_completed,
            _ => self.config.retain_failed,
        };
        if let Err(e) = self.repository.prune_finished(state, retain).await {
            tracing::warn!(error = %e, state = %state, "Failed to prune finished jobs");
        }
    }

    /// How long an idle consumer sleeps before looking again.
    async fn idle_wait(&self, job_type: JobType) -> Result<Duration, QueueError> {
        let next = self
            .repository
            .next_wakeup(job_type)
            .await
            .map_err(QueueError::unavailable)?;
        let until_next = next
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.config.poll_interval);
        Ok(until_next
            .min(self.config.poll_interval)
            .max(Duration::from_millis(10)))
    }
}

impl Drop for PgJobQueue {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[tracing::instrument(skip(self, payload, options))]
    async fn submit(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<Uuid, QueueError> {
        let job = build_job(job_type, &payload, options)?;
        let inserted = self.repository.insert(&job).await.map_err(|e| {
            tracing::error!(error = %e, job_type = %job_type, "Failed to persist submitted job");
            QueueError::unavailable(e)
        })?;

        tracing::info!(
            job.id = %inserted.id,
            file.id = %inserted.file_reference,
            job_type = %job_type,
            "Job submitted to queue"
        );
        Ok(inserted.id)
    }

    async fn acquire(&self, job_type: JobType) -> Result<(ScanJob, Lease), QueueError> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let exhausted = self
                .repository
                .exhaust_expired_leases(job_type)
                .await
                .map_err(QueueError::unavailable)?;
            for job in &exhausted {
                tracing::error!(
                    job.id = %job.id,
                    file.id = %job.file_reference,
                    attempt = job.attempt_count,
                    "Scan job exhausted after its final lease expired; file stays pending"
                );
            }
            if !exhausted.is_empty() {
                self.prune(JobState::Failed).await;
            }

            if let Some(claimed) = self
                .repository
                .claim_next(job_type, self.config.lease_duration)
                .await
                .map_err(QueueError::unavailable)?
            {
                return Ok(claimed);
            }

            let wait = self.idle_wait(job_type).await?;
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        match self
            .repository
            .ack(lease)
            .await
            .map_err(QueueError::unavailable)?
        {
            AckResult::Acked => {
                self.prune(JobState::Completed).await;
                Ok(())
            }
            AckResult::AlreadyAcked => Ok(()),
            AckResult::LeaseLost => Err(QueueError::LeaseLost(lease.job_id)),
        }
    }

    async fn fail(&self, lease: &Lease, error: &str) -> Result<RetryDecision, QueueError> {
        let decision = self
            .repository
            .fail(lease, error)
            .await
            .map_err(QueueError::unavailable)?
            .ok_or(QueueError::LeaseLost(lease.job_id))?;

        if decision == RetryDecision::Exhausted {
            self.prune(JobState::Failed).await;
        }
        Ok(decision)
    }

    async fn progress(&self, lease: &Lease, percent: i32) -> Result<(), QueueError> {
        let current = self
            .repository
            .progress(lease, percent)
            .await
            .map_err(QueueError::unavailable)?;
        if current {
            Ok(())
        } else {
            Err(QueueError::LeaseLost(lease.job_id))
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>, QueueError> {
        self.repository
            .get(job_id)
            .await
            .map_err(QueueError::unavailable)
    }
}
