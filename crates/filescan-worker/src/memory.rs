//! Process-local job queue
//!
//! All state sits behind one mutex; waiting consumers park on a [`Notify`] and a
//! timer set to the earliest delayed job or lease expiry. Nothing survives a
//! restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use filescan_core::models::{JobState, JobType, Lease, RetryDecision, ScanJob, SubmitOptions};

use crate::queue::{build_job, JobQueue, JobQueueConfig, QueueError};

/// Settlements remembered for jobs already pruned by retention.
const SETTLED_TOMBSTONE_LIMIT: usize = 10_000;

fn deadline(now: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|after| now.checked_add_signed(after))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Clone, Copy)]
enum Settlement {
    Acked,
    Failed(RetryDecision),
}

struct Entry {
    job: ScanJob,
    seq: u64,
    /// Token and outcome of the most recent lease that settled this job.
    settled: Option<(Uuid, Settlement)>,
}

impl Entry {
    fn deliverable_at(&self, now: DateTime<Utc>) -> bool {
        self.job.is_ready_at(now) || (self.job.lease_expired_at(now) && self.job.can_retry())
    }

    fn holds(&self, lease: &Lease) -> bool {
        self.job.state == JobState::Active && self.job.lease_token == Some(lease.token)
    }

    fn finish(&mut self, state: JobState, now: DateTime<Utc>) {
        self.job.state = state;
        self.job.lease_token = None;
        self.job.lease_expires_at = None;
        self.job.finished_at = Some(now);
        self.job.updated_at = now;
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Entry>,
    next_seq: u64,
    completed: VecDeque<Uuid>,
    failed: VecDeque<Uuid>,
    /// Last settlement of pruned jobs, so ack/fail replays stay answerable.
    tombstones: HashMap<Uuid, (Uuid, Settlement)>,
    tombstone_order: VecDeque<Uuid>,
}

impl QueueState {
    /// Fail active jobs whose lease ran out on their last allowed attempt.
    fn exhaust_expired(&mut self, job_type: JobType, now: DateTime<Utc>) -> Vec<ScanJob> {
        let mut exhausted = Vec::new();
        for entry in self.jobs.values_mut() {
            if entry.job.job_type != job_type
                || !entry.job.lease_expired_at(now)
                || entry.job.can_retry()
            {
                continue;
            }
            if let Some(token) = entry.job.lease_token {
                entry.settled = Some((token, Settlement::Failed(RetryDecision::Exhausted)));
            }
            entry.job.last_error = Some("lease expired".to_string());
            entry.finish(JobState::Failed, now);
            exhausted.push(entry.job.clone());
        }
        for job in &exhausted {
            self.failed.push_back(job.id);
        }
        exhausted
    }

    fn claim_next(
        &mut self,
        job_type: JobType,
        now: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Option<(ScanJob, Lease)> {
        let job_id = self
            .jobs
            .values()
            .filter(|entry| entry.job.job_type == job_type && entry.deliverable_at(now))
            .max_by(|a, b| {
                a.job
                    .priority
                    .as_i32()
                    .cmp(&b.job.priority.as_i32())
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|entry| entry.job.id)?;

        let entry = self.jobs.get_mut(&job_id)?;
        let job = &mut entry.job;
        if job.state == JobState::Active {
            job.last_error = Some("lease expired".to_string());
        }
        let expires_at = deadline(now, lease_duration);
        let token = Uuid::new_v4();
        job.state = JobState::Active;
        job.attempt_count += 1;
        job.lease_token = Some(token);
        job.lease_expires_at = Some(expires_at);
        job.next_eligible_at = None;
        job.updated_at = now;

        let lease = Lease {
            job_id,
            token,
            attempt: job.attempt_count,
            expires_at,
        };
        Some((job.clone(), lease))
    }

    /// Earliest moment something of `job_type` may become deliverable.
    fn next_wakeup(&self, job_type: JobType) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|entry| entry.job.job_type == job_type)
            .filter_map(|entry| match entry.job.state {
                JobState::Delayed => entry.job.next_eligible_at,
                JobState::Active => entry.job.lease_expires_at,
                _ => None,
            })
            .min()
    }

    fn prune(&mut self, retain_completed: usize, retain_failed: usize) {
        while self.completed.len() > retain_completed {
            if let Some(id) = self.completed.pop_front() {
                self.bury(id);
            }
        }
        while self.failed.len() > retain_failed {
            if let Some(id) = self.failed.pop_front() {
                self.bury(id);
            }
        }
    }

    fn bury(&mut self, job_id: Uuid) {
        let Some(settled) = self.jobs.remove(&job_id).and_then(|entry| entry.settled) else {
            return;
        };
        if self.tombstones.insert(job_id, settled).is_none() {
            self.tombstone_order.push_back(job_id);
        }
        while self.tombstone_order.len() > SETTLED_TOMBSTONE_LIMIT {
            if let Some(oldest) = self.tombstone_order.pop_front() {
                self.tombstones.remove(&oldest);
            }
        }
    }

    /// Settlement recorded for `job_id`, whether or not the job is still retained.
    fn settlement(&self, job_id: Uuid) -> Option<(Uuid, Settlement)> {
        match self.jobs.get(&job_id) {
            Some(entry) => entry.settled,
            None => self.tombstones.get(&job_id).copied(),
        }
    }

    fn is_known(&self, job_id: Uuid) -> bool {
        self.jobs.contains_key(&job_id) || self.tombstones.contains_key(&job_id)
    }
}

pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
    wake: Notify,
    config: JobQueueConfig,
}

impl InMemoryJobQueue {
    pub fn new(config: JobQueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
            config,
        }
    }

    /// Number of jobs currently held, including retained finished ones.
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(JobQueueConfig::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    #[tracing::instrument(skip(self, payload, options))]
    async fn submit(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<Uuid, QueueError> {
        let job = build_job(job_type, &payload, options)?;
        let job_id = job.id;
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.jobs.insert(
                job_id,
                Entry {
                    job,
                    seq,
                    settled: None,
                },
            );
        }
        self.wake.notify_waiters();

        tracing::info!(job.id = %job_id, job_type = %job_type, "Job submitted to queue");
        Ok(job_id)
    }

    async fn acquire(&self, job_type: JobType) -> Result<(ScanJob, Lease), QueueError> {
        loop {
            // Register interest before inspecting state so a submit that lands in
            // between still wakes us.
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Utc::now();
                let exhausted = state.exhaust_expired(job_type, now);
                for job in &exhausted {
                    tracing::error!(
                        job.id = %job.id,
                        file.id = %job.file_reference,
                        attempt = job.attempt_count,
                        "Scan job exhausted after its final lease expired; file stays pending"
                    );
                }
                if !exhausted.is_empty() {
                    state.prune(self.config.retain_completed, self.config.retain_failed);
                }

                if let Some(claimed) =
                    state.claim_next(job_type, now, self.config.lease_duration)
                {
                    return Ok(claimed);
                }
                state.next_wakeup(job_type)
            };

            match wake_at {
                Some(at) => {
                    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    #[tracing::instrument(skip(self, lease), fields(job.id = %lease.job_id))]
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if !state.is_known(lease.job_id) {
            return Err(QueueError::NotFound(lease.job_id));
        }

        if let Some(entry) = state.jobs.get_mut(&lease.job_id).filter(|e| e.holds(lease)) {
            let now = Utc::now();
            entry.job.progress = 100;
            entry.finish(JobState::Completed, now);
            entry.settled = Some((lease.token, Settlement::Acked));
            state.completed.push_back(lease.job_id);
            state.prune(self.config.retain_completed, self.config.retain_failed);
            return Ok(());
        }

        match state.settlement(lease.job_id) {
            Some((token, Settlement::Acked)) if token == lease.token => Ok(()),
            _ => Err(QueueError::LeaseLost(lease.job_id)),
        }
    }

    #[tracing::instrument(skip(self, lease, error), fields(job.id = %lease.job_id))]
    async fn fail(&self, lease: &Lease, error: &str) -> Result<RetryDecision, QueueError> {
        let decision = {
            let mut state = self.state.lock().await;
            if !state.is_known(lease.job_id) {
                return Err(QueueError::NotFound(lease.job_id));
            }
            let settled = state.settlement(lease.job_id);
            let Some(entry) = state.jobs.get_mut(&lease.job_id).filter(|e| e.holds(lease)) else {
                return match settled {
                    Some((token, Settlement::Failed(decision))) if token == lease.token => {
                        Ok(decision)
                    }
                    _ => Err(QueueError::LeaseLost(lease.job_id)),
                };
            };

            let now = Utc::now();
            let decision = entry.job.retry_decision();
            entry.job.last_error = Some(error.to_string());
            entry.settled = Some((lease.token, Settlement::Failed(decision)));

            match decision {
                RetryDecision::WillRetry { delay, .. } => {
                    entry.job.state = JobState::Delayed;
                    entry.job.next_eligible_at = Some(deadline(now, delay));
                    entry.job.lease_token = None;
                    entry.job.lease_expires_at = None;
                    entry.job.updated_at = now;
                }
                RetryDecision::Exhausted => {
                    entry.finish(JobState::Failed, now);
                    state.failed.push_back(lease.job_id);
                    state.prune(self.config.retain_completed, self.config.retain_failed);
                }
            }
            decision
        };

        // Waiters recompute their timer against the new eligible time.
        self.wake.notify_waiters();
        Ok(decision)
    }

    async fn progress(&self, lease: &Lease, percent: i32) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&lease.job_id) {
            Some(entry) if entry.holds(lease) => {
                entry.job.progress = entry.job.progress.max(percent.clamp(0, 100));
                entry.job.updated_at = Utc::now();
                Ok(())
            }
            Some(_) => Err(QueueError::LeaseLost(lease.job_id)),
            None => Err(QueueError::NotFound(lease.job_id)),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>, QueueError> {
        Ok(self
            .state
            .lock()
            .await
            .jobs
            .get(&job_id)
            .map(|entry| entry.job.clone()))
    }
}
