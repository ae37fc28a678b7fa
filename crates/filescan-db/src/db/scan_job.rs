use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;
use uuid::Uuid;

use filescan_core::models::{JobState, JobType, Lease, RetryDecision, ScanJob};

/// Channel workers LISTEN on; the payload is the job type.
pub const NEW_JOB_CHANNEL: &str = "filescan_new_job";

const JOB_COLUMNS: &str = r#"
    id, job_type, payload, file_reference, storage_path, attempt_count, max_attempts,
    backoff, priority, next_eligible_at, progress, state, last_error, lease_token,
    lease_expires_at, created_at, updated_at, finished_at
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    Acked,
    /// The same lease already completed the job.
    AlreadyAcked,
    LeaseLost,
}

/// Settlements kept for jobs already pruned by retention.
pub const SETTLED_TOMBSTONE_LIMIT: i64 = 10_000;

fn millis(duration: Duration) -> i64 {
    duration.as_millis().min(i64::MAX as u128) as i64
}

#[derive(Clone)]
pub struct ScanJobRepository {
    pool: PgPool,
}

impl ScanJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a new job and wake listening workers.
    #[tracing::instrument(skip(self, job), fields(job.id = %job.id, file.id = %job.file_reference))]
    pub async fn insert(&self, job: &ScanJob) -> Result<ScanJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for job submission")?;

        let inserted: ScanJob = sqlx::query_as::<Postgres, ScanJob>(&format!(
            r#"
            INSERT INTO scan_jobs (
                id, job_type, payload, file_reference, storage_path, attempt_count,
                max_attempts, backoff, priority, progress, state, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8, 0, 'waiting', $9, $9)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(job.job_type.to_string())
        .bind(&job.payload)
        .bind(job.file_reference)
        .bind(&job.storage_path)
        .bind(job.max_attempts)
        .bind(serde_json::to_value(job.backoff).context("Failed to encode backoff policy")?)
        .bind(job.priority.as_i32())
        .bind(job.created_at)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert scan job")?;

        // Workers still find the job by polling if the notification is lost.
        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NEW_JOB_CHANNEL)
            .bind(job.job_type.to_string())
            .execute(&mut *tx)
            .await
        {
            tracing::warn!(
                error = %e,
                "Failed to send pg_notify for new job, workers will discover it via polling"
            );
        }

        tx.commit()
            .await
            .context("Failed to commit job submission")?;

        tracing::debug!(priority = inserted.priority.as_i32(), "Scan job inserted");
        Ok(inserted)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get(&self, job_id: Uuid) -> Result<Option<ScanJob>> {
        let job = sqlx::query_as::<Postgres, ScanJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch scan job")?;

        Ok(job)
    }

    /// Fail every active job of `job_type` whose lease expired on its last
    /// allowed attempt. Returns the jobs that were exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn exhaust_expired_leases(&self, job_type: JobType) -> Result<Vec<ScanJob>> {
        let jobs = sqlx::query_as::<Postgres, ScanJob>(&format!(
            r#"
            UPDATE scan_jobs
            SET state = 'failed',
                last_error = 'lease expired',
                settled_lease_token = lease_token,
                last_decision = '{{"decision": "exhausted"}}'::jsonb,
                lease_token = NULL,
                lease_expires_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE job_type = $1
                AND state = 'active'
                AND lease_expires_at <= NOW()
                AND attempt_count >= max_attempts
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_type.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to exhaust expired leases")?;

        Ok(jobs)
    }

    /// Atomically lease the next deliverable job of `job_type`.
    ///
    /// Deliverable means waiting, delayed past its eligible time, or active with
    /// an expired lease and attempts left. Order is priority, then submission.
    #[tracing::instrument(skip(self))]
    pub async fn claim_next(
        &self,
        job_type: JobType,
        lease_duration: Duration,
    ) -> Result<Option<(ScanJob, Lease)>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let candidate: Option<Uuid> = sqlx::query_scalar::<Postgres, Uuid>(
            r#"
            SELECT id
            FROM scan_jobs
            WHERE job_type = $1
                AND (
                    state = 'waiting'
                    OR (state = 'delayed' AND next_eligible_at <= NOW())
                    OR (state = 'active' AND lease_expires_at <= NOW()
                        AND attempt_count < max_attempts)
                )
            ORDER BY priority DESC, seq ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(job_type.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch next scan job")?;

        let Some(job_id) = candidate else {
            tx.rollback().await.ok();
            return Ok(None);
        };

        let token = Uuid::new_v4();
        let job: ScanJob = sqlx::query_as::<Postgres, ScanJob>(&format!(
            r#"
            UPDATE scan_jobs
            SET last_error = CASE WHEN state = 'active' THEN 'lease expired' ELSE last_error END,
                state = 'active',
                attempt_count = attempt_count + 1,
                lease_token = $2,
                lease_expires_at = NOW() + ($3::bigint * interval '1 millisecond'),
                next_eligible_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(token)
        .bind(millis(lease_duration))
        .fetch_one(&mut *tx)
        .await
        .context("Failed to lease scan job")?;

        tx.commit().await.context("Failed to commit transaction")?;

        let lease = Lease {
            job_id: job.id,
            token,
            attempt: job.attempt_count,
            expires_at: job.lease_expires_at.unwrap_or_else(Utc::now),
        };

        tracing::debug!(
            job.id = %job.id,
            attempt = job.attempt_count,
            "Scan job leased"
        );

        Ok(Some((job, lease)))
    }

    /// Mark the job completed if `lease` is still the current lease.
    #[tracing::instrument(skip(self, lease), fields(job.id = %lease.job_id))]
    pub async fn ack(&self, lease: &Lease) -> Result<AckResult> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'completed',
                progress = 100,
                settled_lease_token = lease_token,
                last_decision = NULL,
                lease_token = NULL,
                lease_expires_at = NULL,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND lease_token = $2
            "#,
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .execute(&self.pool)
        .await
        .context("Failed to ack scan job")?;

        if updated.rows_affected() > 0 {
            return Ok(AckResult::Acked);
        }

        let row = sqlx::query(
            r#"
            SELECT state, settled_lease_token FROM scan_jobs WHERE id = $1
            UNION ALL
            SELECT state, lease_token AS settled_lease_token FROM scan_job_settlements
            WHERE job_id = $1
            LIMIT 1
            "#,
        )
        .bind(lease.job_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read scan job after ack")?;

        let already_acked = row.is_some_and(|row| {
            row.get::<String, _>("state") == JobState::Completed.to_string()
                && row.get::<Option<Uuid>, _>("settled_lease_token") == Some(lease.token)
        });

        Ok(if already_acked {
            AckResult::AlreadyAcked
        } else {
            AckResult::LeaseLost
        })
    }

    /// Record a failed attempt. Returns `None` when `lease` is neither current
    /// nor the lease that produced the recorded decision.
    #[tracing::instrument(skip(self, lease, error), fields(job.id = %lease.job_id))]
    pub async fn fail(&self, lease: &Lease, error: &str) -> Result<Option<RetryDecision>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}, settled_lease_token, last_decision
            FROM scan_jobs
            WHERE id = $1
            FOR UPDATE
            "#
        ))
        .bind(lease.job_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock scan job")?;

        let Some(row) = row else {
            tx.rollback().await.ok();
            return self.pruned_decision(lease).await;
        };

        let job = <ScanJob as sqlx::FromRow<_>>::from_row(&row)
            .context("Failed to decode scan job")?;

        if job.state != JobState::Active || job.lease_token != Some(lease.token) {
            tx.rollback().await.ok();
            let settled_by_this_lease =
                row.get::<Option<Uuid>, _>("settled_lease_token") == Some(lease.token);
            let recorded = row
                .get::<Option<serde_json::Value>, _>("last_decision")
                .map(serde_json::from_value::<RetryDecision>)
                .transpose()
                .context("Failed to decode recorded retry decision")?;
            return Ok(if settled_by_this_lease { recorded } else { None });
        }

        let decision = job.retry_decision();
        let recorded = serde_json::to_value(decision).context("Failed to encode decision")?;

        match decision {
            RetryDecision::WillRetry { delay, .. } => {
                sqlx::query(
                    r#"
                    UPDATE scan_jobs
                    SET state = 'delayed',
                        next_eligible_at = NOW() + ($2::bigint * interval '1 millisecond'),
                        last_error = $3,
                        settled_lease_token = lease_token,
                        last_decision = $4,
                        lease_token = NULL,
                        lease_expires_at = NULL,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job.id)
                .bind(millis(delay))
                .bind(error)
                .bind(recorded)
                .execute(&mut *tx)
                .await
                .context("Failed to reschedule scan job")?;
            }
            RetryDecision::Exhausted => {
                sqlx::query(
                    r#"
                    UPDATE scan_jobs
                    SET state = 'failed',
                        last_error = $2,
                        settled_lease_token = lease_token,
                        last_decision = $3,
                        lease_token = NULL,
                        lease_expires_at = NULL,
                        finished_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(job.id)
                .bind(error)
                .bind(recorded)
                .execute(&mut *tx)
                .await
                .context("Failed to mark scan job failed")?;
            }
        }

        tx.commit().await.context("Failed to commit transaction")?;
        Ok(Some(decision))
    }

    /// Decision recorded by `lease` for a job that retention already removed.
    async fn pruned_decision(&self, lease: &Lease) -> Result<Option<RetryDecision>> {
        let recorded = sqlx::query_scalar::<Postgres, Option<serde_json::Value>>(
            "SELECT decision FROM scan_job_settlements WHERE job_id = $1 AND lease_token = $2",
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read pruned job settlement")?;

        recorded
            .flatten()
            .map(serde_json::from_value::<RetryDecision>)
            .transpose()
            .context("Failed to decode recorded retry decision")
    }

    /// Raise progress for the current lease; never lowers it. Returns whether the
    /// lease was current.
    #[tracing::instrument(skip(self, lease), fields(job.id = %lease.job_id))]
    pub async fn progress(&self, lease: &Lease, percent: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET progress = GREATEST(progress, $3),
                updated_at = NOW()
            WHERE id = $1 AND state = 'active' AND lease_token = $2
            "#,
        )
        .bind(lease.job_id)
        .bind(lease.token)
        .bind(percent.clamp(0, 100))
        .execute(&self.pool)
        .await
        .context("Failed to update scan job progress")?;

        Ok(result.rows_affected() > 0)
    }

    /// Earliest moment a delayed job becomes eligible or an active lease expires.
    pub async fn next_wakeup(&self, job_type: JobType) -> Result<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar::<Postgres, Option<DateTime<Utc>>>(
            r#"
            SELECT MIN(at) FROM (
                SELECT next_eligible_at AS at FROM scan_jobs
                WHERE job_type = $1 AND state = 'delayed'
                UNION ALL
                SELECT lease_expires_at AS at FROM scan_jobs
                WHERE job_type = $1 AND state = 'active'
            ) t
            "#,
        )
        .bind(job_type.to_string())
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute next queue wakeup")?;

        Ok(at)
    }

    /// Keep only the newest `retain` finished jobs in `state`. Removed jobs
    /// leave their settlement behind in `scan_job_settlements`. Returns rows
    /// deleted.
    #[tracing::instrument(skip(self))]
    pub async fn prune_finished(&self, state: JobState, retain: usize) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction for pruning")?;

        let count: i64 = sqlx::query_scalar::<Postgres, i64>(
            r#"
            WITH pruned AS (
                DELETE FROM scan_jobs
                WHERE state = $1
                    AND id NOT IN (
                        SELECT id FROM scan_jobs
                        WHERE state = $1
                        ORDER BY finished_at DESC NULLS LAST, seq DESC
                        LIMIT $2
                    )
                RETURNING id, state, settled_lease_token, last_decision
            ),
            buried AS (
                INSERT INTO scan_job_settlements (job_id, lease_token, state, decision)
                SELECT id, settled_lease_token, state, last_decision
                FROM pruned
                WHERE settled_lease_token IS NOT NULL
                ON CONFLICT (job_id) DO UPDATE
                SET lease_token = EXCLUDED.lease_token,
                    state = EXCLUDED.state,
                    decision = EXCLUDED.decision,
                    settled_at = NOW()
            )
            SELECT COUNT(*) FROM pruned
            "#,
        )
        .bind(state.to_string())
        .bind(retain.min(i64::MAX as usize) as i64)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to prune finished scan jobs")?;

        if count > 0 {
            sqlx::query(
                r#"
                DELETE FROM scan_job_settlements
                WHERE job_id NOT IN (
                    SELECT job_id FROM scan_job_settlements
                    ORDER BY settled_at DESC
                    LIMIT $1
                )
                "#,
            )
            .bind(SETTLED_TOMBSTONE_LIMIT)
            .execute(&mut *tx)
            .await
            .context("Failed to trim pruned job settlements")?;
        }

        tx.commit().await.context("Failed to commit pruning")?;

        let count = count.max(0) as u64;
        if count > 0 {
            tracing::debug!(count, state = %state, "Pruned finished scan jobs");
        }
        Ok(count)
    }
}
