use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound for any computed retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_BACKOFF_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Scan,
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobType::Scan => write!(f, "scan"),
        }
    }
}

impl FromStr for JobType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(JobType::Scan),
            _ => Err(anyhow::anyhow!("Invalid job type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready for delivery.
    Waiting,
    /// Waiting for `next_eligible_at` after a failed attempt.
    Delayed,
    /// Leased by a worker.
    Active,
    Completed,
    Failed,
}

impl Display for JobState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobState::Waiting => write!(f, "waiting"),
            JobState::Delayed => write!(f, "delayed"),
            JobState::Active => write!(f, "active"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(anyhow::anyhow!("Invalid job state: {}", s)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 3,
    #[default]
    Normal = 5,
    High = 7,
    Critical = 10,
}

impl Priority {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            i32::MIN..=3 => Priority::Low,
            4..=6 => Priority::Normal,
            7..=9 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        priority as i32
    }
}

/// Delay policy applied between failed attempts.
///
/// Serialized as `{"type": "exponential", "delay": 1000}` with the delay in
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    Exponential {
        #[serde(rename = "delay")]
        delay_ms: u64,
    },
    Fixed {
        #[serde(rename = "delay")]
        delay_ms: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            delay_ms: DEFAULT_BACKOFF_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn exponential(base: Duration) -> Self {
        BackoffPolicy::Exponential {
            delay_ms: base.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed {
            delay_ms: delay.as_millis().min(u64::MAX as u128) as u64,
        }
    }

    /// Delay before the next attempt, given how many attempts have already run.
    ///
    /// Exponential: `base * 2^(attempts_made - 1)`, so the second attempt waits
    /// `base` and the third waits `2 * base`. Saturates at [`MAX_BACKOFF`].
    pub fn delay_after(&self, attempts_made: i32) -> Duration {
        let delay_ms = match *self {
            BackoffPolicy::Fixed { delay_ms } => delay_ms,
            BackoffPolicy::Exponential { delay_ms } => {
                let exponent = attempts_made.saturating_sub(1).clamp(0, 63) as u32;
                let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
                delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(delay_ms).min(MAX_BACKOFF)
    }
}

/// Per-submission options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
    pub priority: Priority,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            priority: Priority::Normal,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not valid JSON for this job type: {0}")]
    Malformed(String),
    #[error("fileId must be a UUID, got '{0}'")]
    InvalidFileId(String),
    #[error("filePath must not be empty")]
    EmptyFilePath,
    #[error("maxAttempts must be at least 1, got {0}")]
    InvalidMaxAttempts(i32),
}

/// Trait for type-safe job payloads
pub trait JobPayload: Serialize + for<'de> Deserialize<'de> {
    fn job_type() -> JobType;

    fn validate(&self) -> Result<(), PayloadError>;
}

/// Wire payload of a `scan` job: `{"fileId": "<uuid>", "filePath": "<path>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJobPayload {
    pub file_id: String,
    pub file_path: String,
}

impl ScanJobPayload {
    pub fn new(file_id: Uuid, file_path: impl Into<String>) -> Self {
        Self {
            file_id: file_id.to_string(),
            file_path: file_path.into(),
        }
    }

    /// Parse and validate a raw JSON payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, PayloadError> {
        let payload: ScanJobPayload = serde_json::from_value(value.clone())
            .map_err(|e| PayloadError::Malformed(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn file_uuid(&self) -> Result<Uuid, PayloadError> {
        Uuid::parse_str(&self.file_id).map_err(|_| PayloadError::InvalidFileId(self.file_id.clone()))
    }
}

impl JobPayload for ScanJobPayload {
    fn job_type() -> JobType {
        JobType::Scan
    }

    fn validate(&self) -> Result<(), PayloadError> {
        self.file_uuid()?;
        if self.file_path.trim().is_empty() {
            return Err(PayloadError::EmptyFilePath);
        }
        Ok(())
    }
}

/// Exclusive, time-bounded claim on a job. The token changes on every delivery,
/// so a lease from an expired attempt can never settle a redelivered one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: Uuid,
    pub token: Uuid,
    /// 1-based attempt number this lease covers.
    pub attempt: i32,
    pub expires_at: DateTime<Utc>,
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    WillRetry {
        #[serde(with = "duration_ms", rename = "delayMs")]
        delay: Duration,
        #[serde(rename = "nextAttempt")]
        next_attempt: i32,
    },
    Exhausted,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// A queued unit of work. One scan job exists per uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub file_reference: Uuid,
    pub storage_path: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub backoff: BackoffPolicy,
    pub priority: Priority,
    pub next_eligible_at: Option<DateTime<Utc>>,
    pub progress: i32,
    pub state: JobState,
    pub last_error: Option<String>,
    #[serde(skip_serializing)]
    pub lease_token: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    /// Build a fresh `waiting` job from a validated payload.
    pub fn new(payload: &ScanJobPayload, options: SubmitOptions) -> Result<Self, PayloadError> {
        payload.validate()?;
        if options.max_attempts < 1 {
            return Err(PayloadError::InvalidMaxAttempts(options.max_attempts));
        }
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            job_type: JobType::Scan,
            payload: serde_json::to_value(payload)
                .map_err(|e| PayloadError::Malformed(e.to_string()))?,
            file_reference: payload.file_uuid()?,
            storage_path: payload.file_path.clone(),
            attempt_count: 0,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            priority: options.priority,
            next_eligible_at: None,
            progress: 0,
            state: JobState::Waiting,
            last_error: None,
            lease_token: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        })
    }

    pub fn can_retry(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Whether a worker could lease this job at `now`.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            JobState::Waiting => true,
            JobState::Delayed => self.next_eligible_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    pub fn lease_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active && self.lease_expires_at.map_or(false, |at| at <= now)
    }

    /// Decision for a failed attempt whose `attempt_count` is already final.
    pub fn retry_decision(&self) -> RetryDecision {
        if self.can_retry() {
            RetryDecision::WillRetry {
                delay: self.backoff.delay_after(self.attempt_count),
                next_attempt: self.attempt_count + 1,
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ScanJob {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let backoff: serde_json::Value = row.get("backoff");
        Ok(ScanJob {
            id: row.get("id"),
            job_type: row.get::<String, _>("job_type").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse job_type: {}", e).into())
            })?,
            payload: row.get("payload"),
            file_reference: row.get("file_reference"),
            storage_path: row.get("storage_path"),
            attempt_count: row.get("attempt_count"),
            max_attempts: row.get("max_attempts"),
            backoff: serde_json::from_value(backoff).map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse backoff: {}", e).into())
            })?,
            priority: Priority::from_i32(row.get("priority")),
            next_eligible_at: row.get("next_eligible_at"),
            progress: row.get("progress"),
            state: row.get::<String, _>("state").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse state: {}", e).into())
            })?,
            last_error: row.get("last_error"),
            lease_token: row.get("lease_token"),
            lease_expires_at: row.get("lease_expires_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            finished_at: row.get("finished_at"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_state_round_trips_through_str() {
        for state in [
            JobState::Waiting,
            JobState::Delayed,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(state.to_string().parse::<JobState>().unwrap(), state);
        }
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn test_job_type_from_str() {
        assert_eq!("scan".parse::<JobType>().unwrap(), JobType::Scan);
        assert!("transcode".parse::<JobType>().is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!(Priority::from_i32(Priority::High.as_i32()), Priority::High);
        assert_eq!(Priority::from_i32(-4), Priority::Low);
    }

    #[test]
    fn test_exponential_backoff_doubles_per_attempt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_saturates_at_one_hour() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
        assert_eq!(policy.delay_after(i32::MAX), MAX_BACKOFF);
        let huge = BackoffPolicy::Exponential { delay_ms: u64::MAX };
        assert_eq!(huge.delay_after(2), MAX_BACKOFF);
    }

    #[test]
    fn test_fixed_backoff_is_constant() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(5), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_wire_format() {
        let json = serde_json::to_value(BackoffPolicy::default()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exponential", "delay": 1000}));
        let fixed: BackoffPolicy =
            serde_json::from_value(serde_json::json!({"type": "fixed", "delay": 5})).unwrap();
        assert_eq!(fixed, BackoffPolicy::Fixed { delay_ms: 5 });
    }

    #[test]
    fn test_scan_payload_wire_names() {
        let id = Uuid::new_v4();
        let payload = ScanJobPayload::new(id, "uploads/1-a.pdf");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["fileId"], id.to_string());
        assert_eq!(json["filePath"], "uploads/1-a.pdf");
    }

    #[test]
    fn test_scan_payload_rejects_bad_file_id() {
        let value = serde_json::json!({"fileId": "not-a-uuid", "filePath": "x"});
        assert_eq!(
            ScanJobPayload::from_value(&value),
            Err(PayloadError::InvalidFileId("not-a-uuid".to_string()))
        );
    }

    #[test]
    fn test_scan_payload_rejects_empty_path() {
        let value = serde_json::json!({"fileId": Uuid::new_v4().to_string(), "filePath": "  "});
        assert_eq!(
            ScanJobPayload::from_value(&value),
            Err(PayloadError::EmptyFilePath)
        );
    }

    #[test]
    fn test_scan_payload_rejects_missing_fields() {
        let value = serde_json::json!({"fileId": Uuid::new_v4().to_string()});
        assert!(matches!(
            ScanJobPayload::from_value(&value),
            Err(PayloadError::Malformed(_))
        ));
    }

    #[test]
    fn test_new_job_starts_waiting_with_zero_attempts() {
        let id = Uuid::new_v4();
        let job = ScanJob::new(&ScanJobPayload::new(id, "a.pdf"), SubmitOptions::default()).unwrap();
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.file_reference, id);
        assert!(job.next_eligible_at.is_none());
        assert!(job.is_ready_at(Utc::now()));
        assert!(job.can_retry());
    }

    #[test]
    fn test_new_job_rejects_zero_attempts() {
        let options = SubmitOptions {
            max_attempts: 0,
            ..SubmitOptions::default()
        };
        let err = ScanJob::new(&ScanJobPayload::new(Uuid::new_v4(), "a.pdf"), options).unwrap_err();
        assert_eq!(err, PayloadError::InvalidMaxAttempts(0));
    }

    #[test]
    fn test_delayed_job_ready_only_after_eligible_time() {
        let mut job =
            ScanJob::new(&ScanJobPayload::new(Uuid::new_v4(), "a.pdf"), SubmitOptions::default())
                .unwrap();
        let now = Utc::now();
        job.state = JobState::Delayed;
        job.next_eligible_at = Some(now + chrono::Duration::seconds(5));
        assert!(!job.is_ready_at(now));
        assert!(job.is_ready_at(now + chrono::Duration::seconds(5)));
    }

    #[test]
    fn test_retry_decision_follows_attempt_count() {
        let mut job =
            ScanJob::new(&ScanJobPayload::new(Uuid::new_v4(), "a.pdf"), SubmitOptions::default())
                .unwrap();
        job.attempt_count = 1;
        assert_eq!(
            job.retry_decision(),
            RetryDecision::WillRetry {
                delay: Duration::from_millis(1000),
                next_attempt: 2
            }
        );
        job.attempt_count = 2;
        assert_eq!(
            job.retry_decision(),
            RetryDecision::WillRetry {
                delay: Duration::from_millis(2000),
                next_attempt: 3
            }
        );
        job.attempt_count = 3;
        assert_eq!(job.retry_decision(), RetryDecision::Exhausted);
    }

    #[test]
    fn test_retry_decision_json() {
        let decision = RetryDecision::WillRetry {
            delay: Duration::from_millis(2000),
            next_attempt: 3,
        };
        let json = serde_json::to_value(decision).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"decision": "will_retry", "delayMs": 2000, "nextAttempt": 3})
        );
        let back: RetryDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
        assert_eq!(
            serde_json::to_value(RetryDecision::Exhausted).unwrap(),
            serde_json::json!({"decision": "exhausted"})
        );
    }

    #[test]
    fn test_lease_token_not_serialized() {
        let mut job =
            ScanJob::new(&ScanJobPayload::new(Uuid::new_v4(), "a.pdf"), SubmitOptions::default())
                .unwrap();
        job.lease_token = Some(Uuid::new_v4());
        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("leaseToken").is_none());
        assert_eq!(json["state"], "waiting");
        assert_eq!(json["attemptCount"], 0);
    }
}
