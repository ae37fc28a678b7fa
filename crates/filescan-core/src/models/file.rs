use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Scanned,
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Scanned => write!(f, "scanned"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "scanned" => Ok(FileStatus::Scanned),
            _ => Err(anyhow::anyhow!("Invalid file status: {}", s)),
        }
    }
}

/// Scan verdict stored on a file record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScanResult {
    Clean,
    Infected,
}

impl Display for ScanResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ScanResult::Clean => write!(f, "clean"),
            ScanResult::Infected => write!(f, "infected"),
        }
    }
}

impl FromStr for ScanResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" => Ok(ScanResult::Clean),
            "infected" => Ok(ScanResult::Infected),
            _ => Err(anyhow::anyhow!("Invalid scan result: {}", s)),
        }
    }
}

/// Metadata record for one uploaded file.
///
/// `result` is set iff `status == Scanned`, and `scanned_at` is written exactly
/// once, on that transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub id: Uuid,
    pub filename: String,
    pub path: String,
    pub status: FileStatus,
    pub result: Option<ScanResult>,
    pub uploaded_at: DateTime<Utc>,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl FileMetadata {
    pub fn pending(filename: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            path: path.into(),
            status: FileStatus::Pending,
            result: None,
            uploaded_at: Utc::now(),
            scanned_at: None,
        }
    }

    pub fn is_scanned(&self) -> bool {
        self.status == FileStatus::Scanned
    }

    /// Apply the terminal transition in place. Returns `false` and leaves the
    /// record untouched if it was already scanned.
    pub fn apply_scan(&mut self, result: ScanResult, scanned_at: DateTime<Utc>) -> bool {
        if self.is_scanned() {
            return false;
        }
        self.status = FileStatus::Scanned;
        self.result = Some(result);
        self.scanned_at = Some(scanned_at);
        true
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for FileMetadata {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let result = row
            .get::<Option<String>, _>("result")
            .map(|r| r.parse::<ScanResult>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(format!("Failed to parse result: {}", e).into()))?;
        Ok(FileMetadata {
            id: row.get("id"),
            filename: row.get("filename"),
            path: row.get("path"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse status: {}", e).into())
            })?,
            result,
            uploaded_at: row.get("uploaded_at"),
            scanned_at: row.get("scanned_at"),
        })
    }
}

/// Outcome of the conditional terminal update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// The record moved from pending to scanned; carries the updated record.
    Updated(FileMetadata),
    /// The record was already scanned; carries it unchanged.
    AlreadyScanned(FileMetadata),
}

impl MarkOutcome {
    pub fn record(&self) -> &FileMetadata {
        match self {
            MarkOutcome::Updated(record) | MarkOutcome::AlreadyScanned(record) => record,
        }
    }

    pub fn was_updated(&self) -> bool {
        matches!(self, MarkOutcome::Updated(_))
    }
}

/// Listing filter. Without a `limit` every matching record is returned.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileListQuery {
    pub status: Option<FileStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl FileListQuery {
    pub const MAX_LIMIT: i64 = 500;

    pub fn limit(&self) -> Option<i64> {
        self.limit.map(|limit| limit.clamp(1, Self::MAX_LIMIT))
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub total: i64,
    pub pending: i64,
    pub scanned: i64,
    pub clean: i64,
    pub infected: i64,
}
