//! Pluggable inspection
//!
//! An `Inspector` turns file bytes into a `Classification`. An inspector error
//! means the verdict is unknown and the attempt should be retried; it is never
//! reported as infected.

use async_trait::async_trait;
use filescan_core::models::ScanResult;

#[cfg(feature = "clamav")]
mod clamav;
mod keyword;

#[cfg(feature = "clamav")]
pub use clamav::ClamAvInspector;
pub use keyword::{classify, KeywordInspector, SUSPICIOUS_KEYWORDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Clean,
    Infected,
}

impl From<Classification> for ScanResult {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::Clean => ScanResult::Clean,
            Classification::Infected => ScanResult::Infected,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InspectionError {
    #[error("inspection backend unavailable: {0}")]
    Unavailable(String),

    #[error("inspection timed out after {0}s")]
    Timeout(u64),

    #[error("unreadable inspection response: {0}")]
    BadResponse(String),
}

#[async_trait]
pub trait Inspector: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn inspect(&self, data: &[u8]) -> Result<Classification, InspectionError>;
}
