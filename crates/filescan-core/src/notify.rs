//! Notification hook for infected files
//!
//! The scan worker only knows this trait; the webhook sender lives in
//! `filescan-infra`. Delivery is best-effort: callers log failures and never
//! retry them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Alert raised when a file is newly classified as infected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfectionAlert {
    pub file_id: Uuid,
    pub filename: String,
    /// Storage path of the infected file.
    pub path: String,
    pub scanned_at: DateTime<Utc>,
}

/// JSON body posted to the notification endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfectionMessage {
    pub text: String,
    pub filename: String,
    pub scanned_at: DateTime<Utc>,
}

impl From<&InfectionAlert> for InfectionMessage {
    fn from(alert: &InfectionAlert) -> Self {
        Self {
            text: format!("Malware detected in file: {}", alert.path),
            filename: alert.filename.clone(),
            scanned_at: alert.scanned_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification request failed: {0}")]
    Transport(String),

    #[error("notification endpoint returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to build notification: {0}")]
    Build(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_infected(&self, alert: &InfectionAlert) -> Result<(), NotificationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_shape() {
        let scanned_at = Utc::now();
        let alert = InfectionAlert {
            file_id: Uuid::new_v4(),
            filename: "giveaway.pdf".to_string(),
            path: "1700000000000-giveaway.pdf".to_string(),
            scanned_at,
        };
        let json = serde_json::to_value(InfectionMessage::from(&alert)).unwrap();
        assert_eq!(
            json["text"],
            "Malware detected in file: 1700000000000-giveaway.pdf"
        );
        assert_eq!(json["filename"], "giveaway.pdf");
        assert!(json.get("scannedAt").is_some());
    }
}
