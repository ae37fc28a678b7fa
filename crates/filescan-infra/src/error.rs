//! HTTP error response body
//!
//! The `IntoResponse` impl for `AppError` lives in the API crate (orphan rule);
//! this is the JSON shape it produces.

use filescan_core::{AppError, ErrorMetadata};
use serde::Serialize;

/// Standard error response format for HTTP APIs
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub code: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorResponse {
    /// Build the body for `err`. Internal details are included only when
    /// `expose_details` is set and the error is not marked sensitive.
    pub fn from_app_error(err: &AppError, expose_details: bool) -> Self {
        let details = if expose_details && !err.is_sensitive() {
            Some(err.detailed_message())
        } else {
            None
        };

        Self {
            error: err.client_message(),
            details,
            code: err.error_code().to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action().map(str::to_string),
        }
    }
}
