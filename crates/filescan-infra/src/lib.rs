//! Filescan Infrastructure Library
//!
//! Shared infrastructure for the filescan binaries:
//! - Telemetry initialization
//! - HTTP error response body
//! - Request ID middleware
//! - Webhook delivery of infection alerts

#[cfg(feature = "middleware")]
pub mod middleware;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod error;

#[cfg(feature = "webhook")]
pub mod webhook;

// Re-export commonly used types
#[cfg(feature = "middleware")]
pub use middleware::{get_request_id, request_id_middleware, RequestId};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use error::ErrorResponse;

#[cfg(feature = "webhook")]
pub use webhook::{WebhookNotifier, WebhookNotifierConfig, SIGNATURE_HEADER};
