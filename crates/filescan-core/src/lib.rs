//! Filescan Core Library
//!
//! Domain models, error types and configuration shared by every filescan crate.

pub mod config;
pub mod error;
pub mod models;
pub mod notify;

pub use config::{Config, InspectorKind};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use notify::{InfectionAlert, NotificationError, Notifier};
