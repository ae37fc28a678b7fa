//! Webhook delivery of infection alerts

pub mod notifier;

pub use notifier::{WebhookNotifier, WebhookNotifierConfig, SIGNATURE_HEADER};
