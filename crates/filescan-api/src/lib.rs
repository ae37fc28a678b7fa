//! Filescan API Library
//!
//! HTTP surface for uploading files and polling their scan status, plus the
//! startup wiring that connects the metadata store, job queue and worker pool.

mod handlers;

pub mod error;
pub mod setup;
pub mod state;

pub use error::HttpAppError;
pub use state::AppState;
