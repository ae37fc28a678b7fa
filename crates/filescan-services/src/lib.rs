//! Filescan Services Layer
//!
//! Inspection capabilities the scan workers run against uploaded bytes. The
//! keyword inspector is always available; the ClamAV inspector is behind the
//! `clamav` feature.

pub mod inspect;

#[cfg(feature = "clamav")]
pub use inspect::ClamAvInspector;
pub use inspect::{classify, Classification, InspectionError, Inspector, KeywordInspector};
