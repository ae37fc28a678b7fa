//! Filescan Storage Library
//!
//! Byte storage for uploaded files. The `Storage` trait is what the upload
//! handler and the scan workers depend on; `LocalStorage` keeps files under a
//! base directory on disk.
//!
//! # Storage key format
//!
//! Keys are flat file names of the form `{unix_millis}-{original_name}`. The
//! original name is reduced to its final path component and stripped of
//! characters outside `[A-Za-z0-9._-]`. Keys must not contain `..` or a leading `/`.

pub(crate) mod keys;
pub mod local;
pub mod traits;

pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult};
