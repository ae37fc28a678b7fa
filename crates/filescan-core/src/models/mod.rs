//! Data models shared by the queue, the worker pool and the HTTP surface.

mod file;
mod job;

pub use file::*;
pub use job::*;
