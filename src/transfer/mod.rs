//! Data transfer between RAM and disk.
//!
//! - [`codec`]: On-disk record format with optional zstd compression
//! - [`disk_store`]: One-file-per-expert durable store
//! - [`executor`]: Where background I/O runs
//! - [`task`]: Handles to background I/O results

pub mod codec;
pub mod disk_store;
pub mod executor;
pub mod task;
