//! expert-swap: LRU expert-weight swapper for mixture-of-experts inference.
//!
//! Keeps a bounded working set of expert weights in RAM and pages the rest
//! to disk:
//!   RAM (LRU, `max_memory_experts`) ↔ local disk (one file per expert)
//!
//! Evictions are written back asynchronously, and callers can prefetch
//! experts in the background before they are needed.

pub mod cache;
pub mod config;
pub mod metrics;
pub mod server;
pub mod transfer;
pub mod workload;
