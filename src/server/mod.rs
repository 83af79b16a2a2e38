//! HTTP server exposing swapper statistics.
//!
//! - [`stats_api`]: Routes, handlers and response types

pub mod stats_api;
