//! Expert caching.
//!
//! - [`record`]: ExpertRecord, weights and metadata
//! - [`pending`]: In-flight I/O table, one task per expert
//! - [`history`]: Bounded access and failure histories
//! - [`swapper`]: Orchestrates RAM ↔ disk movement

pub mod history;
pub mod pending;
pub mod record;
pub mod swapper;

pub use record::{ExpertId, ExpertRecord, ExpertWeights, MetaValue, Metadata, SharedRecord};
pub use swapper::{ExpertState, SwapError, Swapper};
