//! Expert record types.
//!
//! An expert is the unit of movement between RAM and disk: three weight
//! payloads (gate, up, down projections) plus a small metadata map. Payloads
//! are reference-counted byte buffers, so the cache, an in-flight write-back
//! and the caller can all hold the same weights without copying them.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque expert identifier.
pub type ExpertId = String;

/// A single metadata value attached to an expert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

/// Expert metadata (layer index, quantization type, ...).
pub type Metadata = BTreeMap<String, MetaValue>;

/// The three weight payloads of an expert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpertWeights {
    pub gate: Bytes,
    pub up: Bytes,
    pub down: Bytes,
}

impl ExpertWeights {
    pub fn new(gate: impl Into<Bytes>, up: impl Into<Bytes>, down: impl Into<Bytes>) -> Self {
        Self {
            gate: gate.into(),
            up: up.into(),
            down: down.into(),
        }
    }

    /// Total payload size in bytes.
    pub fn byte_len(&self) -> usize {
        self.gate.len() + self.up.len() + self.down.len()
    }

    /// View a payload as a typed slice (e.g. `f32`, `half::f16`).
    ///
    /// Returns `None` if the payload length or alignment does not fit `T`.
    pub fn typed<T: bytemuck::Pod>(payload: &Bytes) -> Option<&[T]> {
        bytemuck::try_cast_slice(payload.as_ref()).ok()
    }
}

/// A registered expert: id, weights and metadata.
///
/// Immutable once built. Re-registering an id replaces the record as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpertRecord {
    pub id: ExpertId,
    pub weights: ExpertWeights,
    pub metadata: Metadata,
}

impl ExpertRecord {
    pub fn new(id: impl Into<ExpertId>, weights: ExpertWeights, metadata: Metadata) -> Self {
        Self {
            id: id.into(),
            weights,
            metadata,
        }
    }

    /// Build a record from typed weight slices, copying them once into
    /// shared buffers.
    pub fn from_slices<T: bytemuck::Pod>(
        id: impl Into<ExpertId>,
        gate: &[T],
        up: &[T],
        down: &[T],
        metadata: Metadata,
    ) -> Self {
        let weights = ExpertWeights::new(
            Bytes::copy_from_slice(bytemuck::cast_slice(gate)),
            Bytes::copy_from_slice(bytemuck::cast_slice(up)),
            Bytes::copy_from_slice(bytemuck::cast_slice(down)),
        );
        Self::new(id, weights, metadata)
    }

    /// Payload bytes held in memory for this record.
    pub fn byte_len(&self) -> usize {
        self.weights.byte_len()
    }
}

/// Records are shared between the cache, pending write-backs and callers.
pub type SharedRecord = Arc<ExpertRecord>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len() {
        let w = ExpertWeights::new(vec![0u8; 16], vec![0u8; 8], vec![0u8; 4]);
        assert_eq!(w.byte_len(), 28);
    }

    #[test]
    fn test_typed_view() {
        let rec = ExpertRecord::from_slices("e0", &[1.0f32, 2.0], &[3.0f32], &[4.0f32], Metadata::new());
        let gate = ExpertWeights::typed::<f32>(&rec.weights.gate).unwrap();
        assert_eq!(gate, &[1.0, 2.0]);
        assert_eq!(rec.byte_len(), 16);
    }

    #[test]
    fn test_metadata_untagged_json() {
        let mut meta = Metadata::new();
        meta.insert("layer".into(), 3i64.into());
        meta.insert("scale".into(), 0.5f64.into());
        meta.insert("dtype".into(), "f16".into());
        meta.insert("shared".into(), true.into());

        let json = serde_json::to_string(&meta).unwrap();
        assert_eq!(json, r#"{"dtype":"f16","layer":3,"scale":0.5,"shared":true}"#);

        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, meta);
    }
}
