//! On-disk encoding of expert records.
//!
//! Layout of one record file:
//!
//! ```text
//! "XPRT" | version: u8 | flags: u8 | header_len: u32 LE | header (JSON) | body
//! ```
//!
//! The JSON header carries the id, the metadata map and the three payload
//! lengths, padded with spaces so the body starts on an 8-byte boundary.
//! The body is `gate ‖ up ‖ down`, zstd-compressed when flag bit 0 is set.
//! Uncompressed bodies are sliced out of the read buffer without copying.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::record::{ExpertRecord, ExpertWeights, Metadata};
use crate::config::CompressionConfig;

pub const MAGIC: &[u8; 4] = b"XPRT";
pub const FORMAT_VERSION: u8 = 1;

const FLAG_ZSTD: u8 = 0b0000_0001;
const PREAMBLE_LEN: usize = 4 + 1 + 1 + 4;
/// The header is space-padded so the body starts at this file offset multiple.
const BODY_ALIGN: usize = 8;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Zstd (de)compression failed: {0}")]
    Zstd(#[from] std::io::Error),

    #[error("Header is not valid JSON: {0}")]
    Header(#[from] serde_json::Error),

    #[error("Bad magic bytes (not an expert record)")]
    BadMagic,

    #[error("Unsupported record format version {0}")]
    UnsupportedVersion(u8),

    #[error("Record truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordHeader {
    id: String,
    #[serde(default)]
    metadata: Metadata,
    gate_len: usize,
    up_len: usize,
    down_len: usize,
}

/// Encodes and decodes expert records.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    config: CompressionConfig,
}

impl RecordCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    pub fn encode(&self, record: &ExpertRecord) -> Result<Bytes, CodecError> {
        let w = &record.weights;
        let mut header = serde_json::to_vec(&RecordHeader {
            id: record.id.clone(),
            metadata: record.metadata.clone(),
            gate_len: w.gate.len(),
            up_len: w.up.len(),
            down_len: w.down.len(),
        })?;
        let misalign = (PREAMBLE_LEN + header.len()) % BODY_ALIGN;
        if misalign != 0 {
            header.resize(header.len() + BODY_ALIGN - misalign, b' ');
        }

        let mut flags = 0u8;
        let compressed = if self.config.zstd_compression {
            flags |= FLAG_ZSTD;
            let mut raw = Vec::with_capacity(w.byte_len());
            raw.extend_from_slice(&w.gate);
            raw.extend_from_slice(&w.up);
            raw.extend_from_slice(&w.down);
            Some(zstd::encode_all(raw.as_slice(), self.config.zstd_level)?)
        } else {
            None
        };

        let body_len = compressed.as_ref().map_or(w.byte_len(), Vec::len);
        let mut out = BytesMut::with_capacity(PREAMBLE_LEN + header.len() + body_len);
        out.put_slice(MAGIC);
        out.put_u8(FORMAT_VERSION);
        out.put_u8(flags);
        out.put_u32_le(header.len() as u32);
        out.put_slice(&header);
        match compressed {
            Some(body) => out.put_slice(&body),
            None => {
                out.put_slice(&w.gate);
                out.put_slice(&w.up);
                out.put_slice(&w.down);
            }
        }
        Ok(out.freeze())
    }

    /// Decode a record. The compression flag stored in the file wins over
    /// the codec's own configuration, so files written with either setting
    /// stay readable.
    pub fn decode(&self, data: Bytes) -> Result<ExpertRecord, CodecError> {
        if data.len() < PREAMBLE_LEN {
            return Err(CodecError::Truncated {
                expected: PREAMBLE_LEN,
                actual: data.len(),
            });
        }
        if data[..4] != MAGIC[..] {
            return Err(CodecError::BadMagic);
        }
        let version = data[4];
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let flags = data[5];
        let header_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;

        let header_end = PREAMBLE_LEN + header_len;
        if data.len() < header_end {
            return Err(CodecError::Truncated {
                expected: header_end,
                actual: data.len(),
            });
        }
        let header: RecordHeader = serde_json::from_slice(&data[PREAMBLE_LEN..header_end])?;

        let body = if flags & FLAG_ZSTD != 0 {
            Bytes::from(zstd::decode_all(&data[header_end..])?)
        } else {
            data.slice(header_end..)
        };

        let expected = header.gate_len + header.up_len + header.down_len;
        if body.len() != expected {
            return Err(CodecError::Truncated {
                expected,
                actual: body.len(),
            });
        }

        let up_start = header.gate_len;
        let down_start = up_start + header.up_len;
        let weights = ExpertWeights {
            gate: body.slice(..up_start),
            up: body.slice(up_start..down_start),
            down: body.slice(down_start..),
        };

        Ok(ExpertRecord::new(header.id, weights, header.metadata))
    }
}
