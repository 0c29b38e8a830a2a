//! Record serializer: msgpack with conditional zstd compression.
//!
//! A one-byte framing prefix distinguishes the two on-disk forms:
//! `0x00` raw msgpack, `0x01` zstd-compressed msgpack. Records whose msgpack
//! form is at or below the threshold are stored raw.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};

pub const FRAME_RAW: u8 = 0x00;
pub const FRAME_ZSTD: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct Serializer {
    compression_min_bytes: usize,
    zstd_level: i32,
}

impl Serializer {
    pub fn new(compression_min_bytes: usize, zstd_level: i32) -> Self {
        Self { compression_min_bytes, zstd_level }
    }

    pub fn encode<T: Serialize>(&self, record: &T) -> CoreResult<Vec<u8>> {
        let raw = rmp_serde::to_vec(record)
            .map_err(|e| CoreError::CorruptRecord(format!("encode: {e}")))?;

        if raw.len() > self.compression_min_bytes {
            let compressed = zstd::bulk::compress(&raw, self.zstd_level)
                .map_err(|e| CoreError::CorruptRecord(format!("compress: {e}")))?;
            let mut out = Vec::with_capacity(compressed.len() + 1);
            out.push(FRAME_ZSTD);
            out.extend_from_slice(&compressed);
            Ok(out)
        } else {
            let mut out = Vec::with_capacity(raw.len() + 1);
            out.push(FRAME_RAW);
            out.extend_from_slice(&raw);
            Ok(out)
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CoreResult<T> {
        let (frame, body) = bytes
            .split_first()
            .ok_or_else(|| CoreError::CorruptRecord("empty record".into()))?;

        let raw = match *frame {
            FRAME_RAW => body.to_vec(),
            FRAME_ZSTD => zstd::stream::decode_all(body)
                .map_err(|e| CoreError::CorruptRecord(format!("decompress: {e}")))?,
            other => {
                return Err(CoreError::CorruptRecord(format!(
                    "unknown framing byte 0x{other:02x}"
                )))
            }
        };

        rmp_serde::from_slice(&raw).map_err(|e| CoreError::CorruptRecord(format!("decode: {e}")))
    }
}
