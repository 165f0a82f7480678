//! Record frame codec.
//!
//! Every record is stored as a fixed 20-byte header followed by the payload:
//!
//! ```text
//! offset 0  : u64 type tag      (0 = raw bytes, no decoder)
//! offset 8  : i64 timestamp_ms
//! offset 16 : u32 payload length
//! offset 20 : payload
//! ```
//!
//! All header fields are little-endian. Frames are self-delimiting, so a
//! segment file is just a run of frames with no framing of its own. Scans
//! that only need the type tag or timestamp read the header alone and skip
//! the payload.

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 20;
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// Type tag of records appended as raw bytes.
pub const RAW_TYPE_TAG: u64 = 0;

pub const TYPE_OFFSET: usize = 0;
pub const TIMESTAMP_OFFSET: usize = 8;
pub const LEN_OFFSET: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub type_tag: u64,
    pub timestamp_ms: i64,
    pub payload_len: u32,
}

impl RecordHeader {
    pub fn new(type_tag: u64, timestamp_ms: i64, payload_len: usize) -> Result<Self> {
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidArgument("payload exceeds maximum length"));
        }
        Ok(Self {
            type_tag,
            timestamp_ms,
            payload_len: payload_len as u32,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[TYPE_OFFSET..TYPE_OFFSET + 8].copy_from_slice(&self.type_tag.to_le_bytes());
        buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
            .copy_from_slice(&self.timestamp_ms.to_le_bytes());
        buf[LEN_OFFSET..LEN_OFFSET + 4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    /// Parse a header from the front of `bytes` without touching the payload.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Corrupt("frame shorter than header"));
        }
        let type_tag = u64::from_le_bytes(
            bytes[TYPE_OFFSET..TYPE_OFFSET + 8]
                .try_into()
                .expect("slice length"),
        );
        let timestamp_ms = i64::from_le_bytes(
            bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
                .try_into()
                .expect("slice length"),
        );
        let payload_len = u32::from_le_bytes(
            bytes[LEN_OFFSET..LEN_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        if payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(Error::Corrupt("payload length out of range"));
        }
        Ok(Self {
            type_tag,
            timestamp_ms,
            payload_len,
        })
    }

    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// Frame a record for appending.
pub fn encode_frame(type_tag: u64, timestamp_ms: i64, payload: &[u8]) -> Result<Vec<u8>> {
    let header = RecordHeader::new(type_tag, timestamp_ms, payload.len())?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a frame back into header and payload.
///
/// Fails with `Corrupt` when the length prefix disagrees with the bytes
/// actually present.
pub fn decode_frame(bytes: &[u8]) -> Result<(RecordHeader, &[u8])> {
    let header = RecordHeader::read_from(bytes)?;
    let end = header.frame_len();
    if bytes.len() < end {
        return Err(Error::Corrupt("payload length past end of frame"));
    }
    Ok((header, &bytes[HEADER_SIZE..end]))
}
