//! Segment file naming, discovery and frame scanning.
//!
//! The store keeps its records in rolling segment files, one file per
//! `logs_per_file` records. All functions here are stateless and operate on
//! paths or raw bytes, making them composable building blocks for the
//! appender and the reader.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::header::{RecordHeader, HEADER_SIZE};

/// Generate segment filename from ID (e.g., "000000042.q").
pub fn segment_filename(id: u64) -> String {
    format!("{:09}.q", id)
}

/// Get path to a segment file.
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(segment_filename(id))
}

/// Validate segment filename format.
///
/// Returns segment ID if valid, None otherwise.
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let base = name.strip_suffix(".q")?;

    // Must be exactly 9 digits
    if base.len() != 9 {
        return None;
    }

    if !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    base.parse::<u64>().ok()
}

/// Discover all segment IDs in a directory.
///
/// Returns sorted list of segment IDs found.
pub fn discover_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut segments = Vec::new();

    if !dir.exists() {
        return Ok(segments);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };

        if let Some(id) = parse_segment_filename(file_name) {
            segments.push(id);
        }
    }

    segments.sort_unstable();
    Ok(segments)
}

/// Result of walking the frames in a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentScan {
    /// Byte offset of each complete frame, in order.
    pub offsets: Vec<u64>,
    /// Byte offset one past the last complete frame.
    pub end_offset: u64,
    /// True when trailing bytes form a torn frame (length prefix past the
    /// end of the file). Such bytes are discarded on recovery.
    pub torn: bool,
}

/// Walk the frames in a segment's bytes.
///
/// Frames are self-delimiting, so the walk needs no side index: read a
/// header, skip the payload, repeat. The walk stops at the first frame whose
/// header or payload extends past the available bytes; everything before it
/// is intact.
pub fn scan_segment(bytes: &[u8]) -> SegmentScan {
    let mut offsets = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= bytes.len() {
        let header = match RecordHeader::read_from(&bytes[offset..]) {
            Ok(header) => header,
            Err(_) => break,
        };
        let end = offset + header.frame_len();
        if end > bytes.len() {
            break;
        }
        offsets.push(offset as u64);
        offset = end;
    }

    SegmentScan {
        offsets,
        end_offset: offset as u64,
        torn: offset < bytes.len(),
    }
}
