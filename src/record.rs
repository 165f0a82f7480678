//! Materialized record values returned by reads and scans.

use crate::header::RAW_TYPE_TAG;

/// One record read back from the store.
///
/// The index is the record's address, not part of the on-disk frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub index: u64,
    pub timestamp_ms: i64,
    pub type_tag: u64,
    pub payload: Vec<u8>,
}

impl Record {
    /// True when the record was appended as raw bytes (type tag 0).
    pub fn is_raw(&self) -> bool {
        self.type_tag == RAW_TYPE_TAG
    }
}

/// A record decoded into a registered payload type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedRecord<T> {
    pub index: u64,
    pub timestamp_ms: i64,
    pub value: T,
}
