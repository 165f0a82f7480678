//! Store read path.
//!
//! `StoreReader` serves positional reads and header peeks over the segment
//! files. Segments are mapped read-only; the live segment's map is refreshed
//! when the file has grown past the mapped length. Because rolling is by
//! record count, a record's segment is just `index / logs_per_file`; the
//! byte offset within the segment comes from an offset table built lazily by
//! walking frame headers.
//!
//! Reads are bounded by the published write index the appender maintains:
//! `read` and `peek` return `Ok(None)` at or past it, so `Err(Corrupt)`
//! always means inconsistent bytes below the tip, never a merely
//! out-of-range index.
//!
//! The reader caches the most recently touched segment, which makes the
//! sequential scans the buffer issues cheap. It is not safe for concurrent
//! use; the store serializes access behind its reader lock.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::{Error, Result};
use crate::header::{decode_frame, RecordHeader, HEADER_SIZE};
use crate::segment::segment_path;

struct SegmentView {
    id: u64,
    mmap: Option<Mmap>,
    mapped_len: u64,
    /// Byte offset of each frame walked so far.
    offsets: Vec<u64>,
    /// Byte offset where the walk resumes.
    next_offset: u64,
}

impl SegmentView {
    fn new(id: u64) -> Self {
        Self {
            id,
            mmap: None,
            mapped_len: 0,
            offsets: Vec::new(),
            next_offset: 0,
        }
    }

    /// Extend the offset table until it covers `slot`. Only called for
    /// records below the published write index, whose frames are fully
    /// written.
    fn ensure_slot(&mut self, dir: &Path, slot: usize) -> Result<()> {
        while self.offsets.len() <= slot {
            let header = self.header_at(dir, self.next_offset)?;
            let end = self.next_offset + header.frame_len() as u64;
            if end > self.mapped_len {
                self.remap(dir)?;
                if end > self.mapped_len {
                    return Err(Error::Corrupt("record payload past end of segment"));
                }
            }
            self.offsets.push(self.next_offset);
            self.next_offset = end;
        }
        Ok(())
    }

    fn header_at(&mut self, dir: &Path, offset: u64) -> Result<RecordHeader> {
        let need = offset + HEADER_SIZE as u64;
        if need > self.mapped_len {
            self.remap(dir)?;
            if need > self.mapped_len {
                return Err(Error::Corrupt("record header past end of segment"));
            }
        }
        let mmap = self.mmap.as_ref().expect("mapped above");
        RecordHeader::read_from(&mmap[offset as usize..])
    }

    /// Refresh the mapping if the file has grown.
    fn remap(&mut self, dir: &Path) -> Result<()> {
        let path = segment_path(dir, self.id);
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len == self.mapped_len && self.mmap.is_some() {
            return Ok(());
        }
        if len == 0 {
            self.mmap = None;
            self.mapped_len = 0;
            return Ok(());
        }
        // SAFETY: segments are append-only and the store hands out only
        // indexes below the published write index, whose bytes are fully
        // written and never mutated afterwards.
        let mmap = unsafe { Mmap::map(&file)? };
        self.mapped_len = mmap.len() as u64;
        self.mmap = Some(mmap);
        Ok(())
    }

    fn peek(&self, slot: usize) -> Result<RecordHeader> {
        let offset = self.offsets[slot] as usize;
        let mmap = self.mmap.as_ref().ok_or(Error::Corrupt("segment not mapped"))?;
        RecordHeader::read_from(&mmap[offset..])
    }

    fn frame(&self, slot: usize) -> Result<(RecordHeader, Vec<u8>)> {
        let offset = self.offsets[slot] as usize;
        let mmap = self.mmap.as_ref().ok_or(Error::Corrupt("segment not mapped"))?;
        let (header, payload) = decode_frame(&mmap[offset..])?;
        Ok((header, payload.to_vec()))
    }
}

pub struct StoreReader {
    dir: PathBuf,
    logs_per_file: u64,
    /// Write index the appender has published; records below it are
    /// complete on disk.
    published: Arc<AtomicU64>,
    current: Option<SegmentView>,
}

impl StoreReader {
    pub fn new(dir: impl Into<PathBuf>, logs_per_file: u64, published: Arc<AtomicU64>) -> Self {
        Self {
            dir: dir.into(),
            logs_per_file,
            published,
            current: None,
        }
    }

    /// Read the header at `index` without materializing the payload.
    ///
    /// Returns `None` when `index` is at or past the write index.
    pub fn peek(&mut self, index: u64) -> Result<Option<RecordHeader>> {
        if index >= self.published.load(Ordering::Acquire) {
            return Ok(None);
        }
        let slot = self.seek(index)?;
        let header = self.current.as_ref().expect("seeked above").peek(slot)?;
        Ok(Some(header))
    }

    /// Read the full frame at `index`.
    ///
    /// Returns `None` when `index` is at or past the write index.
    pub fn read(&mut self, index: u64) -> Result<Option<(RecordHeader, Vec<u8>)>> {
        if index >= self.published.load(Ordering::Acquire) {
            return Ok(None);
        }
        let slot = self.seek(index)?;
        let frame = self.current.as_ref().expect("seeked above").frame(slot)?;
        Ok(Some(frame))
    }

    /// Position the cached segment view over `index`, returning the slot
    /// within the segment.
    fn seek(&mut self, index: u64) -> Result<usize> {
        let segment_id = index / self.logs_per_file;
        let slot = (index % self.logs_per_file) as usize;

        if self.current.as_ref().map(|view| view.id) != Some(segment_id) {
            self.current = Some(SegmentView::new(segment_id));
        }
        let view = self.current.as_mut().expect("view just set");
        view.ensure_slot(&self.dir, slot)?;
        Ok(slot)
    }
}
