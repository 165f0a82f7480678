//! Store append path.
//!
//! `StoreAppender` owns the live segment file and assigns indexes. Segments
//! roll by record count: once `logs_per_file` records are in the live
//! segment, the next append opens the successor. Sealed segments are never
//! written again, which is what lets the reader map them read-only.
//!
//! Recovery on open walks the highest segment and truncates a torn final
//! frame (a crash mid-append leaves a length prefix pointing past the end of
//! the file). A failed append never advances the write index.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::segment::{discover_segments, scan_segment, segment_path};

pub const DEFAULT_LOGS_PER_FILE: u64 = 32767;

pub struct StoreAppender {
    /// Directory containing segments
    dir: PathBuf,
    /// Records per segment before rolling
    logs_per_file: u64,
    /// fsync after every append
    sync_on_write: bool,
    /// Live segment ID
    segment_id: u64,
    /// Records already in the live segment
    records_in_segment: u64,
    /// Byte length of the live segment's intact frames
    byte_offset: u64,
    /// Live segment handle, created lazily on first append
    file: Option<File>,
    /// Next index to assign
    write_index: u64,
}

impl StoreAppender {
    /// Open the appender over `dir`, recovering state from existing
    /// segments.
    ///
    /// Every segment below the highest is full by construction, so only the
    /// highest needs walking. A torn final frame is truncated away.
    pub fn open(dir: impl Into<PathBuf>, logs_per_file: u64, sync_on_write: bool) -> Result<Self> {
        if logs_per_file == 0 {
            return Err(Error::InvalidArgument("logs_per_file must be positive"));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let segments = discover_segments(&dir)?;
        let (segment_id, records_in_segment, byte_offset) = match segments.last() {
            None => (0, 0, 0),
            Some(&last) => {
                let path = segment_path(&dir, last);
                let bytes = std::fs::read(&path)?;
                let scan = scan_segment(&bytes);
                if scan.torn {
                    let file = OpenOptions::new().write(true).open(&path)?;
                    file.set_len(scan.end_offset)?;
                    file.sync_data()?;
                }
                let count = scan.offsets.len() as u64;
                if count > logs_per_file {
                    return Err(Error::Corrupt("segment holds more records than logs_per_file"));
                }
                (last, count, scan.end_offset)
            }
        };

        let write_index = segment_id
            .checked_mul(logs_per_file)
            .and_then(|base| base.checked_add(records_in_segment))
            .ok_or(Error::Corrupt("write index overflow"))?;

        Ok(Self {
            dir,
            logs_per_file,
            sync_on_write,
            segment_id,
            records_in_segment,
            byte_offset,
            file: None,
            write_index,
        })
    }

    /// The next index that will be assigned; equivalently, the record count.
    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Append one framed record, returning its assigned index.
    ///
    /// The frame reaches the OS page cache before this returns; with
    /// `sync_on_write` it is fsync'd as well. On a write error the segment
    /// is restored to its pre-append length so the failed frame leaves no
    /// torn bytes behind.
    pub fn append(&mut self, frame: &[u8]) -> Result<u64> {
        use std::io::Write;

        if self.records_in_segment == self.logs_per_file {
            self.roll()?;
        }

        let restore_len = self.byte_offset;
        let sync_on_write = self.sync_on_write;
        let file = self.ensure_file()?;
        if let Err(err) = file.write_all(frame) {
            let _ = file.set_len(restore_len);
            return Err(Error::Io(err));
        }
        if sync_on_write {
            file.sync_data()?;
        }

        let index = self.write_index;
        self.write_index += 1;
        self.records_in_segment += 1;
        self.byte_offset += frame.len() as u64;
        Ok(index)
    }

    /// Flush the live segment to disk.
    pub fn sync(&mut self) -> Result<()> {
        if let Some(file) = &self.file {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Release the live segment handle after a final flush. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn roll(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_data()?;
        }
        self.segment_id += 1;
        self.records_in_segment = 0;
        self.byte_offset = 0;
        Ok(())
    }

    fn ensure_file(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let path = segment_path(&self.dir, self.segment_id);
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("file just ensured"))
    }
}
