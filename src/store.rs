//! Segmented store facade.
//!
//! `SegmentedStore` presents the rolling segment files as one logical
//! append-only array of framed records addressed by a 64-bit index. It owns
//! the concurrency contract:
//!
//! - one logical appender, behind the appender mutex;
//! - one logical reader, behind the reader mutex (the underlying reader's
//!   segment cache is not safe for concurrent positional reads);
//! - appends and reads progress independently. A reader that needs a
//!   consistent upper bound must take a `write_index()` snapshot, which goes
//!   through the appender mutex.
//!
//! The appender publishes the write index through a shared atomic, still
//! under its lock and only after the frame bytes are in the file, so any
//! index the reader accepts is fully written.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::reader::StoreReader;
use crate::writer::StoreAppender;

pub struct SegmentedStore {
    appender: Mutex<StoreAppender>,
    reader: Mutex<StoreReader>,
    /// Write index visible to readers; see the module docs.
    published: Arc<AtomicU64>,
    closed: AtomicBool,
}

impl SegmentedStore {
    /// Open (or create) a store over `dir`.
    ///
    /// Reopening a directory yields a store with the same write index and
    /// record contents; a torn final frame from a crash is discarded.
    pub fn open(dir: &Path, logs_per_file: u64, sync_on_write: bool) -> Result<Self> {
        let appender = StoreAppender::open(dir, logs_per_file, sync_on_write)?;
        let published = Arc::new(AtomicU64::new(appender.write_index()));
        let reader = StoreReader::new(dir, logs_per_file, Arc::clone(&published));
        Ok(Self {
            appender: Mutex::new(appender),
            reader: Mutex::new(reader),
            published,
            closed: AtomicBool::new(false),
        })
    }

    /// Append one framed record, returning its assigned index.
    pub fn append(&self, frame: &[u8]) -> Result<u64> {
        self.check_open()?;
        let mut appender = self.lock_appender()?;
        let index = appender.append(frame)?;
        self.published.store(index + 1, Ordering::Release);
        Ok(index)
    }

    /// The next index that will be assigned.
    ///
    /// Takes the appender mutex so the returned value is a consistent upper
    /// bound for a subsequent scan.
    pub fn write_index(&self) -> Result<u64> {
        self.check_open()?;
        let appender = self.lock_appender()?;
        Ok(appender.write_index())
    }

    /// Acquire the reader for a scan. The lock is held for the guard's
    /// lifetime, serializing whole scans rather than individual reads.
    pub fn reader(&self) -> Result<MutexGuard<'_, StoreReader>> {
        self.check_open()?;
        self.reader
            .lock()
            .map_err(|_| Error::Corrupt("store reader lock poisoned"))
    }

    /// Flush and release file handles. Idempotent; later operations fail
    /// with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut appender = self
            .appender
            .lock()
            .map_err(|_| Error::Corrupt("store appender lock poisoned"))?;
        appender.close()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn lock_appender(&self) -> Result<MutexGuard<'_, StoreAppender>> {
        self.appender
            .lock()
            .map_err(|_| Error::Corrupt("store appender lock poisoned"))
    }
}
