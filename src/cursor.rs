//! Durable per-tail read cursors.
//!
//! Each tail owns a tiny append-only store under `tails/<name>/`: every
//! cursor update appends a fixed 8-byte big-endian index to the `cursor`
//! file, and recovery reads the last complete entry (0 when the file is
//! empty). A torn trailing entry from a crash is ignored, which yields the
//! at-least-once redelivery contract: a crash between record delivery and
//! cursor persistence replays from the previous cursor.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

const ENTRY_SIZE: u64 = 8;
const CURSOR_FILE: &str = "cursor";

pub struct TailCursor {
    file: File,
    current: u64,
    sync_on_write: bool,
}

impl TailCursor {
    /// Open (or create) the cursor store for `name` under `tails_dir`.
    pub fn open(tails_dir: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        validate_name(name)?;
        let dir = tails_dir.join(name);
        std::fs::create_dir_all(&dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join(CURSOR_FILE))?;

        let len = file.metadata()?.len();
        let entries = len / ENTRY_SIZE;
        let current = if entries == 0 {
            0
        } else {
            let mut buf = [0u8; ENTRY_SIZE as usize];
            file.seek(SeekFrom::Start((entries - 1) * ENTRY_SIZE))?;
            file.read_exact(&mut buf)?;
            u64::from_be_bytes(buf)
        };

        Ok(Self {
            file,
            current,
            sync_on_write,
        })
    }

    /// The next index to deliver.
    pub fn get(&self) -> u64 {
        self.current
    }

    /// Persist a new cursor position.
    pub fn set(&mut self, index: u64) -> Result<()> {
        self.file.write_all(&index.to_be_bytes())?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.current = index;
        Ok(())
    }
}

/// Tail names become directory names, so they must be plain path segments.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("tail name is empty"));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidArgument("tail name is not a plain path segment"));
    }
    Ok(())
}
