//! Tails: named durable read cursors with delivery callbacks.
//!
//! A tail is registered under a caller-supplied name (names key the on-disk
//! cursor, so they must be stable across runs) and receives batches of
//! records through `process`. The cursor advances only after `process`
//! returns success; a failing callback sees the same records again next
//! round, plus anything written in between. That is the at-least-once
//! contract.
//!
//! Two delivery policies exist: the default whole-backlog round hands over
//! everything between the cursor and the write index; the chunked round
//! delivers fixed wall-clock windows aligned on `chunk_ms` boundaries and
//! never processes a window that has not closed yet.

use std::any::TypeId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::buffer::BufferCore;
use crate::cursor::TailCursor;
use crate::error::{Error, Result};
use crate::record::Record;

/// Error type surfaced by tail callbacks.
pub type TailError = Box<dyn std::error::Error + Send + Sync>;

/// A delivery callback with a stable identity.
pub trait Tail: Send + Sync + 'static {
    /// Stable name; keys the durable cursor and the registration.
    fn name(&self) -> &str;

    /// Restrict delivery to records of one registered payload type.
    /// `None` delivers every record.
    fn type_filter(&self) -> Option<TypeId> {
        None
    }

    /// Handle one batch. Returning an error leaves the cursor untouched and
    /// the batch is redelivered on the next round.
    fn process(&self, batch: &[Record]) -> std::result::Result<(), TailError>;
}

/// Outcome of one delivery round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ForwardResult {
    /// True when the round consumed everything written so far. Scheduled
    /// tails that have not reached the tip are re-run immediately.
    pub reached_tip: bool,
}

/// Closure-backed tail.
pub struct FnTail<F> {
    name: String,
    filter: Option<TypeId>,
    process: F,
}

impl<F> FnTail<F>
where
    F: Fn(&[Record]) -> std::result::Result<(), TailError> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, process: F) -> Self {
        Self {
            name: name.into(),
            filter: None,
            process,
        }
    }

    /// A tail that only sees records of the registered type `T`.
    pub fn of_type<T: 'static>(name: impl Into<String>, process: F) -> Self {
        Self {
            name: name.into(),
            filter: Some(TypeId::of::<T>()),
            process,
        }
    }
}

impl<F> Tail for FnTail<F>
where
    F: Fn(&[Record]) -> std::result::Result<(), TailError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn type_filter(&self) -> Option<TypeId> {
        self.filter
    }

    fn process(&self, batch: &[Record]) -> std::result::Result<(), TailError> {
        (self.process)(batch)
    }
}

/// Delivery policy of a registered tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TailMode {
    Backlog,
    Chunked { chunk_ms: i64 },
}

/// Per-tail state: the durable cursor plus the delivery policy.
pub(crate) struct TailRunner {
    tail: Arc<dyn Tail>,
    cursor: TailCursor,
    mode: TailMode,
}

impl TailRunner {
    pub(crate) fn new(tail: Arc<dyn Tail>, cursor: TailCursor, mode: TailMode) -> Self {
        Self { tail, cursor, mode }
    }

    pub(crate) fn read_index(&self) -> u64 {
        self.cursor.get()
    }

    /// Run one delivery round.
    ///
    /// A panicking callback is contained here and surfaces as a normal
    /// `TailFailure`: the buffer holds this runner behind a mutex, and an
    /// unwind through that guard would poison it and wedge the tail for
    /// good. The cursor is untouched either way, so the panicking batch is
    /// redelivered next round.
    pub(crate) fn run_round(&mut self, core: &BufferCore) -> Result<ForwardResult> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.dispatch(core)));
        match outcome {
            Ok(result) => result,
            Err(payload) => Err(Error::TailFailure {
                tail: self.tail.name().to_string(),
                source: panic_message(&payload).into(),
            }),
        }
    }

    fn dispatch(&mut self, core: &BufferCore) -> Result<ForwardResult> {
        match self.mode {
            TailMode::Backlog => self.backlog_round(core),
            TailMode::Chunked { chunk_ms } => self.chunked_round(core, chunk_ms),
        }
    }

    /// Deliver everything between the cursor and the write index, then
    /// advance the cursor to the write index.
    fn backlog_round(&mut self, core: &BufferCore) -> Result<ForwardResult> {
        let from = self.cursor.get();
        let to = core.write_index()?;
        if from >= to {
            return Ok(ForwardResult { reached_tip: true });
        }

        let batch = core.collect_range(from, to, self.tail.type_filter())?;
        self.deliver(&batch)?;
        self.cursor.set(to)?;
        Ok(ForwardResult { reached_tip: true })
    }

    /// Deliver one closed `chunk_ms`-aligned window starting at the first
    /// unconsumed record, then advance the cursor past the window.
    ///
    /// The window is anchored on the first record's timestamp, not on the
    /// current time, so a tail that is far behind still walks history one
    /// window at a time. A window whose end is still in the future is left
    /// alone; no partial windows are ever delivered.
    fn chunked_round(&mut self, core: &BufferCore, chunk_ms: i64) -> Result<ForwardResult> {
        let from = self.cursor.get();
        let latest = match core.latest()? {
            Some(latest) => latest,
            None => return Ok(ForwardResult { reached_tip: true }),
        };
        let to = core.write_index()?;
        if from >= to {
            return Ok(ForwardResult { reached_tip: true });
        }

        let first_ts = match core.peek_timestamp(from)? {
            Some(timestamp) => timestamp,
            None => return Ok(ForwardResult { reached_tip: true }),
        };
        let window_start = first_ts - first_ts % chunk_ms;
        let window_end = window_start + chunk_ms - 1;
        if window_end > core.now_ms() {
            // Window still open; nothing is consumed until it closes.
            return Ok(ForwardResult { reached_tip: true });
        }

        let (batch, end_cursor) =
            core.collect_window(from, to, window_end, self.tail.type_filter())?;
        self.deliver(&batch)?;
        self.cursor.set(end_cursor)?;

        let reached_tip = match batch.last() {
            Some(record) => record.timestamp_ms >= latest.timestamp_ms,
            None => end_cursor >= to,
        };
        Ok(ForwardResult { reached_tip })
    }

    fn deliver(&self, batch: &[Record]) -> Result<()> {
        self.tail.process(batch).map_err(|source| Error::TailFailure {
            tail: self.tail.name().to_string(),
            source,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("callback panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("callback panicked: {message}")
    } else {
        "callback panicked".to_string()
    }
}
