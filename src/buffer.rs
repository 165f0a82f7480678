//! Log buffer orchestration.
//!
//! `LogBuffer` ties the segmented store, the serializer registry, the clock
//! and the tail subsystem together. Appends assign dense indexes and
//! non-decreasing millisecond timestamps; reads come back by index range,
//! time range or payload type; tails deliver new records to callbacks with
//! durable, advance-on-success cursors.
//!
//! # Example
//!
//! ```no_run
//! use logbuffer::LogBufferOptions;
//!
//! let buffer = LogBufferOptions::new("./audit-log").open()?;
//! let record = buffer.write(b"hello")?;
//! let records = buffer.select(0, record.index + 1)?;
//! buffer.close()?;
//! # Ok::<(), logbuffer::Error>(())
//! ```
//!
//! # Concurrency
//!
//! Appends serialize behind one writer mutex (which also owns the
//! last-written-timestamp high-water mark); scans serialize behind the
//! store's reader mutex and hold it for the whole scan. The two never block
//! each other, so a scan concurrent with an append may or may not observe
//! it. Callers needing a consistent upper bound take `write_index()` first.

use std::any::TypeId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::cursor::TailCursor;
use crate::date_range::DateRange;
use crate::error::{Error, Result};
use crate::header::{encode_frame, RAW_TYPE_TAG};
use crate::record::{Record, TypedRecord};
use crate::registry::{Serializer, SerializerRegistry};
use crate::scheduler::{Scheduler, TaskFlags, TaskFn};
use crate::store::SegmentedStore;
use crate::tail::{ForwardResult, Tail, TailMode, TailRunner};
use crate::writer::DEFAULT_LOGS_PER_FILE;

/// Configuration for a [`LogBuffer`].
pub struct LogBufferOptions {
    base_path: PathBuf,
    logs_per_file: u64,
    sync_on_write: bool,
    date_range: DateRange,
    registry: SerializerRegistry,
    clock: Box<dyn Clock>,
}

impl Default for LogBufferOptions {
    fn default() -> Self {
        Self {
            base_path: std::env::temp_dir().join("logbuffer"),
            logs_per_file: DEFAULT_LOGS_PER_FILE,
            sync_on_write: false,
            date_range: DateRange::default(),
            registry: SerializerRegistry::new(),
            clock: Box::new(SystemClock),
        }
    }
}

impl LogBufferOptions {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Default::default()
        }
    }

    /// Records per segment file before rolling. Default 32767.
    pub fn logs_per_file(mut self, logs_per_file: u64) -> Self {
        self.logs_per_file = logs_per_file;
        self
    }

    /// fsync after every append (and every cursor update). Default off:
    /// appends still reach the OS page cache before returning.
    pub fn sync_on_write(mut self, sync_on_write: bool) -> Self {
        self.sync_on_write = sync_on_write;
        self
    }

    /// Interval granularity for bucket naming and chunk alignment.
    pub fn date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    /// Register a payload serializer.
    pub fn serializer(mut self, serializer: Arc<dyn Serializer>) -> Result<Self> {
        self.registry.register(serializer)?;
        Ok(self)
    }

    /// Replace the timestamp source. Default [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn open(self) -> Result<LogBuffer> {
        LogBuffer::open(self)
    }
}

struct AppendState {
    /// Timestamp high-water mark; assigned timestamps never go below it
    /// even when the wall clock jumps back.
    last_written_ms: i64,
}

struct TailEntry {
    runner: Arc<Mutex<TailRunner>>,
    /// Present while a scheduled task exists for this tail.
    flags: Option<Arc<TaskFlags>>,
}

/// Shared buffer state. Tails and scheduled tasks hold this through
/// non-owning references; the close path cancels all tails before the store
/// goes away.
pub(crate) struct BufferCore {
    store: SegmentedStore,
    registry: SerializerRegistry,
    clock: Box<dyn Clock>,
    date_range: DateRange,
    tails_dir: PathBuf,
    sync_on_write: bool,
    append_state: Mutex<AppendState>,
    tails: Mutex<HashMap<String, TailEntry>>,
    scheduler: Mutex<Option<Arc<Scheduler>>>,
    closed: AtomicBool,
}

enum TagFilter<'a> {
    All,
    Tags(&'a [u64]),
}

impl TagFilter<'_> {
    fn matches(&self, tag: u64) -> bool {
        match self {
            TagFilter::All => true,
            TagFilter::Tags(tags) => tags.contains(&tag),
        }
    }
}

impl BufferCore {
    pub(crate) fn write_index(&self) -> Result<u64> {
        self.store.write_index()
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    fn tag_filter(&self, filter: Option<TypeId>) -> TagFilter<'_> {
        match filter {
            None => TagFilter::All,
            // `Record` is the raw projection: every record qualifies.
            Some(type_id) if type_id == TypeId::of::<Record>() => TagFilter::All,
            Some(type_id) => TagFilter::Tags(self.registry.tags_for(type_id)),
        }
    }

    /// Records in `[from, to)`, optionally restricted to a payload type.
    /// Headers are peeked first so filtered-out payloads are never
    /// materialized. Corruption truncates the scan cleanly.
    pub(crate) fn collect_range(
        &self,
        from: u64,
        to: u64,
        filter: Option<TypeId>,
    ) -> Result<Vec<Record>> {
        let tag_filter = self.tag_filter(filter);
        let mut reader = self.store.reader()?;
        let mut out = Vec::new();
        for index in from..to {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if !tag_filter.matches(header.type_tag) {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            out.push(Record {
                index,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            });
        }
        Ok(out)
    }

    /// Records in `[from, to)` whose timestamp is at most `window_end_ms`,
    /// plus the cursor position one past the last record inside the window
    /// (matching the filter or not; the window is consumed as a whole).
    pub(crate) fn collect_window(
        &self,
        from: u64,
        to: u64,
        window_end_ms: i64,
        filter: Option<TypeId>,
    ) -> Result<(Vec<Record>, u64)> {
        let tag_filter = self.tag_filter(filter);
        let mut reader = self.store.reader()?;
        let mut out = Vec::new();
        let mut end_cursor = from;
        for index in from..to {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if header.timestamp_ms > window_end_ms {
                break;
            }
            end_cursor = index + 1;
            if !tag_filter.matches(header.type_tag) {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            out.push(Record {
                index,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            });
        }
        Ok((out, end_cursor))
    }

    /// Timestamp of the record at `index`, header only. `None` at or past
    /// the write index.
    pub(crate) fn peek_timestamp(&self, index: u64) -> Result<Option<i64>> {
        let mut reader = self.store.reader()?;
        Ok(reader.peek(index)?.map(|header| header.timestamp_ms))
    }

    /// The most recently appended record, if any.
    pub(crate) fn latest(&self) -> Result<Option<Record>> {
        let tip = self.store.write_index()?;
        if tip == 0 {
            return Ok(None);
        }
        let mut reader = self.store.reader()?;
        match reader.read(tip - 1)? {
            Some((header, payload)) => Ok(Some(Record {
                index: tip - 1,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            })),
            None => Ok(None),
        }
    }

    fn scheduler_handle(&self) -> Result<Arc<Scheduler>> {
        let mut guard = self
            .scheduler
            .lock()
            .map_err(|_| Error::Corrupt("scheduler lock poisoned"))?;
        if guard.is_none() {
            *guard = Some(Arc::new(Scheduler::new()?));
        }
        Ok(Arc::clone(guard.as_ref().expect("scheduler just created")))
    }
}

/// Embedded, single-process, append-only log store.
pub struct LogBuffer {
    core: Arc<BufferCore>,
}

impl LogBuffer {
    pub fn open(options: LogBufferOptions) -> Result<Self> {
        let data_dir = options.base_path.join("data");
        let tails_dir = options.base_path.join("tails");
        let store = SegmentedStore::open(&data_dir, options.logs_per_file, options.sync_on_write)?;

        // Restore the timestamp high-water mark so a wall clock running
        // behind the previous process cannot produce out-of-order
        // timestamps after reopen.
        let last_written_ms = {
            let tip = store.write_index()?;
            if tip == 0 {
                i64::MIN
            } else {
                match store.reader()?.peek(tip - 1)? {
                    Some(header) => header.timestamp_ms,
                    None => i64::MIN,
                }
            }
        };

        let core = Arc::new(BufferCore {
            store,
            registry: options.registry,
            clock: options.clock,
            date_range: options.date_range,
            tails_dir,
            sync_on_write: options.sync_on_write,
            append_state: Mutex::new(AppendState { last_written_ms }),
            tails: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        Ok(Self { core })
    }

    /// Append raw bytes (type tag 0), returning the stored record with its
    /// assigned index and timestamp.
    pub fn write(&self, payload: &[u8]) -> Result<Record> {
        self.append_frame(RAW_TYPE_TAG, payload)
    }

    /// Append a registered payload type through its serializer.
    pub fn write_value<T: 'static>(&self, value: &T) -> Result<Record> {
        let (tag, payload) = self.core.registry.encode_value(value)?;
        self.append_frame(tag, &payload)
    }

    fn append_frame(&self, type_tag: u64, payload: &[u8]) -> Result<Record> {
        self.ensure_open()?;
        let mut state = self
            .core
            .append_state
            .lock()
            .map_err(|_| Error::Corrupt("append lock poisoned"))?;
        let timestamp_ms = self.core.clock.now_ms().max(state.last_written_ms);
        let frame = encode_frame(type_tag, timestamp_ms, payload)?;
        let index = self.core.store.append(&frame)?;
        state.last_written_ms = timestamp_ms;
        Ok(Record {
            index,
            timestamp_ms,
            type_tag,
            payload: payload.to_vec(),
        })
    }

    /// Records with indexes in `[from_index, to_index)`. The range is
    /// clamped at the write index; `select(i, i)` is empty.
    pub fn select(&self, from_index: u64, to_index: u64) -> Result<Vec<Record>> {
        self.ensure_open()?;
        if from_index > to_index {
            return Err(Error::InvalidArgument("from index greater than to index"));
        }
        let to = to_index.min(self.core.write_index()?);
        if from_index >= to {
            return Ok(Vec::new());
        }
        self.core.collect_range(from_index, to, None)
    }

    /// Records with `timestamp ∈ [from_ms, to_ms]`, ascending, scanning
    /// forward from index 0. Timestamp monotonicity lets the scan stop at
    /// the first record past `to_ms`.
    pub fn select_forward(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Record>> {
        self.select_forward_from(0, from_ms, to_ms)
    }

    /// Like [`select_forward`](Self::select_forward), but the scan starts
    /// at `start_index`. Useful when the caller already holds a lower
    /// bound, e.g. a tail cursor.
    pub fn select_forward_from(
        &self,
        start_index: u64,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        if from_ms > to_ms {
            return Err(Error::InvalidArgument("from time after to time"));
        }
        let tip = self.core.write_index()?;
        let mut reader = self.core.store.reader()?;
        let mut out = Vec::new();
        for index in start_index..tip {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if header.timestamp_ms > to_ms {
                break;
            }
            if header.timestamp_ms < from_ms {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            out.push(Record {
                index,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            });
        }
        Ok(out)
    }

    /// Records with `timestamp ∈ [from_ms, to_ms]`, scanning backward from
    /// the tip and stopping at the first record before `from_ms`. The
    /// result is ascending. Preferable when the range sits near the tip.
    pub fn select_backward(&self, from_ms: i64, to_ms: i64) -> Result<Vec<Record>> {
        self.ensure_open()?;
        if from_ms > to_ms {
            return Err(Error::InvalidArgument("from time after to time"));
        }
        let tip = self.core.write_index()?;
        let mut reader = self.core.store.reader()?;
        let mut out = Vec::new();
        for index in (0..tip).rev() {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if header.timestamp_ms < from_ms {
                break;
            }
            if header.timestamp_ms > to_ms {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            out.push(Record {
                index,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            });
        }
        out.reverse();
        Ok(out)
    }

    /// Decoded records of type `T` with indexes in `[from_index,
    /// to_index)`.
    ///
    /// Raw records (tag 0) are skipped unless `T` is [`Record`] itself,
    /// which is the raw projection and yields every record undecoded. A
    /// non-zero tag with no registered serializer aborts the scan with
    /// `MissingDecoder`; tags registered to other types are skipped from
    /// their headers alone.
    pub fn select_typed<T: 'static>(
        &self,
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<TypedRecord<T>>> {
        self.ensure_open()?;
        if from_index > to_index {
            return Err(Error::InvalidArgument("from index greater than to index"));
        }
        let to = to_index.min(self.core.write_index()?);
        if from_index >= to {
            return Ok(Vec::new());
        }

        if TypeId::of::<T>() == TypeId::of::<Record>() {
            let records = self.core.collect_range(from_index, to, None)?;
            return Ok(records.into_iter().map(raw_typed).collect());
        }

        let mut reader = self.core.store.reader()?;
        let mut out = Vec::new();
        for index in from_index..to {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if !self.classify::<T>(header.type_tag)? {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            let value = self.core.registry.decode_value::<T>(header.type_tag, &payload)?;
            out.push(TypedRecord {
                index,
                timestamp_ms: header.timestamp_ms,
                value,
            });
        }
        Ok(out)
    }

    /// The first record at or after `from_index` whose payload decodes as
    /// `T`, found by scanning headers only.
    pub fn next_of_type<T: 'static>(&self, from_index: u64) -> Result<Option<TypedRecord<T>>> {
        self.ensure_open()?;
        let tip = self.core.write_index()?;
        let raw = TypeId::of::<T>() == TypeId::of::<Record>();
        let mut reader = self.core.store.reader()?;
        for index in from_index..tip {
            let header = match reader.peek(index) {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            if !raw && !self.classify::<T>(header.type_tag)? {
                continue;
            }
            let (header, payload) = match reader.read(index) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(Error::Corrupt(_)) => break,
                Err(err) => return Err(err),
            };
            let record = Record {
                index,
                timestamp_ms: header.timestamp_ms,
                type_tag: header.type_tag,
                payload,
            };
            if raw {
                return Ok(Some(raw_typed(record)));
            }
            let value = self.core.registry.decode_record::<T>(&record)?;
            return Ok(Some(TypedRecord {
                index,
                timestamp_ms: record.timestamp_ms,
                value,
            }));
        }
        Ok(None)
    }

    /// Whether a tag belongs to `T`'s registered tag set. Raw records never
    /// match a concrete type; an unregistered non-zero tag is an error.
    fn classify<T: 'static>(&self, tag: u64) -> Result<bool> {
        if tag == RAW_TYPE_TAG {
            return Ok(false);
        }
        if self.core.registry.tags_for(TypeId::of::<T>()).contains(&tag) {
            return Ok(true);
        }
        if self.core.registry.by_tag(tag).is_none() {
            return Err(Error::MissingDecoder(tag));
        }
        Ok(false)
    }

    /// The most recently appended record, if any.
    pub fn latest(&self) -> Result<Option<Record>> {
        self.ensure_open()?;
        self.core.latest()
    }

    /// The next index that will be assigned; equivalently, the record
    /// count.
    pub fn write_index(&self) -> Result<u64> {
        self.ensure_open()?;
        self.core.write_index()
    }

    /// The registered serializers.
    pub fn registry(&self) -> &SerializerRegistry {
        &self.core.registry
    }

    /// The configured bucket granularity.
    pub fn date_range(&self) -> DateRange {
        self.core.date_range
    }

    /// Register `tail` if its name is new, then synchronously run one
    /// whole-backlog delivery round. A failing callback surfaces as
    /// `TailFailure` and leaves the cursor untouched.
    pub fn forward(&self, tail: Arc<dyn Tail>) -> Result<ForwardResult> {
        self.ensure_open()?;
        let runner = self.tail_entry(tail, TailMode::Backlog)?;
        let mut runner = runner
            .lock()
            .map_err(|_| Error::Corrupt("tail lock poisoned"))?;
        runner.run_round(&self.core)
    }

    /// Register `tail` if its name is new as a chunked tail, then
    /// synchronously run one windowed delivery round.
    pub fn forward_chunked(&self, tail: Arc<dyn Tail>, chunk_ms: i64) -> Result<ForwardResult> {
        self.ensure_open()?;
        if chunk_ms <= 0 {
            return Err(Error::InvalidArgument("chunk must be positive"));
        }
        let runner = self.tail_entry(tail, TailMode::Chunked { chunk_ms })?;
        let mut runner = runner
            .lock()
            .map_err(|_| Error::Corrupt("tail lock poisoned"))?;
        runner.run_round(&self.core)
    }

    /// Run whole-backlog rounds for `tail` under the shared scheduler with
    /// `delay` between rounds. Scheduling an already-scheduled name is a
    /// no-op.
    pub fn schedule_fixed_delay(&self, tail: Arc<dyn Tail>, delay: Duration) -> Result<()> {
        self.schedule(tail, TailMode::Backlog, delay)
    }

    /// Run chunked rounds for `tail`. Rounds that report a remaining
    /// backlog are re-run immediately so the tail walks history one closed
    /// window at a time.
    pub fn schedule_chunked(
        &self,
        tail: Arc<dyn Tail>,
        chunk_ms: i64,
        delay: Duration,
    ) -> Result<()> {
        if chunk_ms <= 0 {
            return Err(Error::InvalidArgument("chunk must be positive"));
        }
        self.schedule(tail, TailMode::Chunked { chunk_ms }, delay)
    }

    fn schedule(&self, tail: Arc<dyn Tail>, mode: TailMode, delay: Duration) -> Result<()> {
        self.ensure_open()?;
        let name = tail.name().to_string();
        self.tail_entry(tail, mode)?;
        let scheduler = self.core.scheduler_handle()?;

        let mut tails = self
            .core
            .tails
            .lock()
            .map_err(|_| Error::Corrupt("tail map lock poisoned"))?;
        let entry = match tails.get_mut(&name) {
            Some(entry) => entry,
            // Cancelled between registration and here; nothing to schedule.
            None => return Ok(()),
        };
        if entry.flags.is_some() {
            return Ok(());
        }

        let flags = TaskFlags::new();
        let task_flags = Arc::clone(&flags);
        let task_runner = Arc::clone(&entry.runner);
        let weak = Arc::downgrade(&self.core);
        let task: TaskFn = Box::new(move || {
            let core = match weak.upgrade() {
                Some(core) => core,
                None => return Ok(true),
            };
            if core.closed.load(Ordering::Acquire) || task_flags.abort_requested() {
                return Ok(true);
            }
            let mut runner = task_runner
                .lock()
                .map_err(|_| Error::Corrupt("tail lock poisoned"))?;
            let result = runner.run_round(&core)?;
            Ok(result.reached_tip)
        });

        entry.flags = Some(Arc::clone(&flags));
        drop(tails);

        scheduler.schedule(flags, delay, task);
        Ok(())
    }

    /// Stop a tail's scheduled rounds and drop its registration. The
    /// cursor stays on disk, so re-registering the same name resumes where
    /// it left off. With `may_interrupt`, an in-flight round is asked to
    /// abort at its next boundary (the user callback is never interrupted).
    ///
    /// Returns whether the tail was registered.
    pub fn cancel(&self, name: &str, may_interrupt: bool) -> Result<bool> {
        self.ensure_open()?;
        let mut tails = self
            .core
            .tails
            .lock()
            .map_err(|_| Error::Corrupt("tail map lock poisoned"))?;
        match tails.remove(name) {
            None => Ok(false),
            Some(entry) => {
                if let Some(flags) = entry.flags {
                    flags.cancel(may_interrupt);
                }
                Ok(true)
            }
        }
    }

    /// A tail's persisted cursor: the next index it will be handed.
    /// Works for registered and dormant tails alike.
    pub fn read_index(&self, name: &str) -> Result<u64> {
        self.ensure_open()?;
        {
            let tails = self
                .core
                .tails
                .lock()
                .map_err(|_| Error::Corrupt("tail map lock poisoned"))?;
            if let Some(entry) = tails.get(name) {
                let runner = entry
                    .runner
                    .lock()
                    .map_err(|_| Error::Corrupt("tail lock poisoned"))?;
                return Ok(runner.read_index());
            }
        }
        let cursor = TailCursor::open(&self.core.tails_dir, name, false)?;
        Ok(cursor.get())
    }

    /// Cancel every tail, shut the scheduler down (waiting out an in-flight
    /// round), then close the store. Idempotent; all later operations fail
    /// with `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.core.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Tails first: scheduled rounds observe the closed flag, and the
        // scheduler join below waits for any round already running.
        {
            let mut tails = self
                .core
                .tails
                .lock()
                .map_err(|_| Error::Corrupt("tail map lock poisoned"))?;
            for (_, entry) in tails.drain() {
                if let Some(flags) = entry.flags {
                    flags.cancel(false);
                }
            }
        }

        let scheduler = self
            .core
            .scheduler
            .lock()
            .map_err(|_| Error::Corrupt("scheduler lock poisoned"))?
            .take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }

        self.core.store.close()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Get or create the runner for `tail`. Registering a second tail under
    /// an existing name is a no-op: the original registration wins.
    fn tail_entry(&self, tail: Arc<dyn Tail>, mode: TailMode) -> Result<Arc<Mutex<TailRunner>>> {
        let name = tail.name().to_string();
        let mut tails = self
            .core
            .tails
            .lock()
            .map_err(|_| Error::Corrupt("tail map lock poisoned"))?;
        if let Some(entry) = tails.get(&name) {
            return Ok(Arc::clone(&entry.runner));
        }
        let cursor = TailCursor::open(&self.core.tails_dir, &name, self.core.sync_on_write)?;
        let runner = Arc::new(Mutex::new(TailRunner::new(tail, cursor, mode)));
        tails.insert(
            name,
            TailEntry {
                runner: Arc::clone(&runner),
                flags: None,
            },
        );
        Ok(runner)
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn raw_typed<T: 'static>(record: Record) -> TypedRecord<T> {
    let index = record.index;
    let timestamp_ms = record.timestamp_ms;
    let boxed: Box<dyn std::any::Any> = Box::new(record);
    let value = *boxed.downcast::<T>().expect("checked raw record type");
    TypedRecord {
        index,
        timestamp_ms,
        value,
    }
}
