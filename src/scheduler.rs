//! Periodic task runner for scheduled tails.
//!
//! One worker thread per buffer drains a due-time-ordered queue. Each task
//! is re-armed after it runs: at its configured delay normally, or at a
//! small catch-up floor when the round reports it has not reached the tip,
//! which is how a scheduled tail burns down a large backlog.
//!
//! A task that fails is logged and retried at the normal delay; the retry
//! contract lives in the tail's cursor, not here. Cancellation removes the
//! task at the next queue touch; the optional abort flag is visible to
//! rounds that want to stop at the next boundary.

use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Floor for the inter-round delay while a tail is catching up.
pub const MIN_CATCHUP_DELAY: Duration = Duration::from_millis(1);

/// One scheduled round. `Ok(true)` means the tail reached the tip and the
/// next round waits the full delay; `Ok(false)` requests an immediate
/// (floored) re-run.
pub type TaskFn = Box<dyn FnMut() -> Result<bool> + Send>;

/// Cancellation state shared between a scheduled task and its owner.
#[derive(Debug, Default)]
pub struct TaskFlags {
    cancelled: AtomicBool,
    abort: AtomicBool,
}

impl TaskFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stop future rounds. With `may_interrupt`, also raise the abort flag
    /// that an in-flight round checks at its next boundary; the user
    /// callback itself is never interrupted.
    pub fn cancel(&self, may_interrupt: bool) {
        self.cancelled.store(true, Ordering::Release);
        if may_interrupt {
            self.abort.store(true, Ordering::Release);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    delay: Duration,
    flags: Arc<TaskFlags>,
    task: TaskFn,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, the queue wants earliest-due
        // first, FIFO within a tie.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    queue: Mutex<BinaryHeap<Entry>>,
    available: Condvar,
    shutdown: AtomicBool,
    seq: AtomicU64,
}

/// Single-threaded periodic runner, created lazily on first schedule.
pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Result<Self> {
        let inner = Arc::new(Inner {
            queue: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("logbuffer-scheduler".to_string())
            .spawn(move || run_worker(worker_inner))?;
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Enqueue `task` to first run after `delay`, re-arming after each run
    /// until its flags are cancelled.
    pub fn schedule(&self, flags: Arc<TaskFlags>, delay: Duration, task: TaskFn) {
        let entry = Entry {
            due: Instant::now() + delay,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            delay,
            flags,
            task,
        };
        if let Ok(mut queue) = self.inner.queue.lock() {
            queue.push(entry);
        }
        self.inner.available.notify_all();
    }

    /// Stop the worker and drop all pending tasks, waiting for an in-flight
    /// round to complete. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.available.notify_all();
        let handle = self.worker.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(inner: Arc<Inner>) {
    loop {
        let mut entry = {
            let mut queue = match inner.queue.lock() {
                Ok(queue) => queue,
                Err(_) => return,
            };
            loop {
                if inner.shutdown.load(Ordering::Acquire) {
                    queue.clear();
                    return;
                }
                let now = Instant::now();
                let next_due = queue.peek().map(|next| next.due);
                match next_due {
                    Some(due) if due <= now => break queue.pop().expect("due entry"),
                    Some(due) => {
                        queue = match inner.available.wait_timeout(queue, due - now) {
                            Ok((queue, _)) => queue,
                            Err(_) => return,
                        };
                    }
                    None => {
                        queue = match inner.available.wait(queue) {
                            Ok(queue) => queue,
                            Err(_) => return,
                        };
                    }
                }
            }
        };

        if entry.flags.is_cancelled() {
            continue;
        }

        let delay = match catch_unwind(AssertUnwindSafe(|| (entry.task)())) {
            Ok(Ok(true)) => entry.delay,
            Ok(Ok(false)) => entry.delay.min(MIN_CATCHUP_DELAY),
            Ok(Err(err)) => {
                log::warn!("scheduled round failed, retrying: {err}");
                entry.delay
            }
            Err(_) => {
                log::warn!("scheduled round panicked, retrying");
                entry.delay
            }
        };

        if entry.flags.is_cancelled() {
            continue;
        }
        entry.due = Instant::now() + delay;
        match inner.queue.lock() {
            Ok(mut queue) => queue.push(entry),
            Err(_) => return,
        }
    }
}
