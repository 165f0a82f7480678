use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use logbuffer::{Error, FnTail, LogBufferOptions, Tail};
use tempfile::tempdir;

/// Tail that fails its first `failures` invocations and records every batch
/// it is handed.
struct FlakyTail {
    attempts: AtomicUsize,
    failures: usize,
    seen: Mutex<Vec<Vec<u64>>>,
}

impl FlakyTail {
    fn new(failures: usize) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failures,
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl Tail for FlakyTail {
    fn name(&self) -> &str {
        "flaky"
    }

    fn process(&self, batch: &[logbuffer::Record]) -> Result<(), logbuffer::TailError> {
        let indexes = batch.iter().map(|record| record.index).collect();
        self.seen.lock().expect("seen lock").push(indexes);
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err("downstream unavailable".into());
        }
        Ok(())
    }
}

#[test]
fn failed_rounds_redeliver_and_do_not_advance() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");

    buffer.write(b"r1").expect("append");
    buffer.write(b"r2").expect("append");

    let tail = Arc::new(FlakyTail::new(2));

    for _ in 0..2 {
        let result = buffer.forward(tail.clone());
        assert!(matches!(result, Err(Error::TailFailure { .. })));
        assert_eq!(buffer.read_index("flaky").expect("read index"), 0);
    }

    let result = buffer.forward(tail.clone()).expect("third round");
    assert!(result.reached_tip);
    assert_eq!(buffer.read_index("flaky").expect("read index"), 2);

    // The callback saw the same backlog all three times.
    let seen = tail.seen.lock().expect("seen lock");
    assert_eq!(seen.as_slice(), &[vec![0, 1], vec![0, 1], vec![0, 1]]);
}

/// Tail whose callback panics on its first invocation, then succeeds.
struct PanickyTail {
    attempts: AtomicUsize,
    seen: Mutex<Vec<Vec<u64>>>,
}

impl PanickyTail {
    fn new() -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl Tail for PanickyTail {
    fn name(&self) -> &str {
        "panicky"
    }

    fn process(&self, batch: &[logbuffer::Record]) -> Result<(), logbuffer::TailError> {
        let indexes = batch.iter().map(|record| record.index).collect();
        self.seen.lock().expect("seen lock").push(indexes);
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("callback exploded");
        }
        Ok(())
    }
}

#[test]
fn panicking_round_fails_cleanly_and_retries() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");

    buffer.write(b"r1").expect("append");
    buffer.write(b"r2").expect("append");

    let tail = Arc::new(PanickyTail::new());

    // The panic surfaces as a round failure, not an unwind, and leaves the
    // cursor untouched.
    let result = buffer.forward(tail.clone());
    assert!(matches!(result, Err(Error::TailFailure { .. })));
    assert_eq!(buffer.read_index("panicky").expect("read index"), 0);

    // The tail stays usable: the next round redelivers and advances.
    let result = buffer.forward(tail.clone()).expect("second round");
    assert!(result.reached_tip);
    assert_eq!(buffer.read_index("panicky").expect("read index"), 2);

    let seen = tail.seen.lock().expect("seen lock");
    assert_eq!(seen.as_slice(), &[vec![0, 1], vec![0, 1]]);
}

#[test]
fn cursor_survives_reopen() {
    let dir = tempdir().expect("tempdir");
    {
        let buffer = LogBufferOptions::new(dir.path()).open().expect("open");
        buffer.write(b"r1").expect("append");
        buffer.write(b"r2").expect("append");
        let tail = Arc::new(FnTail::new("audit", |_batch: &[logbuffer::Record]| Ok(())));
        buffer.forward(tail).expect("round");
        assert_eq!(buffer.read_index("audit").expect("read index"), 2);
        buffer.close().expect("close");
    }

    let buffer = LogBufferOptions::new(dir.path()).open().expect("reopen");
    assert_eq!(buffer.read_index("audit").expect("dormant cursor"), 2);

    // Re-registration resumes from the persisted cursor: only new records
    // are delivered.
    buffer.write(b"r3").expect("append");
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&delivered);
    let tail = Arc::new(FnTail::new("audit", move |batch: &[logbuffer::Record]| {
        sink.lock()
            .expect("sink lock")
            .extend(batch.iter().map(|record| record.index));
        Ok(())
    }));
    buffer.forward(tail).expect("round");
    assert_eq!(delivered.lock().expect("sink lock").as_slice(), &[2]);
    assert_eq!(buffer.read_index("audit").expect("read index"), 3);
}

#[test]
fn forward_at_tip_skips_the_callback() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let tail = Arc::new(FnTail::new("idle", move |_batch: &[logbuffer::Record]| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));

    let result = buffer.forward(tail).expect("round at tip");
    assert!(result.reached_tip);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_keeps_cursor_for_reregistration() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");

    buffer.write(b"r1").expect("append");
    let tail = Arc::new(FnTail::new("audit", |_batch: &[logbuffer::Record]| Ok(())));
    buffer.forward(tail).expect("round");
    assert!(buffer.cancel("audit", false).expect("cancel"));
    assert!(!buffer.cancel("audit", false).expect("cancel again"));

    // Cursor is still on disk.
    assert_eq!(buffer.read_index("audit").expect("read index"), 1);
}
