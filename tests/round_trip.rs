use logbuffer::LogBufferOptions;
use tempfile::tempdir;

#[test]
fn append_three_and_read_back() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");

    let first = buffer.write(b"x").expect("append x");
    let second = buffer.write(b"y").expect("append y");
    let third = buffer.write(b"z").expect("append z");

    assert_eq!(first.index, 0);
    assert_eq!(second.index, 1);
    assert_eq!(third.index, 2);
    assert!(first.timestamp_ms <= second.timestamp_ms);
    assert!(second.timestamp_ms <= third.timestamp_ms);

    let records = buffer.select(0, u64::MAX).expect("select");
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].payload, b"x");
    assert_eq!(records[1].payload, b"y");
    assert_eq!(records[2].payload, b"z");
    assert!(records.iter().all(|record| record.is_raw()));

    // Boundary: an empty range and a range past the tip.
    assert!(buffer.select(1, 1).expect("empty range").is_empty());
    let clamped = buffer.select(1, 100).expect("clamped range");
    assert_eq!(clamped.len(), 2);
    assert_eq!(clamped[0].index, 1);

    assert!(buffer.select(2, 1).is_err());
}

#[test]
fn reopen_preserves_contents() {
    let dir = tempdir().expect("tempdir");
    {
        let buffer = LogBufferOptions::new(dir.path()).open().expect("open");
        buffer.write(b"x").expect("append x");
        buffer.write(b"y").expect("append y");
        buffer.close().expect("close");
    }

    let buffer = LogBufferOptions::new(dir.path()).open().expect("reopen");
    assert_eq!(buffer.write_index().expect("write index"), 2);

    let records = buffer.select(0, 2).expect("select");
    assert_eq!(records[0].payload, b"x");
    assert_eq!(records[1].payload, b"y");

    let appended = buffer.write(b"z").expect("append after reopen");
    assert_eq!(appended.index, 2);
    assert!(appended.timestamp_ms >= records[1].timestamp_ms);
}

#[test]
fn closed_buffer_rejects_operations() {
    let dir = tempdir().expect("tempdir");
    let buffer = LogBufferOptions::new(dir.path()).open().expect("open");
    buffer.write(b"x").expect("append");
    buffer.close().expect("close");
    buffer.close().expect("close twice");

    assert!(matches!(buffer.write(b"y"), Err(logbuffer::Error::Closed)));
    assert!(matches!(buffer.select(0, 1), Err(logbuffer::Error::Closed)));
}
