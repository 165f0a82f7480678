use std::io::Write;

use logbuffer::LogBufferOptions;
use tempfile::tempdir;

#[test]
fn torn_final_frame_is_discarded_on_reopen() {
    let dir = tempdir().expect("tempdir");
    {
        let buffer = LogBufferOptions::new(dir.path()).open().expect("open");
        buffer.write(b"a").expect("append");
        buffer.write(b"b").expect("append");
        buffer.write(b"c").expect("append");
        buffer.close().expect("close");
    }

    // Simulate a crash mid-append: a header whose length prefix points past
    // the end of the file, followed by a few payload bytes.
    let segment = dir.path().join("data").join("000000000.q");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&segment)
        .expect("open segment");
    let mut torn = Vec::new();
    torn.extend_from_slice(&0u64.to_le_bytes()); // type
    torn.extend_from_slice(&9_999i64.to_le_bytes()); // timestamp
    torn.extend_from_slice(&64u32.to_le_bytes()); // 64-byte payload promised
    torn.extend_from_slice(b"only-a-few-bytes");
    file.write_all(&torn).expect("append torn frame");
    drop(file);

    let buffer = LogBufferOptions::new(dir.path()).open().expect("reopen");
    assert_eq!(buffer.write_index().expect("write index"), 3);

    let records = buffer.select(0, 10).expect("select");
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].payload, b"c");

    // The next append reuses the truncated position.
    let record = buffer.write(b"d").expect("append after recovery");
    assert_eq!(record.index, 3);
    let records = buffer.select(0, 10).expect("select");
    assert_eq!(records.len(), 4);
    assert_eq!(records[3].payload, b"d");
}

#[test]
fn recovery_spans_sealed_segments() {
    let dir = tempdir().expect("tempdir");
    {
        let buffer = LogBufferOptions::new(dir.path())
            .logs_per_file(4)
            .open()
            .expect("open");
        for i in 0..10u32 {
            buffer.write(&i.to_le_bytes()).expect("append");
        }
        buffer.close().expect("close");
    }

    let buffer = LogBufferOptions::new(dir.path())
        .logs_per_file(4)
        .open()
        .expect("reopen");
    assert_eq!(buffer.write_index().expect("write index"), 10);

    let records = buffer.select(0, 10).expect("select");
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.payload, (i as u32).to_le_bytes());
    }

    // Indexes keep rolling into the right segment after reopen.
    for i in 10..14u32 {
        let record = buffer.write(&i.to_le_bytes()).expect("append");
        assert_eq!(record.index, i as u64);
    }
    let segments: Vec<_> = std::fs::read_dir(dir.path().join("data"))
        .expect("read data dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert!(segments.len() >= 4);
}

#[test]
fn tail_cursor_recovers_from_torn_entry() {
    let dir = tempdir().expect("tempdir");
    {
        let buffer = LogBufferOptions::new(dir.path()).open().expect("open");
        buffer.write(b"a").expect("append");
        buffer.write(b"b").expect("append");
        let tail = std::sync::Arc::new(logbuffer::FnTail::new(
            "audit",
            |_batch: &[logbuffer::Record]| Ok(()),
        ));
        buffer.forward(tail).expect("round");
        buffer.close().expect("close");
    }

    // A crash mid-cursor-write leaves a partial trailing entry, which must
    // fall back to the previous one.
    let cursor = dir.path().join("tails").join("audit").join("cursor");
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&cursor)
        .expect("open cursor");
    file.write_all(&[0xAB, 0xCD]).expect("torn entry");
    drop(file);

    let buffer = LogBufferOptions::new(dir.path()).open().expect("reopen");
    assert_eq!(buffer.read_index("audit").expect("cursor"), 2);
}
