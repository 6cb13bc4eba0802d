use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use confmount_core::{FileProjection, Snapshot, DEFAULT_FILE_MODE};
use confmount_writer::{AtomicWriter, DiskSink, FileSink, PublishOutcome, WriteError};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn projections(pairs: &[(&str, &str)]) -> Vec<FileProjection> {
    Snapshot::from_pairs(pairs.iter().copied(), "1").projections(DEFAULT_FILE_MODE)
}

fn visible(target: &Path) -> BTreeMap<String, Vec<u8>> {
    AtomicWriter::new(target).current_files().expect("read target")
}

/// Refuses any write whose content equals `poison`.
struct PoisonSink {
    poison: Vec<u8>,
}

impl FileSink for PoisonSink {
    fn write_file(&self, path: &Path, content: &[u8], mode: u32) -> std::io::Result<()> {
        if content == self.poison.as_slice() {
            return Err(std::io::Error::other("No space left on device"));
        }
        DiskSink.write_file(path, content, mode)
    }
}

#[test]
fn publishing_twice_leaves_identical_file_set() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let writer = AtomicWriter::new(tmp.path());
    let payload = projections(&[("a", "1"), ("b", "2")]);

    writer.publish(&payload).unwrap();
    let first = visible(tmp.path());
    let outcome = writer.publish(&payload).unwrap();

    assert_eq!(outcome, PublishOutcome::Unchanged);
    assert_eq!(visible(tmp.path()), first);
}

#[test]
fn injected_write_failure_leaves_target_byte_identical() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    AtomicWriter::new(tmp.path())
        .publish(&projections(&[("a", "1"), ("b", "1"), ("c", "1")]))
        .unwrap();
    let before = visible(tmp.path());
    let before_link = fs::read_link(tmp.path().join("..data")).unwrap();

    let writer = AtomicWriter::with_sink(
        tmp.path(),
        Arc::new(PoisonSink {
            poison: b"poison".to_vec(),
        }),
    );
    let err = writer
        .publish(&projections(&[("a", "2"), ("b", "poison"), ("c", "2")]))
        .unwrap_err();
    assert!(matches!(err, WriteError::Io { .. }), "got: {err}");

    assert_eq!(visible(tmp.path()), before);
    assert_eq!(fs::read_link(tmp.path().join("..data")).unwrap(), before_link);
}

#[test]
fn removed_keys_are_cleaned_up() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let writer = AtomicWriter::new(tmp.path());
    writer
        .publish(&projections(&[("a", "1"), ("b", "2"), ("c", "3")]))
        .unwrap();
    writer
        .publish(&projections(&[("a", "1"), ("b", "2")]))
        .unwrap();

    let files = visible(tmp.path());
    assert_eq!(files.len(), 2);
    assert_eq!(files["a"], b"1");
    assert_eq!(files["b"], b"2");
    assert!(fs::symlink_metadata(tmp.path().join("c")).is_err());
}

#[test]
fn unchanged_republish_removes_link_left_by_crash_after_swap() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let writer = AtomicWriter::new(tmp.path());
    writer
        .publish(&projections(&[("a", "1"), ("b", "2"), ("c", "3")]))
        .unwrap();
    writer
        .publish(&projections(&[("a", "1"), ("b", "2")]))
        .unwrap();

    // Crash between the `..data` swap and stale-key removal.
    std::os::unix::fs::symlink("..data/c", tmp.path().join("c")).unwrap();

    let outcome = writer
        .publish(&projections(&[("a", "1"), ("b", "2")]))
        .unwrap();
    assert_eq!(outcome, PublishOutcome::Unchanged);
    assert!(fs::symlink_metadata(tmp.path().join("c")).is_err());
    assert_eq!(visible(tmp.path()).len(), 2);
}

#[test]
fn interrupted_publish_orphan_is_pruned_by_next_publish() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let writer = AtomicWriter::new(tmp.path());
    writer.publish(&projections(&[("a", "1")])).unwrap();

    // A crash after staging but before the swap leaves a half-built dir.
    let orphan = tmp.path().join("..1999_12_31_23_59_59.000000000");
    fs::create_dir(&orphan).unwrap();
    fs::write(orphan.join("a"), "half").unwrap();
    assert_eq!(fs::read_to_string(tmp.path().join("a")).unwrap(), "1");

    writer.publish(&projections(&[("a", "2")])).unwrap();
    assert!(!orphan.exists(), "orphan should be pruned");
    assert_eq!(fs::read_to_string(tmp.path().join("a")).unwrap(), "2");
}

#[test]
fn concurrent_reader_never_sees_a_mix() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().to_path_buf();
    let writer = AtomicWriter::new(&target);
    writer
        .publish(&projections(&[("a", "0"), ("b", "0")]))
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let stop = stop.clone();
        let target = target.clone();
        thread::spawn(move || {
            let mut observed = 0usize;
            loop {
                let done = stop.load(Ordering::SeqCst);
                // Resolve both keys through one pinned `..data` target.
                if let Ok(data) = fs::read_link(target.join("..data")) {
                    let a = fs::read(target.join(&data).join("a"));
                    let b = fs::read(target.join(&data).join("b"));
                    if let (Ok(a), Ok(b)) = (a, b) {
                        assert_eq!(a, b, "torn read in {}", data.display());
                        observed += 1;
                    }
                }
                if done {
                    break;
                }
            }
            observed
        })
    };

    for round in 1..50 {
        let v = round.to_string();
        writer
            .publish(&projections(&[("a", &v), ("b", &v)]))
            .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let observed = reader.join().expect("reader thread");
    assert!(observed > 0);
}
