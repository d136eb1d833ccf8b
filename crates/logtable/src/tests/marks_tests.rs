use std::fs::OpenOptions;

use tempfile::tempdir;

use super::helpers::*;
use crate::{Error, MARKS_FILE_NAME, MARK_SIZE};

fn truncate_marks(root: &std::path::Path, len: u64) {
    let path = table_dir(root).join(MARKS_FILE_NAME);
    OpenOptions::new()
        .write(true)
        .open(path)
        .unwrap()
        .set_len(len)
        .unwrap();
}

#[test]
fn truncated_marks_file_is_fatal() {
    let dir = tempdir().unwrap();
    {
        let table = u32_table(dir.path());
        append(&table, &[1, 2, 3]);
    }
    // 15 bytes is not a multiple of one 16-byte mark row.
    truncate_marks(dir.path(), (MARK_SIZE - 1) as u64);

    let table = u32_table(dir.path());
    let err = table.read(&["a"], 1, 100, 1024).unwrap_err();
    assert!(matches!(err, Error::MarksInconsistent { size: 15, .. }));
}

#[test]
fn truncated_marks_file_fails_writes_too() {
    let dir = tempdir().unwrap();
    {
        let table = u32_table(dir.path());
        append(&table, &[1]);
    }
    truncate_marks(dir.path(), (MARK_SIZE + 1) as u64);

    let table = u32_table(dir.path());
    assert!(matches!(
        table.write().unwrap_err(),
        Error::MarksInconsistent { .. }
    ));
}

#[test]
fn marks_load_once_per_descriptor() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1, 2]);

    // First scan loads the marks into memory.
    {
        let mut readers = table.read(&["a"], 1, 100, 1024 * 1024).unwrap();
        assert_eq!(drain_u32(&mut readers[0]), vec![1, 2]);
    }

    // Corrupting the file afterwards goes unnoticed by this descriptor:
    // marks are never reloaded or evicted.
    truncate_marks(dir.path(), (MARK_SIZE - 1) as u64);
    let mut readers = table.read(&["a"], 1, 100, 1024 * 1024).unwrap();
    assert_eq!(drain_u32(&mut readers[0]), vec![1, 2]);
}

#[test]
fn new_descriptor_recovers_marks_from_disk() {
    let dir = tempdir().unwrap();
    {
        let table = u32_table(dir.path());
        append(&table, &[1, 2]);
        append(&table, &[3]);
    }

    let table = u32_table(dir.path());
    let mut readers = table.read(&["a"], 2, 100, 1024 * 1024).unwrap();
    assert_eq!(readers.len(), 2);
    assert_eq!(drain_u32(&mut readers[0]), vec![1, 2]);
    assert_eq!(drain_u32(&mut readers[1]), vec![3]);
}
