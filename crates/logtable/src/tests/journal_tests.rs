use std::fs::{self, OpenOptions};
use std::io::Write;

use tempfile::tempdir;

use super::helpers::*;
use crate::SIZES_FILE_NAME;

#[test]
fn fresh_table_checks_clean() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    assert!(table.check_data().unwrap());
}

#[test]
fn check_data_true_after_finish() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1, 2, 3]);
    assert!(table.check_data().unwrap());
    assert!(table_dir(dir.path()).join(SIZES_FILE_NAME).exists());
}

#[test]
fn truncated_data_file_detected() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1, 2, 3]);

    let bin = table_dir(dir.path()).join("a.bin");
    let size = fs::metadata(&bin).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&bin)
        .unwrap()
        .set_len(size - 1)
        .unwrap();

    assert!(!table.check_data().unwrap());
}

#[test]
fn missing_data_file_detected() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1]);

    fs::remove_file(table_dir(dir.path()).join("a.bin")).unwrap();
    assert!(!table.check_data().unwrap());
}

#[test]
fn external_append_detected() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1]);

    // Bytes appended outside a committed session make the recorded size
    // stale, exactly the state a crashed writer leaves behind.
    let mut file = OpenOptions::new()
        .append(true)
        .open(table_dir(dir.path()).join("a.bin"))
        .unwrap();
    file.write_all(b"junk").unwrap();
    drop(file);

    assert!(!table.check_data().unwrap());
}

#[test]
fn next_commit_repairs_the_journal() {
    let dir = tempdir().unwrap();
    let table = u32_table(dir.path());
    append(&table, &[1]);

    let mut file = OpenOptions::new()
        .append(true)
        .open(table_dir(dir.path()).join("a.bin"))
        .unwrap();
    file.write_all(b"junk").unwrap();
    drop(file);
    assert!(!table.check_data().unwrap());

    // A successful commit re-measures the touched files.
    append(&table, &[2]);
    assert!(table.check_data().unwrap());
}
