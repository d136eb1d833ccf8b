use std::fs;
use std::path::Path;

use columns::{Block, Column, DataType, Field};

use crate::LogTable;

/// Opens `t(a UInt32)` under `root`.
pub fn u32_table(root: &Path) -> LogTable {
    LogTable::open(
        root,
        "t",
        vec![Field::new("a", DataType::UInt32)],
        1024 * 1024,
    )
    .expect("failed to open table")
}

/// A single-column block `a = values`.
pub fn u32_block(values: &[u32]) -> Block {
    let mut block = Block::new();
    block.push("a", Column::UInt32(values.to_vec()));
    block
}

/// Appends one block in its own session.
pub fn append(table: &LogTable, values: &[u32]) {
    let mut writer = table.write().expect("failed to start writer");
    writer.write(&u32_block(values)).expect("failed to write");
    writer.finish().expect("failed to finish");
}

/// Extracts the values of a `UInt32` column from a block.
pub fn col_u32(block: &Block, name: &str) -> Vec<u32> {
    match block.column(name) {
        Some(Column::UInt32(values)) => values.clone(),
        other => panic!("expected UInt32 column {}, got {:?}", name, other),
    }
}

/// Drains one reader, concatenating its `a` values.
pub fn drain_u32(reader: &mut crate::LogReader<'_>) -> Vec<u32> {
    let mut out = Vec::new();
    while let Some(block) = reader.next_block().expect("read failed") {
        out.extend(col_u32(&block, "a"));
    }
    out
}

pub fn count_bin_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "bin")
                .unwrap_or(false)
        })
        .count()
}

/// The table directory for table `t` under `root`.
pub fn table_dir(root: &Path) -> std::path::PathBuf {
    root.join("t")
}
