use crate::column::Column;

/// A batch of rows across named columns, as written to or read from a table.
///
/// Columns are kept in insertion order. All columns of a block written to a
/// table must have the same row count; blocks produced by a scan satisfy the
/// same property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    columns: Vec<(String, Column)>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, column: Column) {
        self.columns.push((name.into(), column));
    }

    /// Row count, taken from the first column (0 for a block with no columns).
    pub fn rows(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    /// `true` when the block holds no columns at all.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }
}
