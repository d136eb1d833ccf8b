use crate::datatype::DataType;

/// A typed column of values.
///
/// `Array` holds cumulative end offsets (`offsets[i]` = number of values in
/// rows `0..=i`) plus a flattened values column; the on-disk form stores
/// per-row sizes instead, and the serializers convert at the boundary.
/// `Nullable` holds one flag byte per row (1 = null) plus a values column
/// with a placeholder value in null positions.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Float64(Vec<f64>),
    String(Vec<String>),
    Array {
        offsets: Vec<u64>,
        values: Box<Column>,
    },
    Nullable {
        nulls: Vec<u8>,
        values: Box<Column>,
    },
}

impl Column {
    /// Number of logical rows. For arrays this counts arrays, not elements.
    pub fn len(&self) -> usize {
        match self {
            Column::UInt32(v) => v.len(),
            Column::UInt64(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::String(v) => v.len(),
            Column::Array { offsets, .. } => offsets.len(),
            Column::Nullable { nulls, .. } => nulls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconstructs the data type this column holds.
    pub fn data_type(&self) -> DataType {
        match self {
            Column::UInt32(_) => DataType::UInt32,
            Column::UInt64(_) => DataType::UInt64,
            Column::Float64(_) => DataType::Float64,
            Column::String(_) => DataType::String,
            Column::Array { values, .. } => DataType::Array(Box::new(values.data_type())),
            Column::Nullable { values, .. } => DataType::Nullable(Box::new(values.data_type())),
        }
    }

    /// Builds an `Array` column from per-row element slices.
    pub fn array_of_u32(rows: &[&[u32]]) -> Column {
        let mut offsets = Vec::with_capacity(rows.len());
        let mut values = Vec::new();
        let mut total = 0u64;
        for row in rows {
            total += row.len() as u64;
            offsets.push(total);
            values.extend_from_slice(row);
        }
        Column::Array {
            offsets,
            values: Box::new(Column::UInt32(values)),
        }
    }
}
