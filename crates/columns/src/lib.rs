//! # Columns — typed in-memory batches and their byte streams
//!
//! In-memory data model for the Log table engine: a [`Block`] is a batch of
//! rows across named, typed [`Column`]s, and a [`DataType`] knows how to turn
//! a column into one or more on-disk *byte streams* and back.
//!
//! ## Streams
//!
//! A plain scalar column serializes into exactly one stream, named after the
//! column. Composite types fan out into substreams:
//!
//! ```text
//! UInt32 "a"            →  a
//! Nullable(UInt32) "a"  →  a.null, a
//! Array(UInt32) "arr"   →  arr.size0, arr
//! Array(UInt32) "n.x"   →  n.size0, n%2Ex      (sizes shared with "n.y")
//! ```
//!
//! Two columns of the same nested table (`n.x`, `n.y`) legitimately map to
//! the *same* sizes stream `n.size0`; the storage layer writes and reads such
//! a shared stream once per block. The first substream a type emits is the
//! one whose row count equals the column's logical row count (for arrays the
//! sizes stream: one size per array).
//!
//! ## Bulk serialization
//!
//! [`DataType::serialize_bulk`] and [`DataType::deserialize_bulk`] walk the
//! substream tree, asking a resolver ([`StreamSink`] / [`StreamSource`]) for
//! the byte sink or source of each substream. A resolver may return `None`
//! to mean "skip this substream": the caller has already written it this
//! block (shared array sizes) or already holds its data.

mod block;
mod column;
mod datatype;
mod serialize;

pub use block::Block;
pub use column::Column;
pub use datatype::{
    escape_for_file_name, nested_table_name, stream_name, DataType, Field, Substream,
};
pub use serialize::{StreamSink, StreamSource, MAX_STRING_BYTES};

#[cfg(test)]
mod tests;
