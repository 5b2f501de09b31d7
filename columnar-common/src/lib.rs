//! Columnar files for the read benchmark: Apache Parquet on disk, Arrow record batches in memory.

pub mod codec;
pub mod table;

pub use codec::{numeric_schema, read, write, CodecError};
pub use table::Table;

pub use arrow;
