use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, Float64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::{RecordBatch, RecordBatchOptions, RecordBatchReader},
};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use tracing::trace;

use crate::Table;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode {}: {reason}", path.display())]
    Encoding { path: PathBuf, reason: String },
    #[error("decode {}: {source}", path.display())]
    Decoding {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("schema mismatch: expected {expected} columns with identical fields, found {found}")]
    SchemaMismatch { expected: usize, found: usize },
}

impl CodecError {
    /// The file the error is about, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            CodecError::Encoding { path, .. }
            | CodecError::Decoding { path, .. }
            | CodecError::NotFound(path)
            | CodecError::Io { path, .. } => Some(path),
            CodecError::SchemaMismatch { .. } => None,
        }
    }

    fn decoding(path: &Path, source: impl Into<BoxError>) -> Self {
        CodecError::Decoding {
            path: path.to_owned(),
            source: source.into(),
        }
    }

    fn encoding(path: &Path, reason: impl std::fmt::Display) -> Self {
        CodecError::Encoding {
            path: path.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// `ndim` non-nullable `Float64` columns named `dim_0000`, `dim_0001`, ...
pub fn numeric_schema(ndim: usize) -> Schema {
    Schema::new(
        (0..ndim)
            .map(|i| Field::new(format!("dim_{i:04}"), DataType::Float64, false))
            .collect::<Vec<_>>(),
    )
}

/// Write `rows` to a new Parquet file at `path`, replacing any existing file.
///
/// Only `Float64` schemas are supported, and every row must have one value per field.
pub fn write(path: &Path, schema: &Schema, rows: &[Vec<f64>]) -> Result<(), CodecError> {
    if let Some(field) = schema
        .fields()
        .iter()
        .find(|f| f.data_type() != &DataType::Float64)
    {
        return Err(CodecError::encoding(
            path,
            format_args!(
                "field {:?} has type {}, only Float64 is supported",
                field.name(),
                field.data_type()
            ),
        ));
    }
    let ncols = schema.fields().len();
    if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != ncols) {
        return Err(CodecError::encoding(
            path,
            format_args!("row {idx} has {} values, schema has {ncols} columns", row.len()),
        ));
    }

    let schema = Arc::new(schema.clone());
    let columns: Vec<ArrayRef> = (0..ncols)
        .map(|c| Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r[c]))) as ArrayRef)
        .collect();
    let batch = RecordBatch::try_new_with_options(
        Arc::clone(&schema),
        columns,
        &RecordBatchOptions::new().with_row_count(Some(rows.len())),
    )
    .map_err(|e| CodecError::encoding(path, e))?;

    let file = File::create(path).map_err(|source| CodecError::Io {
        path: path.to_owned(),
        source,
    })?;
    let mut writer =
        ArrowWriter::try_new(file, schema, None).map_err(|e| CodecError::encoding(path, e))?;
    writer
        .write(&batch)
        .map_err(|e| CodecError::encoding(path, e))?;
    writer.close().map_err(|e| CodecError::encoding(path, e))?;
    trace!(path = %path.display(), rows = rows.len(), ncols, "wrote file");
    Ok(())
}

/// Decode the whole Parquet file at `path`.
pub fn read(path: &Path) -> Result<Table, CodecError> {
    let file = File::open(path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => CodecError::NotFound(path.to_owned()),
        _ => CodecError::Io {
            path: path.to_owned(),
            source,
        },
    })?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|e| CodecError::decoding(path, e))?;
    let schema = reader.schema();
    let batches = reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CodecError::decoding(path, e))?;
    Ok(Table::new(schema, batches))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use arrow::array::{Array, Float64Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn rows(n: usize, ndim: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|r| (0..ndim).map(|c| (r * ndim + c) as f64).collect())
            .collect()
    }

    #[test]
    fn schema_names() {
        let schema = numeric_schema(3);
        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, ["dim_0000", "dim_0001", "dim_0002"]);
        assert!(schema
            .fields()
            .iter()
            .all(|f| f.data_type() == &DataType::Float64 && !f.is_nullable()));
    }

    #[test]
    fn write_then_read_keeps_shape_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00000.parquet");
        write(&path, &numeric_schema(4), &rows(10, 4)).unwrap();

        let table = read(&path).unwrap();
        assert_eq!(table.num_rows(), 10);
        assert_eq!(table.num_columns(), 4);
        assert_eq!(table.schema().field(2).name(), "dim_0002");
        let batch = &table.batches()[0];
        let col = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(col.len(), 10);
        assert_eq!(col.value(3), (3 * 4 + 2) as f64);
    }

    #[test]
    fn write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.parquet");
        write(&path, &numeric_schema(2), &rows(10, 2)).unwrap();
        write(&path, &numeric_schema(3), &rows(5, 3)).unwrap();
        let table = read(&path).unwrap();
        assert_eq!((table.num_rows(), table.num_columns()), (5, 3));
    }

    #[test]
    fn zero_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        write(&path, &numeric_schema(3), &[]).unwrap();
        let table = read(&path).unwrap();
        assert_eq!((table.num_rows(), table.num_columns()), (0, 3));
    }

    #[test]
    fn row_width_mismatch_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.parquet");
        let mut data = rows(3, 4);
        data[1].pop();
        let err = write(&path, &numeric_schema(4), &data).unwrap_err();
        assert!(matches!(err, CodecError::Encoding { .. }), "{err}");
        assert!(err.to_string().contains("row 1 has 3 values"), "{err}");
        assert!(!path.exists());
    }

    #[test]
    fn non_float_field_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.parquet");
        let schema = Schema::new(vec![Field::new("name", DataType::Utf8, false)]);
        let err = write(&path, &schema, &[vec![1.0]]).unwrap_err();
        assert!(matches!(err, CodecError::Encoding { .. }), "{err}");
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.parquet");
        let err = read(&path).unwrap_err();
        assert!(matches!(err, CodecError::NotFound(_)), "{err}");
        assert_eq!(err.path(), Some(path.as_path()));
    }

    #[test]
    fn garbage_is_decoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.parquet");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"this is definitely not a parquet file").unwrap();
        drop(f);
        let err = read(&path).unwrap_err();
        assert!(matches!(err, CodecError::Decoding { .. }), "{err}");
    }

    #[test]
    fn concat_tables() {
        let dir = tempfile::tempdir().unwrap();
        let tables: Vec<_> = (0..3)
            .map(|i| {
                let path = dir.path().join(format!("{i}.parquet"));
                write(&path, &numeric_schema(2), &rows(i + 1, 2)).unwrap();
                read(&path).unwrap()
            })
            .collect();
        let all = Table::concat(tables).unwrap().unwrap();
        assert_eq!(all.num_rows(), 1 + 2 + 3);
        assert_eq!(all.num_columns(), 2);

        assert!(Table::concat(Vec::new()).unwrap().is_none());

        let a = dir.path().join("a.parquet");
        let b = dir.path().join("b.parquet");
        write(&a, &numeric_schema(2), &rows(1, 2)).unwrap();
        write(&b, &numeric_schema(3), &rows(1, 3)).unwrap();
        let err = Table::concat([read(&a).unwrap(), read(&b).unwrap()]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::SchemaMismatch {
                expected: 2,
                found: 3
            }
        ));
    }
}
