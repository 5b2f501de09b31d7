use arrow::{datatypes::SchemaRef, record_batch::RecordBatch};

use crate::CodecError;

/// A decoded file: one schema, any number of record batches.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    /// The batches must all have the fields of `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Table { schema, batches }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Stack `tables` vertically. Batches are shared, not copied.
    ///
    /// Returns `None` for an empty input. All tables must have the same fields;
    /// schema metadata is ignored.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Result<Option<Table>, CodecError> {
        let mut tables = tables.into_iter();
        let Some(mut acc) = tables.next() else {
            return Ok(None);
        };
        for table in tables {
            if table.schema.fields() != acc.schema.fields() {
                return Err(CodecError::SchemaMismatch {
                    expected: acc.num_columns(),
                    found: table.num_columns(),
                });
            }
            acc.batches.extend(table.batches);
        }
        Ok(Some(acc))
    }
}
