//! Arrow conversion and Parquet encoding for frames.

use super::{ColumnData, Frame};
use anyhow::Result;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;

/// Convert a frame into a single Arrow record batch.
pub fn to_record_batch(frame: &Frame) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(frame.width());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(frame.width());

    for column in frame.columns() {
        let (dtype, array): (DataType, ArrayRef) = match &column.data {
            ColumnData::Int(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            ColumnData::Float(v) => (DataType::Float64, Arc::new(Float64Array::from(v.clone()))),
            ColumnData::Text(v) => (DataType::Utf8, Arc::new(StringArray::from(v.clone()))),
        };
        fields.push(Field::new(column.name.as_str(), dtype, true));
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Cast the named columns of a batch to narrower types, e.g. `Int64` to
/// `Int32` for a table schema that expects `int`.
pub fn cast_columns(batch: &RecordBatch, casts: &[(&str, DataType)]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());

    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        match casts.iter().find(|(name, _)| *name == field.name().as_str()) {
            Some((_, dtype)) => {
                arrays.push(cast(array, dtype)?);
                fields.push(Field::new(field.name().as_str(), dtype.clone(), field.is_nullable()));
            }
            None => {
                arrays.push(array.clone());
                fields.push(field.as_ref().clone());
            }
        }
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Encode a record batch as a Snappy-compressed Parquet file in memory.
pub fn write_parquet_bytes(batch: &RecordBatch) -> Result<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    Ok(Bytes::from(buffer))
}
