//! Parquet reading.

use bytes::Bytes;
use parquet::basic::Type as PhysicalType;
use parquet::file::reader::{ChunkReader, FileReader};
use parquet::file::serialized_reader::SerializedFileReader;
use parquet::record::Field as ParquetField;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Read an in-memory Parquet file into a [`DataSet`].
///
/// Column types come from the Parquet physical types of the leaf columns; rows are read through
/// the record API.
pub fn read_parquet_from_bytes(input: Vec<u8>) -> IngestionResult<DataSet> {
    let reader = SerializedFileReader::new(Bytes::from(input))?;
    let schema = parquet_schema(&reader);

    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (idx0, row_res) in reader.get_row_iter(None)?.enumerate() {
        let row = row_res?;
        let mut out_row = vec![Value::Null; schema.len()];
        for (name, field) in row.get_column_iter() {
            let idx = schema
                .index_of(name)
                .ok_or_else(|| IngestionError::SchemaMismatch {
                    message: format!("row {} has unexpected column '{name}'", idx0 + 1),
                })?;
            out_row[idx] = convert_parquet_field(field, schema.fields[idx].data_type);
        }
        rows.push(out_row);
    }

    Ok(DataSet::new(schema, rows))
}

fn parquet_schema<R: ChunkReader + 'static>(reader: &SerializedFileReader<R>) -> Schema {
    let fields = reader
        .metadata()
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|c| {
            let data_type = match c.physical_type() {
                PhysicalType::BOOLEAN => DataType::Bool,
                PhysicalType::INT32 | PhysicalType::INT64 => DataType::Int64,
                PhysicalType::FLOAT | PhysicalType::DOUBLE => DataType::Float64,
                _ => DataType::Utf8,
            };
            Field::new(c.path().string(), data_type)
        })
        .collect();
    Schema::new(fields)
}

fn convert_parquet_field(f: &ParquetField, data_type: DataType) -> Value {
    match (f, data_type) {
        (ParquetField::Null, _) => Value::Null,
        (ParquetField::Bool(b), DataType::Bool) => Value::Bool(*b),
        (ParquetField::Byte(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::Short(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::Int(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::Long(v), DataType::Int64) => Value::Int64(*v),
        (ParquetField::UByte(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::UShort(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::UInt(v), DataType::Int64) => Value::Int64(i64::from(*v)),
        (ParquetField::ULong(v), DataType::Int64) => {
            i64::try_from(*v).map(Value::Int64).unwrap_or(Value::Null)
        }
        (ParquetField::Float(v), DataType::Float64) => Value::Float64(f64::from(*v)),
        (ParquetField::Double(v), DataType::Float64) => Value::Float64(*v),
        (ParquetField::Str(s), _) => Value::Utf8(s.clone()),
        (other, _) => Value::Utf8(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_a_parquet_error() {
        let err = read_parquet_from_bytes(b"not a parquet file".to_vec()).unwrap_err();
        assert!(err.to_string().contains("parquet error"));
    }
}
