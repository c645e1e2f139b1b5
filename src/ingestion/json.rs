//! JSON reading.
//!
//! Supported inputs:
//! - A JSON array of objects: `[{"a":1}, {"a":2}]`
//! - A single JSON object (one row)
//! - Newline-delimited JSON (NDJSON): `{"a":1}\n{"a":2}\n`
//!
//! Columns are the union of object keys in first-seen order. Nested objects and arrays are kept
//! as their JSON text.

use serde_json::Map;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Read JSON text into a [`DataSet`], inferring column types.
pub fn read_json_from_str(input: &str) -> IngestionResult<DataSet> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(DataSet::default());
    }

    // First try parsing as a single JSON value (array or object).
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(trimmed) {
        match v {
            serde_json::Value::Array(items) => read_json_values(&items),
            serde_json::Value::Object(_) => read_json_values(std::slice::from_ref(&v)),
            _ => Err(IngestionError::SchemaMismatch {
                message: "json must be an object, an array of objects, or NDJSON".to_string(),
            }),
        }
    } else {
        let mut values = Vec::new();
        for (i, line) in trimmed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let v = serde_json::from_str::<serde_json::Value>(line).map_err(|e| {
                IngestionError::SchemaMismatch {
                    message: format!("invalid ndjson at line {}: {}", i + 1, e),
                }
            })?;
            values.push(v);
        }
        read_json_values(&values)
    }
}

fn read_json_values(values: &[serde_json::Value]) -> IngestionResult<DataSet> {
    let mut objects: Vec<&Map<String, serde_json::Value>> = Vec::with_capacity(values.len());
    for (idx0, v) in values.iter().enumerate() {
        let obj = v.as_object().ok_or_else(|| IngestionError::SchemaMismatch {
            message: format!("row {} is not a json object", idx0 + 1),
        })?;
        objects.push(obj);
    }

    let mut names: Vec<&str> = Vec::new();
    for obj in &objects {
        for key in obj.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key.as_str());
            }
        }
    }

    let types: Vec<DataType> = names
        .iter()
        .map(|name| infer_json_type(objects.iter().filter_map(|obj| obj.get(*name))))
        .collect();

    let rows = objects
        .iter()
        .map(|obj| {
            names
                .iter()
                .zip(&types)
                .map(|(name, data_type)| match obj.get(*name) {
                    Some(v) => convert_json_value(v, *data_type),
                    None => Value::Null,
                })
                .collect()
        })
        .collect();

    let fields = names
        .iter()
        .zip(types)
        .map(|(name, data_type)| Field::new(*name, data_type))
        .collect();

    Ok(DataSet::new(Schema::new(fields), rows))
}

fn infer_json_type<'a>(values: impl Iterator<Item = &'a serde_json::Value>) -> DataType {
    let mut any = false;
    let mut all_int = true;
    let mut all_number = true;
    let mut all_bool = true;

    for v in values {
        if v.is_null() {
            continue;
        }
        any = true;
        all_int &= v.is_i64();
        all_number &= v.is_number();
        all_bool &= v.is_boolean();
    }

    match (any, all_int, all_number, all_bool) {
        (false, ..) => DataType::Float64,
        (true, true, _, _) => DataType::Int64,
        (true, false, true, _) => DataType::Float64,
        (true, _, _, true) => DataType::Bool,
        _ => DataType::Utf8,
    }
}

fn convert_json_value(v: &serde_json::Value, data_type: DataType) -> Value {
    match (v, data_type) {
        (serde_json::Value::Null, _) => Value::Null,
        (serde_json::Value::Number(n), DataType::Int64) => {
            n.as_i64().map(Value::Int64).unwrap_or(Value::Null)
        }
        (serde_json::Value::Number(n), DataType::Float64) => {
            n.as_f64().map(Value::Float64).unwrap_or(Value::Null)
        }
        (serde_json::Value::Bool(b), DataType::Bool) => Value::Bool(*b),
        (serde_json::Value::String(s), _) => Value::Utf8(s.clone()),
        (other, _) => Value::Utf8(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_of_objects_unions_keys_in_first_seen_order() {
        let ds = read_json_from_str(r#"[{"id":1,"x":1.5},{"id":2,"y":"a"}]"#).unwrap();
        assert_eq!(ds.schema.field_names().collect::<Vec<_>>(), vec!["id", "x", "y"]);
        assert_eq!(ds.schema.fields[0].data_type, DataType::Int64);
        assert_eq!(ds.rows[1], vec![Value::Int64(2), Value::Null, Value::Utf8("a".into())]);
    }

    #[test]
    fn ndjson_is_supported() {
        let ds = read_json_from_str("{\"a\":true}\n\n{\"a\":false}\n").unwrap();
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.schema.fields[0].data_type, DataType::Bool);
    }

    #[test]
    fn mixed_ints_and_floats_become_float() {
        let ds = read_json_from_str(r#"[{"v":1},{"v":2.5},{"v":null}]"#).unwrap();
        assert_eq!(ds.schema.fields[0].data_type, DataType::Float64);
        assert_eq!(ds.rows[0][0], Value::Float64(1.0));
        assert_eq!(ds.rows[2][0], Value::Null);
    }

    #[test]
    fn scalar_json_is_rejected() {
        let err = read_json_from_str("42").unwrap_err();
        assert!(err.to_string().contains("schema mismatch"));
    }
}
