//! Null pruning and value normalization.
//!
//! All operations take the input by reference and return a new [`DataSet`]. The clean stage
//! applies them in order through [`clean`]: [`drop_null`], then [`clean_string`], then
//! [`clean_number`].

use std::collections::HashSet;

use thiserror::Error;

use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Columns whose null density exceeds this fraction are candidates for removal.
pub const COLUMN_NULL_DENSITY_THRESHOLD: f64 = 0.5;

/// Fraction of non-null cells that must parse as numbers before a string column is coerced.
pub const NUMERIC_COERCION_RATIO: f64 = 0.9;

#[derive(Debug, Error, PartialEq)]
pub enum CleanError {
    #[error("max shrink must be within [0, 1], got {0}")]
    InvalidMaxShrink(f64),
}

/// Validate a shrink ratio.
pub fn check_max_shrink(max_shrink: f64) -> Result<f64, CleanError> {
    if (0.0..=1.0).contains(&max_shrink) {
        Ok(max_shrink)
    } else {
        Err(CleanError::InvalidMaxShrink(max_shrink))
    }
}

/// Remove the columns and rows most affected by missing values.
///
/// At most `floor(max_shrink * columns)` columns and `floor(max_shrink * rows)` rows are removed.
/// Columns with a null density above [`COLUMN_NULL_DENSITY_THRESHOLD`] go first, densest first;
/// then rows containing nulls, most nulls first. Ties keep the earlier column/row.
pub fn drop_null(dataset: &DataSet, max_shrink: f64) -> Result<DataSet, CleanError> {
    let max_shrink = check_max_shrink(max_shrink)?;
    let row_total = dataset.row_count();
    let column_total = dataset.column_count();
    if max_shrink == 0.0 || row_total == 0 {
        return Ok(dataset.clone());
    }

    let column_budget = (max_shrink * column_total as f64).floor() as usize;
    let row_budget = (max_shrink * row_total as f64).floor() as usize;

    let mut dense_columns: Vec<(usize, f64)> = (0..column_total)
        .map(|idx| {
            let nulls = dataset.column(idx).filter(|v| v.is_null()).count();
            (idx, nulls as f64 / row_total as f64)
        })
        .filter(|(_, density)| *density > COLUMN_NULL_DENSITY_THRESHOLD)
        .collect();
    dense_columns.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let dropped_columns: HashSet<usize> = dense_columns
        .iter()
        .take(column_budget)
        .map(|(idx, _)| *idx)
        .collect();
    let kept: Vec<usize> = (0..column_total)
        .filter(|idx| !dropped_columns.contains(idx))
        .collect();
    let narrowed = dataset.select_columns(&kept);

    let mut null_rows: Vec<(usize, usize)> = narrowed
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| (idx, row.iter().filter(|v| v.is_null()).count()))
        .filter(|(_, nulls)| *nulls > 0)
        .collect();
    null_rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    let dropped_rows: HashSet<usize> = null_rows
        .iter()
        .take(row_budget)
        .map(|(idx, _)| *idx)
        .collect();

    let mut row_idx = 0;
    Ok(narrowed.filter_rows(|_| {
        let keep = !dropped_rows.contains(&row_idx);
        row_idx += 1;
        keep
    }))
}

/// Trim and lower-case string cells; blank strings become null. Row count is unchanged.
pub fn clean_string(dataset: &DataSet) -> DataSet {
    dataset.map_rows(dataset.schema.clone(), |row| {
        row.iter()
            .map(|v| match v {
                Value::Utf8(s) => {
                    let s = s.trim();
                    if s.is_empty() {
                        Value::Null
                    } else {
                        Value::Utf8(s.to_lowercase())
                    }
                }
                other => other.clone(),
            })
            .collect()
    })
}

/// Bring numeric columns to a canonical representation.
///
/// Non-finite floats become null. A string column where at least [`NUMERIC_COERCION_RATIO`] of
/// the non-null cells parse as numbers is converted to `Int64` (if every parsable cell is an
/// integer) or `Float64`; cells that do not parse become null.
pub fn clean_number(dataset: &DataSet) -> DataSet {
    let fields: Vec<Field> = dataset
        .schema
        .fields
        .iter()
        .enumerate()
        .map(|(idx, field)| match field.data_type {
            DataType::Utf8 => Field::new(field.name.clone(), numeric_target(dataset, idx)),
            _ => field.clone(),
        })
        .collect();
    let schema = Schema::new(fields);
    let types: Vec<DataType> = schema.fields.iter().map(|f| f.data_type).collect();

    dataset.map_rows(schema, |row| {
        row.iter()
            .zip(&types)
            .map(|(v, data_type)| match (v, data_type) {
                (Value::Float64(f), _) if !f.is_finite() => Value::Null,
                (Value::Utf8(_), DataType::Int64 | DataType::Float64) => {
                    match v.cast(*data_type) {
                        Value::Float64(f) if !f.is_finite() => Value::Null,
                        converted => converted,
                    }
                }
                (other, _) => other.clone(),
            })
            .collect()
    })
}

// Type a string column should be coerced to; `Utf8` when it is not numeric enough.
fn numeric_target(dataset: &DataSet, idx: usize) -> DataType {
    let mut non_null = 0usize;
    let mut numeric = 0usize;
    let mut all_int = true;

    for v in dataset.column(idx) {
        let Value::Utf8(s) = v else { continue };
        non_null += 1;
        let s = s.trim();
        if s.parse::<i64>().is_ok() {
            numeric += 1;
        } else if s.parse::<f64>().is_ok_and(f64::is_finite) {
            numeric += 1;
            all_int = false;
        }
    }

    if non_null == 0 || (numeric as f64) < NUMERIC_COERCION_RATIO * non_null as f64 {
        DataType::Utf8
    } else if all_int {
        DataType::Int64
    } else {
        DataType::Float64
    }
}

/// Full cleaning pass used by the clean stage.
pub fn clean(dataset: &DataSet, max_shrink: f64) -> Result<DataSet, CleanError> {
    let pruned = drop_null(dataset, max_shrink)?;
    Ok(clean_number(&clean_string(&pruned)))
}
