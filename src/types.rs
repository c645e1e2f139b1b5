//! Core tabular data model.
//!
//! Every stage of the pipeline works on an in-memory [`DataSet`]: a [`Schema`] (ordered, typed
//! [`Field`]s) plus row-major [`Value`] storage. Column types are inferred when a dataset is read
//! (see [`crate::ingestion`]) and widened when datasets are concatenated or joined.

use std::fmt;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

impl DataType {
    /// Returns `true` for `Int64` and `Float64`.
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    /// Smallest type able to hold values of both `self` and `other`.
    ///
    /// Numeric types widen to `Float64`; any other mismatch widens to `Utf8`.
    pub fn widen(self, other: DataType) -> DataType {
        if self == other {
            self
        } else if self.is_numeric() && other.is_numeric() {
            DataType::Float64
        } else {
            DataType::Utf8
        }
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
}

impl Field {
    /// Create a new field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of fields describing the shape of a [`DataSet`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A single typed value in a [`DataSet`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Booleans and strings are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert the value to `data_type`.
    ///
    /// Conversions that cannot be represented (e.g. `"abc"` to `Int64`) yield [`Value::Null`].
    pub fn cast(&self, data_type: DataType) -> Value {
        match (self, data_type) {
            (Value::Null, _) => Value::Null,
            (Value::Int64(v), DataType::Int64) => Value::Int64(*v),
            (Value::Int64(v), DataType::Float64) => Value::Float64(*v as f64),
            (Value::Float64(v), DataType::Float64) => Value::Float64(*v),
            (Value::Float64(v), DataType::Int64) => {
                if v.fract() == 0.0 && v.is_finite() && v.abs() < i64::MAX as f64 {
                    Value::Int64(*v as i64)
                } else {
                    Value::Null
                }
            }
            (Value::Bool(b), DataType::Bool) => Value::Bool(*b),
            (Value::Bool(b), DataType::Int64) => Value::Int64(i64::from(*b)),
            (Value::Bool(b), DataType::Float64) => Value::Float64(if *b { 1.0 } else { 0.0 }),
            (Value::Utf8(s), DataType::Utf8) => Value::Utf8(s.clone()),
            (Value::Utf8(s), DataType::Int64) => {
                s.trim().parse::<i64>().map(Value::Int64).unwrap_or(Value::Null)
            }
            (Value::Utf8(s), DataType::Float64) => {
                s.trim().parse::<f64>().map(Value::Float64).unwrap_or(Value::Null)
            }
            (Value::Utf8(s), DataType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            },
            (v, DataType::Utf8) => Value::Utf8(v.to_string()),
            (Value::Int64(_) | Value::Float64(_), DataType::Bool) => Value::Null,
        }
    }

    /// Approximate number of bytes this value occupies in memory, including string heap data.
    pub fn approx_size(&self) -> usize {
        let inline = std::mem::size_of::<Value>();
        match self {
            Value::Utf8(s) => inline + s.capacity(),
            _ => inline,
        }
    }
}

impl fmt::Display for Value {
    /// Renders the value the way it is written to CSV; `Null` renders as an empty field.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Utf8(s) => f.write_str(s),
        }
    }
}

/// In-memory tabular dataset.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as the [`Schema`] fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    /// Schema describing row shape.
    pub schema: Schema,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
}

impl DataSet {
    /// Create a dataset from schema and rows.
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self { schema, rows }
    }

    /// A dataset with the given columns and no rows.
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Number of rows in the dataset.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns in the dataset.
    pub fn column_count(&self) -> usize {
        self.schema.len()
    }

    /// Returns `true` when there are no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.schema.is_empty()
    }

    /// Iterate the values of column `idx` in row order.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().filter_map(move |row| row.get(idx))
    }

    /// Approximate in-memory size in bytes (sum over all cells).
    pub fn approx_size_bytes(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .map(Value::approx_size)
            .sum()
    }

    /// Create a new dataset containing only rows that match `predicate`.
    ///
    /// The returned dataset preserves the original schema.
    pub fn filter_rows<F>(&self, mut predicate: F) -> Self
    where
        F: FnMut(&[Value]) -> bool,
    {
        let rows = self
            .rows
            .iter()
            .filter(|row| predicate(row.as_slice()))
            .cloned()
            .collect();
        Self {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Create a new dataset by applying `mapper` to every row, under a new schema.
    ///
    /// # Panics
    ///
    /// Panics if `mapper` returns a row with a different length than `schema`.
    pub fn map_rows<F>(&self, schema: Schema, mut mapper: F) -> Self
    where
        F: FnMut(&[Value]) -> Vec<Value>,
    {
        let expected_len = schema.len();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let out = mapper(row.as_slice());
                assert!(
                    out.len() == expected_len,
                    "mapped row length {} does not match schema length {}",
                    out.len(),
                    expected_len
                );
                out
            })
            .collect();

        Self { schema, rows }
    }

    /// Keep only the columns at `indices`, in the given order.
    pub fn select_columns(&self, indices: &[usize]) -> Self {
        let fields = indices
            .iter()
            .filter_map(|&i| self.schema.fields.get(i).cloned())
            .collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self {
            schema: Schema::new(fields),
            rows,
        }
    }

    /// Stack datasets vertically, aligning columns by name.
    ///
    /// The result has the union of all columns in first-seen order. Columns missing from a part
    /// are filled with nulls; columns whose types disagree are widened with [`DataType::widen`].
    pub fn concat(parts: &[DataSet]) -> Self {
        let mut fields: Vec<Field> = Vec::new();
        for part in parts {
            for field in &part.schema.fields {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) => existing.data_type = existing.data_type.widen(field.data_type),
                    None => fields.push(field.clone()),
                }
            }
        }

        let schema = Schema::new(fields);
        let mut rows = Vec::with_capacity(parts.iter().map(DataSet::row_count).sum());
        for part in parts {
            let mapping: Vec<Option<usize>> = schema
                .fields
                .iter()
                .map(|f| part.schema.index_of(&f.name))
                .collect();
            for row in &part.rows {
                let out = mapping
                    .iter()
                    .zip(&schema.fields)
                    .map(|(src, field)| match src.and_then(|i| row.get(i)) {
                        Some(v) => v.cast(field.data_type),
                        None => Value::Null,
                    })
                    .collect();
                rows.push(out);
            }
        }

        Self { schema, rows }
    }
}
