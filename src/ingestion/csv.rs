//! CSV reading and writing.
//!
//! Reading infers a type for every column from its raw cells (see [`infer_column_type`]);
//! writing produces the canonical export used for every stage output: UTF-8, comma separated,
//! header row present.

use std::io::Read;

use crate::error::{IngestionError, IngestionResult};
use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Cell contents treated as missing values.
const NULL_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "NULL", "null", "None", "<NA>", "#N/A",
];

/// Options for reading delimited text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    /// Field delimiter.
    pub separator: u8,
    /// Whether the first line holds column labels.
    pub has_headers: bool,
    /// Column labels to use when `has_headers` is `false`.
    ///
    /// Missing labels are generated as `column_<index>`.
    pub labels: Vec<String>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: b',',
            has_headers: true,
            labels: Vec::new(),
        }
    }
}

impl CsvOptions {
    /// Build options from a user-supplied separator string.
    ///
    /// An empty separator falls back to `,`; a multi-byte separator is rejected.
    pub fn with_separator(separator: &str) -> IngestionResult<Self> {
        let separator = match separator.as_bytes() {
            [] => b',',
            [b] => *b,
            _ if separator == "\\t" => b'\t',
            _ => {
                return Err(IngestionError::SchemaMismatch {
                    message: format!("separator must be a single byte, got '{separator}'"),
                });
            }
        };
        Ok(Self {
            separator,
            ..Default::default()
        })
    }
}

/// Read CSV bytes into a [`DataSet`], inferring column types.
pub fn read_csv_from_bytes(input: &[u8], options: &CsvOptions) -> IngestionResult<DataSet> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(options.separator)
        .has_headers(options.has_headers)
        .from_reader(input);
    read_csv_from_reader(&mut rdr, options)
}

/// Read CSV data from an existing reader, inferring column types.
pub fn read_csv_from_reader<R: Read>(
    rdr: &mut csv::Reader<R>,
    options: &CsvOptions,
) -> IngestionResult<DataSet> {
    let headers: Vec<String> = if options.has_headers {
        rdr.headers()?.iter().map(|h| h.trim().to_string()).collect()
    } else {
        Vec::new()
    };

    let mut records: Vec<csv::StringRecord> = Vec::new();
    for result in rdr.records() {
        records.push(result?);
    }

    let names = if options.has_headers {
        headers
    } else {
        let width = records
            .first()
            .map(|r| r.len())
            .unwrap_or(options.labels.len());
        label_columns(&options.labels, width)
    };
    let names = dedupe_names(names);

    let types: Vec<DataType> = (0..names.len())
        .map(|idx| infer_column_type(records.iter().map(|r| r.get(idx).unwrap_or(""))))
        .collect();

    let rows = records
        .iter()
        .map(|record| {
            types
                .iter()
                .enumerate()
                .map(|(idx, data_type)| parse_cell(record.get(idx).unwrap_or(""), *data_type))
                .collect()
        })
        .collect();

    let fields = names
        .into_iter()
        .zip(types)
        .map(|(name, data_type)| Field::new(name, data_type))
        .collect();

    Ok(DataSet::new(Schema::new(fields), rows))
}

/// Serialize a dataset as UTF-8 CSV with a header row.
pub fn write_csv(dataset: &DataSet) -> IngestionResult<Vec<u8>> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(dataset.schema.field_names())?;
    for row in &dataset.rows {
        wtr.write_record(row.iter().map(|v| v.to_string()))?;
    }
    wtr.into_inner().map_err(|e| IngestionError::Io(e.into_error()))
}

/// Infer a column type from raw cells.
///
/// `Int64` if every non-null cell is an integer, `Float64` if every non-null cell is numeric,
/// `Bool` if every non-null cell is `true`/`false`, otherwise `Utf8`. A column with no
/// non-null cells is `Float64`.
pub fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> DataType {
    let mut any = false;
    let mut all_int = true;
    let mut all_float = true;
    let mut all_bool = true;

    for raw in cells {
        let cell = raw.trim();
        if is_null_token(cell) {
            continue;
        }
        any = true;
        if all_int && cell.parse::<i64>().is_err() {
            all_int = false;
        }
        if all_float && cell.parse::<f64>().is_err() {
            all_float = false;
        }
        if all_bool && parse_bool(cell).is_none() {
            all_bool = false;
        }
        if !all_int && !all_float && !all_bool {
            break;
        }
    }

    if !any || (!all_int && all_float) {
        DataType::Float64
    } else if all_int {
        DataType::Int64
    } else if all_bool {
        DataType::Bool
    } else {
        DataType::Utf8
    }
}

pub(crate) fn is_null_token(cell: &str) -> bool {
    NULL_TOKENS.contains(&cell)
}

fn parse_cell(raw: &str, data_type: DataType) -> Value {
    let trimmed = raw.trim();
    if is_null_token(trimmed) {
        return Value::Null;
    }
    match data_type {
        DataType::Int64 => trimmed.parse().map(Value::Int64).unwrap_or(Value::Null),
        DataType::Float64 => trimmed.parse().map(Value::Float64).unwrap_or(Value::Null),
        DataType::Bool => parse_bool(trimmed).map(Value::Bool).unwrap_or(Value::Null),
        DataType::Utf8 => Value::Utf8(raw.to_string()),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn label_columns(labels: &[String], width: usize) -> Vec<String> {
    (0..width.max(labels.len()))
        .map(|i| match labels.get(i) {
            Some(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => format!("column_{i}"),
        })
        .collect()
}

// Repeated labels get a `.N` suffix so columns stay addressable by name.
fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut n = 1;
        while out.contains(&candidate) {
            candidate = format!("{name}.{n}");
            n += 1;
        }
        out.push(candidate);
    }
    out
}
