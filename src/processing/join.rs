//! Relational join of datasets on a shared column.
//!
//! [`join_pair`] is the binary primitive. [`join_all`] folds a list of inputs left to right with
//! it; for `left`/`right` modes the result depends on input order, which is taken as given.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DataSet, DataType, Field, Schema, Value};

/// Which keys survive a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum JoinMode {
    /// Keys present on both sides.
    Inner,
    /// Every key of the left (accumulated) side.
    Left,
    /// Every key of the right (newest) side.
    Right,
    /// Union of keys.
    Outer,
}

impl TryFrom<String> for JoinMode {
    type Error = JoinError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for JoinMode {
    type Err = JoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinMode::Inner),
            "left" => Ok(JoinMode::Left),
            "right" => Ok(JoinMode::Right),
            "outer" | "full" => Ok(JoinMode::Outer),
            other => Err(JoinError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for JoinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinMode::Inner => "inner",
            JoinMode::Left => "left",
            JoinMode::Right => "right",
            JoinMode::Outer => "outer",
        };
        f.write_str(s)
    }
}

/// What [`join_all`] does with an input that lacks the join column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingColumnPolicy {
    /// Reject the whole join.
    #[default]
    Fail,
    /// Treat the input as contributing no rows.
    Skip,
}

#[derive(Debug, Error, PartialEq)]
pub enum JoinError {
    #[error("join requires at least one input")]
    NoInputs,

    #[error("join column '{column}' is missing from input {input}")]
    MissingColumn { column: String, input: usize },

    #[error("unknown join mode '{0}'")]
    UnknownMode(String),
}

// Hashable form of a key cell. Integral floats hash like integers so `2` matches `2.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum JoinKey {
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
}

fn join_key(v: &Value) -> Option<JoinKey> {
    match v {
        Value::Null => None,
        Value::Int64(i) => Some(JoinKey::Int(*i)),
        Value::Float64(f) if f.is_nan() => None,
        Value::Float64(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
            Some(JoinKey::Int(*f as i64))
        }
        Value::Float64(f) => Some(JoinKey::Float(f.to_bits())),
        Value::Bool(b) => Some(JoinKey::Bool(*b)),
        Value::Utf8(s) => Some(JoinKey::Str(s.clone())),
    }
}

// Key of a cell after casting it to the join column's widened type, so both sides compare alike.
fn cast_key(v: &Value, key_type: DataType) -> Option<JoinKey> {
    join_key(&v.cast(key_type))
}

fn index_by_key(
    dataset: &DataSet,
    key_idx: usize,
    key_type: DataType,
) -> HashMap<JoinKey, Vec<usize>> {
    let mut index: HashMap<JoinKey, Vec<usize>> = HashMap::new();
    for (row_idx, row) in dataset.rows.iter().enumerate() {
        if let Some(key) = row.get(key_idx).and_then(|v| cast_key(v, key_type)) {
            index.entry(key).or_default().push(row_idx);
        }
    }
    index
}

/// Join `right` onto `left` by `column`.
///
/// The result keeps the left columns in order (the join column in its left position), followed
/// by the right non-join columns. A right column whose name is already taken is renamed to
/// `<name>_<right_index>`. Null keys never match.
///
/// Row order: `inner`/`left` follow the left side, `right` follows the right side, `outer` is the
/// left-ordered result followed by unmatched right rows.
pub fn join_pair(
    left: &DataSet,
    right: &DataSet,
    column: &str,
    mode: JoinMode,
    right_index: usize,
) -> Result<DataSet, JoinError> {
    let lk = left
        .schema
        .index_of(column)
        .ok_or_else(|| JoinError::MissingColumn {
            column: column.to_string(),
            input: 0,
        })?;
    let rk = right
        .schema
        .index_of(column)
        .ok_or_else(|| JoinError::MissingColumn {
            column: column.to_string(),
            input: right_index,
        })?;

    let key_type = left.schema.fields[lk]
        .data_type
        .widen(right.schema.fields[rk].data_type);

    let mut fields: Vec<Field> = left.schema.fields.clone();
    fields[lk].data_type = key_type;
    let mut taken: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
    let right_cols: Vec<usize> = (0..right.column_count()).filter(|&i| i != rk).collect();
    for &i in &right_cols {
        let field = &right.schema.fields[i];
        let mut name = field.name.clone();
        while taken.contains(&name) {
            name = format!("{name}_{right_index}");
        }
        taken.insert(name.clone());
        fields.push(Field::new(name, field.data_type));
    }
    let left_width = left.column_count();

    let emit = |l: Option<&Vec<Value>>, r: Option<&Vec<Value>>| -> Vec<Value> {
        let mut out: Vec<Value> = match l {
            Some(row) => row.clone(),
            None => vec![Value::Null; left_width],
        };
        let key = l
            .and_then(|row| row.get(lk))
            .filter(|v| !v.is_null())
            .or_else(|| r.and_then(|row| row.get(rk)))
            .cloned()
            .unwrap_or(Value::Null);
        out[lk] = key.cast(key_type);
        out.extend(
            right_cols
                .iter()
                .map(|&i| r.and_then(|row| row.get(i)).cloned().unwrap_or(Value::Null)),
        );
        out
    };

    let mut rows: Vec<Vec<Value>> = Vec::new();
    match mode {
        JoinMode::Inner | JoinMode::Left | JoinMode::Outer => {
            let index = index_by_key(right, rk, key_type);
            let mut matched_right: HashSet<usize> = HashSet::new();
            for lrow in &left.rows {
                let matches = lrow
                    .get(lk)
                    .and_then(|v| cast_key(v, key_type))
                    .and_then(|k| index.get(&k));
                match matches {
                    Some(hits) => {
                        for &r in hits {
                            matched_right.insert(r);
                            rows.push(emit(Some(lrow), Some(&right.rows[r])));
                        }
                    }
                    None if mode != JoinMode::Inner => rows.push(emit(Some(lrow), None)),
                    None => {}
                }
            }
            if mode == JoinMode::Outer {
                for (r, rrow) in right.rows.iter().enumerate() {
                    if !matched_right.contains(&r) {
                        rows.push(emit(None, Some(rrow)));
                    }
                }
            }
        }
        JoinMode::Right => {
            let index = index_by_key(left, lk, key_type);
            for rrow in &right.rows {
                let matches = rrow
                    .get(rk)
                    .and_then(|v| cast_key(v, key_type))
                    .and_then(|k| index.get(&k));
                match matches {
                    Some(hits) => {
                        for &l in hits {
                            rows.push(emit(Some(&left.rows[l]), Some(rrow)));
                        }
                    }
                    None => rows.push(emit(None, Some(rrow))),
                }
            }
        }
    }

    Ok(DataSet::new(Schema::new(fields), rows))
}

/// Fold `inputs` left to right with [`join_pair`].
pub fn join_all(
    inputs: &[DataSet],
    column: &str,
    mode: JoinMode,
    policy: MissingColumnPolicy,
) -> Result<DataSet, JoinError> {
    let key_type = inputs
        .iter()
        .find_map(|ds| ds.schema.index_of(column).map(|i| ds.schema.fields[i].data_type))
        .unwrap_or(DataType::Utf8);

    let prepared: Vec<DataSet> = inputs
        .iter()
        .enumerate()
        .map(|(input, ds)| match (ds.schema.index_of(column), policy) {
            (Some(_), _) => Ok(ds.clone()),
            (None, MissingColumnPolicy::Skip) => Ok(without_rows_keyed(ds, column, key_type)),
            (None, MissingColumnPolicy::Fail) => Err(JoinError::MissingColumn {
                column: column.to_string(),
                input,
            }),
        })
        .collect::<Result<_, _>>()?;

    let mut iter = prepared.into_iter().enumerate();
    let (_, mut acc) = iter.next().ok_or(JoinError::NoInputs)?;
    for (right_index, right) in iter {
        acc = join_pair(&acc, &right, column, mode, right_index)?;
    }
    Ok(acc)
}

// Same columns plus the join column, no rows.
fn without_rows_keyed(dataset: &DataSet, column: &str, key_type: DataType) -> DataSet {
    let mut fields = vec![Field::new(column, key_type)];
    fields.extend(dataset.schema.fields.iter().cloned());
    DataSet::empty(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds(names: &[&str], rows: Vec<Vec<Value>>) -> DataSet {
        let fields = names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let data_type = rows
                    .iter()
                    .find_map(|r| match &r[i] {
                        Value::Int64(_) => Some(DataType::Int64),
                        Value::Float64(_) => Some(DataType::Float64),
                        Value::Utf8(_) => Some(DataType::Utf8),
                        _ => None,
                    })
                    .unwrap_or(DataType::Utf8);
                Field::new(*n, data_type)
            })
            .collect();
        DataSet::new(Schema::new(fields), rows)
    }

    fn i(v: i64) -> Value {
        Value::Int64(v)
    }

    fn s(v: &str) -> Value {
        Value::Utf8(v.to_string())
    }

    fn a() -> DataSet {
        ds(&["id", "x"], vec![vec![i(1), s("a1")], vec![i(2), s("a2")], vec![i(3), s("a3")]])
    }

    fn b() -> DataSet {
        ds(&["id", "y"], vec![vec![i(2), s("b2")], vec![i(3), s("b3")], vec![i(4), s("b4")]])
    }

    fn ids(out: &DataSet) -> Vec<Value> {
        out.column(0).cloned().collect()
    }

    #[test]
    fn inner_keeps_matching_keys_only() {
        let out = join_pair(&a(), &b(), "id", JoinMode::Inner, 1).unwrap();
        assert_eq!(out.schema.field_names().collect::<Vec<_>>(), vec!["id", "x", "y"]);
        assert_eq!(ids(&out), vec![i(2), i(3)]);
        assert_eq!(out.rows[0], vec![i(2), s("a2"), s("b2")]);
    }

    #[test]
    fn outer_keeps_the_union_with_nulls() {
        let out = join_pair(&a(), &b(), "id", JoinMode::Outer, 1).unwrap();
        assert_eq!(ids(&out), vec![i(1), i(2), i(3), i(4)]);
        assert_eq!(out.rows[0], vec![i(1), s("a1"), Value::Null]);
        assert_eq!(out.rows[3], vec![i(4), Value::Null, s("b4")]);
    }

    #[test]
    fn left_and_right_keep_their_side() {
        let left = join_pair(&a(), &b(), "id", JoinMode::Left, 1).unwrap();
        assert_eq!(ids(&left), vec![i(1), i(2), i(3)]);

        let right = join_pair(&a(), &b(), "id", JoinMode::Right, 1).unwrap();
        assert_eq!(ids(&right), vec![i(2), i(3), i(4)]);
        assert_eq!(right.rows[2], vec![i(4), Value::Null, s("b4")]);
    }

    #[test]
    fn colliding_columns_get_the_source_index() {
        let c = ds(&["id", "x"], vec![vec![i(2), s("c2")]]);
        let out = join_all(&[a(), b(), c], "id", JoinMode::Inner, MissingColumnPolicy::Fail).unwrap();
        assert_eq!(
            out.schema.field_names().collect::<Vec<_>>(),
            vec!["id", "x", "y", "x_2"]
        );
        assert_eq!(out.rows, vec![vec![i(2), s("a2"), s("b2"), s("c2")]]);
    }

    #[test]
    fn integral_float_keys_match_integers() {
        let f = ds(&["id", "z"], vec![vec![Value::Float64(3.0), s("z3")]]);
        let out = join_pair(&a(), &f, "id", JoinMode::Inner, 1).unwrap();
        assert_eq!(out.rows, vec![vec![Value::Float64(3.0), s("a3"), s("z3")]]);
    }

    #[test]
    fn null_keys_never_match() {
        let l = ds(&["id", "x"], vec![vec![Value::Null, s("l")], vec![i(1), s("one")]]);
        let r = ds(&["id", "y"], vec![vec![Value::Null, s("r")]]);
        let out = join_pair(&l, &r, "id", JoinMode::Inner, 1).unwrap();
        assert!(out.rows.is_empty());
    }

    #[test]
    fn missing_column_fails_by_default() {
        let no_id = ds(&["k"], vec![vec![i(1)]]);
        let err = join_all(&[a(), no_id], "id", JoinMode::Inner, MissingColumnPolicy::Fail)
            .unwrap_err();
        assert_eq!(
            err,
            JoinError::MissingColumn {
                column: "id".to_string(),
                input: 1
            }
        );
    }

    #[test]
    fn skipped_input_contributes_no_rows() {
        let no_id = ds(&["k"], vec![vec![i(1)]]);
        let inner = join_all(&[a(), no_id.clone()], "id", JoinMode::Inner, MissingColumnPolicy::Skip)
            .unwrap();
        assert!(inner.rows.is_empty());

        let left = join_all(&[a(), no_id], "id", JoinMode::Left, MissingColumnPolicy::Skip).unwrap();
        assert_eq!(left.row_count(), 3);
        assert_eq!(left.schema.field_names().collect::<Vec<_>>(), vec!["id", "x", "k"]);
    }

    #[test]
    fn empty_input_list_is_an_error() {
        let err = join_all(&[], "id", JoinMode::Inner, MissingColumnPolicy::Fail).unwrap_err();
        assert_eq!(err, JoinError::NoInputs);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("OUTER".parse::<JoinMode>().unwrap(), JoinMode::Outer);
        assert!("cross".parse::<JoinMode>().is_err());
    }

    #[test]
    fn mode_deserializes_like_it_parses() {
        let modes: Vec<JoinMode> =
            serde_json::from_str(r#"["INNER", "Full", " left ", "outer"]"#).unwrap();
        assert_eq!(
            modes,
            vec![JoinMode::Inner, JoinMode::Outer, JoinMode::Left, JoinMode::Outer]
        );
        assert!(serde_json::from_str::<JoinMode>(r#""cross""#).is_err());
        assert_eq!(serde_json::to_string(&JoinMode::Outer).unwrap(), r#""outer""#);
    }

    #[test]
    fn keys_of_different_types_match_after_widening() {
        let l = ds(&["id", "x"], vec![vec![i(1), s("a")], vec![i(2), s("b")]]);
        let r = ds(&["id", "y"], vec![vec![s("2"), s("two")], vec![s("x7"), s("bad")]]);

        let inner = join_pair(&l, &r, "id", JoinMode::Inner, 1).unwrap();
        assert_eq!(inner.schema.fields[0].data_type, DataType::Utf8);
        assert_eq!(inner.rows, vec![vec![s("2"), s("b"), s("two")]]);

        let right = join_pair(&l, &r, "id", JoinMode::Right, 1).unwrap();
        assert_eq!(
            right.rows,
            vec![
                vec![s("2"), s("b"), s("two")],
                vec![s("x7"), Value::Null, s("bad")],
            ]
        );
    }

    fn c() -> DataSet {
        ds(&["id", "z"], vec![vec![i(3), s("c3")], vec![i(4), s("c4")], vec![i(5), s("c5")]])
    }

    #[test]
    fn left_fold_keeps_the_first_inputs_keys() {
        let out = join_all(&[a(), b(), c()], "id", JoinMode::Left, MissingColumnPolicy::Fail).unwrap();
        assert_eq!(out.schema.field_names().collect::<Vec<_>>(), vec!["id", "x", "y", "z"]);
        assert_eq!(
            out.rows,
            vec![
                vec![i(1), s("a1"), Value::Null, Value::Null],
                vec![i(2), s("a2"), s("b2"), Value::Null],
                vec![i(3), s("a3"), s("b3"), s("c3")],
            ]
        );
    }

    #[test]
    fn right_fold_keeps_the_last_inputs_keys() {
        let out = join_all(&[a(), b(), c()], "id", JoinMode::Right, MissingColumnPolicy::Fail).unwrap();
        assert_eq!(
            out.rows,
            vec![
                vec![i(3), s("a3"), s("b3"), s("c3")],
                vec![i(4), Value::Null, s("b4"), s("c4")],
                vec![i(5), Value::Null, Value::Null, s("c5")],
            ]
        );
    }

    #[test]
    fn fold_order_decides_left_join_keys() {
        let out = join_all(&[c(), b(), a()], "id", JoinMode::Left, MissingColumnPolicy::Fail).unwrap();
        assert_eq!(out.schema.field_names().collect::<Vec<_>>(), vec!["id", "z", "y", "x"]);
        assert_eq!(
            out.rows,
            vec![
                vec![i(3), s("c3"), s("b3"), s("a3")],
                vec![i(4), s("c4"), s("b4"), Value::Null],
                vec![i(5), s("c5"), Value::Null, Value::Null],
            ]
        );
    }
}
