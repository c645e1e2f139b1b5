//! Dataset descriptors and per-column feature inference.
//!
//! A [`DatasetMetadata`] accompanies every stage result. Its feature list is re-derived from the
//! data; sample count and size are accumulated over every source file merged into the logical
//! dataset via [`DatasetMetadata::absorb`].

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{DataSet, DataType};

/// Feature type as reported to consumers of job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Int,
    Float,
    Str,
}

impl From<DataType> for FeatureType {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Int64 => FeatureType::Int,
            DataType::Float64 => FeatureType::Float,
            DataType::Bool | DataType::Utf8 => FeatureType::Str,
        }
    }
}

/// Sign/zero flags of a numeric column. Nulls are not observed values.
///
/// `contains_zero` is published as `non-zero`: it is set when at least one observed value is
/// zero. The wire name is kept for compatibility with existing result consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignFlags {
    /// Every observed value is `> 0`.
    pub positive: bool,
    /// Every observed value is `< 0`.
    pub negative: bool,
    /// At least one observed value is `== 0`.
    #[serde(rename = "non-zero")]
    pub contains_zero: bool,
    /// Every observed value is `== 0`.
    #[serde(rename = "all-zero")]
    pub all_zero: bool,
}

impl SignFlags {
    /// Single pass over the observed values of a column.
    ///
    /// A column without observed values gets all flags `false`.
    pub fn scan(values: impl IntoIterator<Item = f64>) -> Self {
        let mut seen = false;
        let mut flags = SignFlags {
            positive: true,
            negative: true,
            contains_zero: false,
            all_zero: true,
        };

        for v in values {
            seen = true;
            if v.is_nan() || v <= 0.0 {
                flags.positive = false;
            }
            if v.is_nan() || v >= 0.0 {
                flags.negative = false;
            }
            if v != 0.0 {
                flags.all_zero = false;
            }
            if v == 0.0 {
                flags.contains_zero = true;
            }
        }

        if seen { flags } else { SignFlags::default() }
    }
}

/// Per-column descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureType,
    /// Present only for numeric features.
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<SignFlags>,
}

/// Infer one [`Feature`] per column, in schema order.
///
/// Numeric columns are scanned in parallel, one column per task; the dataset is only read.
pub fn infer_features(dataset: &DataSet) -> Vec<Feature> {
    dataset
        .schema
        .fields
        .par_iter()
        .enumerate()
        .map(|(idx, field)| {
            let kind = FeatureType::from(field.data_type);
            let flags = field
                .data_type
                .is_numeric()
                .then(|| SignFlags::scan(dataset.column(idx).filter_map(|v| v.as_f64())));
            Feature {
                name: field.name.clone(),
                kind,
                flags,
            }
        })
        .collect()
}

/// Descriptor of a logical dataset produced by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub features: Vec<Feature>,
    pub name: String,
    pub source: String,
    pub location: String,
    pub usecase: String,
    /// Rows, summed over every absorbed source file.
    pub samples: u64,
    /// Approximate in-memory bytes, summed over every absorbed source file.
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DatasetMetadata {
    /// Empty descriptor for a dataset stored at `location`.
    pub fn new(location: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            features: Vec::new(),
            name: "Dataset".to_string(),
            source: "N/A".to_string(),
            location: location.into(),
            usecase: "N/A".to_string(),
            samples: 0,
            size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Descriptor of a single dataset.
    pub fn infer(dataset: &DataSet, location: impl Into<String>) -> Self {
        let mut md = Self::new(location);
        md.absorb(dataset);
        md
    }

    /// Merge one more source file into this descriptor.
    ///
    /// Samples and size accumulate; features are re-inferred from `dataset`.
    pub fn absorb(&mut self, dataset: &DataSet) {
        self.samples += dataset.row_count() as u64;
        self.size += dataset.approx_size_bytes() as u64;
        self.features = infer_features(dataset);
        self.updated_at = Utc::now().max(self.created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, Schema, Value};

    fn column(values: Vec<Value>, data_type: DataType) -> DataSet {
        DataSet::new(
            Schema::new(vec![Field::new("v", data_type)]),
            values.into_iter().map(|v| vec![v]).collect(),
        )
    }

    #[test]
    fn positive_int_column() {
        let ds = column(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)], DataType::Int64);
        let features = infer_features(&ds);

        assert_eq!(features[0].kind, FeatureType::Int);
        assert_eq!(
            features[0].flags,
            Some(SignFlags {
                positive: true,
                negative: false,
                contains_zero: false,
                all_zero: false,
            })
        );
    }

    #[test]
    fn all_zero_column_is_neither_positive_nor_negative() {
        let flags = SignFlags::scan([0.0, 0.0, -0.0]);
        assert!(flags.all_zero);
        assert!(flags.contains_zero);
        assert!(!flags.positive);
        assert!(!flags.negative);
    }

    #[test]
    fn mixed_signs_and_nulls() {
        let ds = column(
            vec![Value::Float64(-1.5), Value::Null, Value::Float64(0.0)],
            DataType::Float64,
        );
        let flags = infer_features(&ds)[0].flags.unwrap();
        assert_eq!(
            flags,
            SignFlags {
                positive: false,
                negative: false,
                contains_zero: true,
                all_zero: false,
            }
        );
    }

    #[test]
    fn nan_clears_both_sign_flags() {
        let flags = SignFlags::scan([1.0, f64::NAN, 2.0]);
        assert!(!flags.positive);
        assert!(!flags.negative);
        assert!(!flags.all_zero);

        let flags = SignFlags::scan([-1.0, f64::NAN]);
        assert!(!flags.negative);
    }

    #[test]
    fn empty_numeric_column_has_no_flags_set() {
        let ds = column(vec![Value::Null], DataType::Float64);
        assert_eq!(infer_features(&ds)[0].flags, Some(SignFlags::default()));
    }

    #[test]
    fn string_features_carry_no_flags_on_the_wire() {
        let ds = column(vec![Value::Utf8("a".into())], DataType::Utf8);
        let json = serde_json::to_value(&infer_features(&ds)).unwrap();
        assert_eq!(json, serde_json::json!([{ "name": "v", "type": "str" }]));
    }

    #[test]
    fn numeric_features_use_published_flag_names() {
        let ds = column(vec![Value::Int64(0)], DataType::Int64);
        let json = serde_json::to_value(&infer_features(&ds)[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "v",
                "type": "int",
                "positive": false,
                "negative": false,
                "non-zero": true,
                "all-zero": true,
            })
        );
    }

    #[test]
    fn absorb_accumulates_samples_and_size() {
        let a = column(vec![Value::Int64(1), Value::Int64(2)], DataType::Int64);
        let b = column(vec![Value::Int64(3)], DataType::Int64);

        let mut md = DatasetMetadata::new("bucket/out");
        md.absorb(&a);
        let size_after_a = md.size;
        md.absorb(&b);

        assert_eq!(md.samples, 3);
        assert!(md.size > size_after_a);
        assert!(md.updated_at >= md.created_at);
        assert_eq!(md.features.len(), 1);
    }
}
