use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::models::VariantKey;

/// A single annotation value.
///
/// Floats compare by bit pattern so that a value read back from disk is
/// equal to the value written only when every bit survived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Flag(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    ///
    /// Infer a typed value from a raw text field.
    ///
    /// `.` and the empty string are nulls; `true`/`false` are flags; anything
    /// that parses as an integer or a finite float becomes numeric; the rest
    /// is kept as text.
    ///
    pub fn infer(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "" | "." => FieldValue::Null,
            "true" => FieldValue::Flag(true),
            "false" => FieldValue::Flag(false),
            _ => {
                if let Ok(i) = raw.parse::<i64>() {
                    FieldValue::Integer(i)
                } else if let Some(f) = raw.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Text(raw.to_string())
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Null, FieldValue::Null) => true,
            (FieldValue::Flag(a), FieldValue::Flag(b)) => a == b,
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Text(a), FieldValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "."),
            FieldValue::Flag(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Field name -> value for one annotation source.
pub type AnnotationPayload = BTreeMap<String, FieldValue>;

///
/// AnnotationRecord struct, a variant key plus the annotations each
/// reference source attaches to it (e.g. `clinvar` -> {significance, review}).
///
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub key: VariantKey,
    pub annotations: BTreeMap<String, AnnotationPayload>,
}

impl AnnotationRecord {
    pub fn new(key: VariantKey) -> Self {
        AnnotationRecord {
            key,
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style helper to set a whole payload for a source.
    pub fn with_payload(mut self, source: &str, payload: AnnotationPayload) -> Self {
        self.annotations.insert(source.to_string(), payload);
        self
    }

    /// Builder-style helper to set a single field.
    pub fn with_field(mut self, source: &str, field: &str, value: FieldValue) -> Self {
        self.insert_field(source, field, value);
        self
    }

    pub fn insert_field(&mut self, source: &str, field: &str, value: FieldValue) {
        self.annotations
            .entry(source.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    pub fn field(&self, source: &str, field: &str) -> Option<&FieldValue> {
        self.annotations.get(source).and_then(|p| p.get(field))
    }

    /// First value of `field` across all sources, in source-name order.
    pub fn find_field(&self, field: &str) -> Option<&FieldValue> {
        self.annotations.values().find_map(|p| p.get(field))
    }

    ///
    /// Merge another record for the same key into this one. Fields present in
    /// both are taken from `other`.
    ///
    pub fn merge(&mut self, other: AnnotationRecord) {
        debug_assert_eq!(self.key, other.key);
        for (source, payload) in other.annotations {
            self.annotations.entry(source).or_default().extend(payload);
        }
    }

    /// Total number of fields across every source.
    pub fn field_count(&self) -> usize {
        self.annotations.values().map(|p| p.len()).sum()
    }
}
