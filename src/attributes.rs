use crate::error::{FeatureError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type tag of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    String,
    Int,
    Long,
    Double,
    Blob,
    StringArray,
    IntArray,
    LongArray,
    DoubleArray,
    BlobArray,
    AttributeSet,
}

/// A typed attribute value. `None` payloads are "null of type T", which is
/// distinct from the key being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    String(Option<String>),
    Int(Option<i32>),
    Long(Option<i64>),
    Double(Option<f64>),
    Blob(Option<Vec<u8>>),
    StringArray(Option<Vec<String>>),
    IntArray(Option<Vec<i32>>),
    LongArray(Option<Vec<i64>>),
    DoubleArray(Option<Vec<f64>>),
    BlobArray(Option<Vec<Vec<u8>>>),
    AttributeSet(Option<AttributeSet>),
}

impl AttributeValue {
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Int(_) => AttributeType::Int,
            AttributeValue::Long(_) => AttributeType::Long,
            AttributeValue::Double(_) => AttributeType::Double,
            AttributeValue::Blob(_) => AttributeType::Blob,
            AttributeValue::StringArray(_) => AttributeType::StringArray,
            AttributeValue::IntArray(_) => AttributeType::IntArray,
            AttributeValue::LongArray(_) => AttributeType::LongArray,
            AttributeValue::DoubleArray(_) => AttributeType::DoubleArray,
            AttributeValue::BlobArray(_) => AttributeType::BlobArray,
            AttributeValue::AttributeSet(_) => AttributeType::AttributeSet,
        }
    }

    /// The null value of the given type.
    pub fn null(ty: AttributeType) -> Self {
        match ty {
            AttributeType::String => AttributeValue::String(None),
            AttributeType::Int => AttributeValue::Int(None),
            AttributeType::Long => AttributeValue::Long(None),
            AttributeType::Double => AttributeValue::Double(None),
            AttributeType::Blob => AttributeValue::Blob(None),
            AttributeType::StringArray => AttributeValue::StringArray(None),
            AttributeType::IntArray => AttributeValue::IntArray(None),
            AttributeType::LongArray => AttributeValue::LongArray(None),
            AttributeType::DoubleArray => AttributeValue::DoubleArray(None),
            AttributeType::BlobArray => AttributeValue::BlobArray(None),
            AttributeType::AttributeSet => AttributeValue::AttributeSet(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            AttributeValue::String(v) => v.is_none(),
            AttributeValue::Int(v) => v.is_none(),
            AttributeValue::Long(v) => v.is_none(),
            AttributeValue::Double(v) => v.is_none(),
            AttributeValue::Blob(v) => v.is_none(),
            AttributeValue::StringArray(v) => v.is_none(),
            AttributeValue::IntArray(v) => v.is_none(),
            AttributeValue::LongArray(v) => v.is_none(),
            AttributeValue::DoubleArray(v) => v.is_none(),
            AttributeValue::BlobArray(v) => v.is_none(),
            AttributeValue::AttributeSet(v) => v.is_none(),
        }
    }
}

/// Ordered key to typed value map carried by every feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    values: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.values.insert(key.into(), value);
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, AttributeValue::String(Some(value.into())));
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i32) {
        self.set(key, AttributeValue::Int(Some(value)));
    }

    pub fn set_long(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, AttributeValue::Long(Some(value)));
    }

    pub fn set_double(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, AttributeValue::Double(Some(value)));
    }

    pub fn set_blob(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.set(key, AttributeValue::Blob(Some(value)));
    }

    pub fn set_attribute_set(&mut self, key: impl Into<String>, value: AttributeSet) {
        self.set(key, AttributeValue::AttributeSet(Some(value)));
    }

    /// Store an explicit null of the given type.
    pub fn set_null(&mut self, key: impl Into<String>, ty: AttributeType) {
        self.set(key, AttributeValue::null(ty));
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn attribute_type(&self, key: &str) -> Option<AttributeType> {
        self.values.get(key).map(AttributeValue::attribute_type)
    }

    fn typed(&self, key: &str) -> Result<&AttributeValue> {
        self.values
            .get(key)
            .ok_or_else(|| FeatureError::not_found(format!("attribute {}", key)))
    }

    fn mismatch(key: &str, expected: AttributeType, actual: &AttributeValue) -> FeatureError {
        FeatureError::invalid(format!(
            "attribute {} is {:?}, not {:?}",
            key,
            actual.attribute_type(),
            expected
        ))
    }

    pub fn get_string(&self, key: &str) -> Result<Option<&str>> {
        match self.typed(key)? {
            AttributeValue::String(v) => Ok(v.as_deref()),
            other => Err(Self::mismatch(key, AttributeType::String, other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i32>> {
        match self.typed(key)? {
            AttributeValue::Int(v) => Ok(*v),
            other => Err(Self::mismatch(key, AttributeType::Int, other)),
        }
    }

    pub fn get_long(&self, key: &str) -> Result<Option<i64>> {
        match self.typed(key)? {
            AttributeValue::Long(v) => Ok(*v),
            other => Err(Self::mismatch(key, AttributeType::Long, other)),
        }
    }

    pub fn get_double(&self, key: &str) -> Result<Option<f64>> {
        match self.typed(key)? {
            AttributeValue::Double(v) => Ok(*v),
            other => Err(Self::mismatch(key, AttributeType::Double, other)),
        }
    }

    pub fn get_blob(&self, key: &str) -> Result<Option<&[u8]>> {
        match self.typed(key)? {
            AttributeValue::Blob(v) => Ok(v.as_deref()),
            other => Err(Self::mismatch(key, AttributeType::Blob, other)),
        }
    }

    pub fn get_attribute_set(&self, key: &str) -> Result<Option<&AttributeSet>> {
        match self.typed(key)? {
            AttributeValue::AttributeSet(v) => Ok(v.as_ref()),
            other => Err(Self::mismatch(key, AttributeType::AttributeSet, other)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<AttributeValue> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
