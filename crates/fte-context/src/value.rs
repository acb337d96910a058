//! Structured values carried by contexts, dependency results and logic.
//!
//! [`Value`] is the single data model shared by the normalizer, the schema
//! validator, the logic interpreter and the sandbox wire protocol.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::NormalizeError;

/// A structured value
///
/// Numbers come in three flavours so that fixed-point amounts never pass
/// through binary floating point on their way into a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Binary floating point
    Float(f64),
    /// Fixed-point decimal
    Decimal(Decimal),
    /// Text
    Text(String),
    /// Calendar date
    Date(NaiveDate),
    /// Instant in UTC
    Timestamp(DateTime<Utc>),
    /// Ordered sequence
    Seq(Vec<Value>),
    /// String-keyed mapping
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Short name of the value's kind, used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) | Self::Decimal(_) => "number",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
            Self::Seq(_) => "sequence",
            Self::Map(_) => "mapping",
        }
    }

    /// Whether the value is numeric
    #[inline]
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_) | Self::Decimal(_))
    }

    /// Numeric value as `f64`
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    /// Numeric value as a decimal, when exactly representable
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Int(i) => Some(Decimal::from(*i)),
            Self::Decimal(d) => Some(*d),
            Self::Float(f) => Decimal::from_f64(*f),
            _ => None,
        }
    }

    /// Text content, if this is text
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used by boolean operators and conditions
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Decimal(d) => !d.is_zero(),
            Self::Text(s) => !s.is_empty(),
            Self::Date(_) | Self::Timestamp(_) => true,
            Self::Seq(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
        }
    }

    /// Convert from a JSON document
    ///
    /// Integers that fit `i64` become [`Value::Int`], larger integers become
    /// decimals, everything else numeric becomes [`Value::Float`]. Strings
    /// are kept as text; typed dates only arise from typed callers.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Decimal(Decimal::from(u))
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s.clone()),
            serde_json::Value::Array(items) => Self::Seq(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert into a plain JSON document for display
    ///
    /// Decimals are rendered as JSON numbers (lossy); dates and timestamps
    /// become ISO text.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or_else(
                    || serde_json::Value::String(d.normalize().to_string()),
                    serde_json::Value::Number,
                ),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Self::Timestamp(t) => serde_json::Value::String(crate::normalize::canonical_timestamp(t)),
            Self::Seq(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Seq(value.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}

/// The structured input a fact is resolved against
///
/// Always a string-keyed mapping at the root; nested values are arbitrary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    fields: BTreeMap<String, Value>,
}

impl Context {
    /// Empty context
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Context from an existing mapping
    #[inline]
    #[must_use]
    pub fn from_map(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// Context from a JSON object
    ///
    /// # Errors
    /// Returns [`NormalizeError::NotAMapping`] when the root is not an object.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, NormalizeError> {
        match Value::from_json(json) {
            Value::Map(fields) => Ok(Self { fields }),
            other => Err(NormalizeError::NotAMapping(other.kind_name())),
        }
    }

    /// Context from any serializable value
    ///
    /// # Errors
    /// Returns [`NormalizeError::Unserializable`] when the value cannot be
    /// expressed as a string-keyed structure (e.g. maps with non-string keys)
    /// and [`NormalizeError::NotAMapping`] when the root is not a mapping.
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, NormalizeError> {
        let json = serde_json::to_value(value)
            .map_err(|e| NormalizeError::Unserializable(e.to_string()))?;
        Self::from_json(&json)
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Top-level field
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a dotted path such as `range.0` or `filter.category`
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Map(map) => map.get(part)?,
                Value::Seq(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Copy of this context with `overlay` fields replacing existing ones
    #[must_use]
    pub fn overlaid(&self, overlay: BTreeMap<String, Value>) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(overlay);
        Self { fields }
    }

    /// Borrow the underlying mapping
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Consume into the underlying mapping
    #[inline]
    #[must_use]
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        self.fields
    }

    /// Whether the context has no fields
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The context as a mapping value
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Map(self.fields.clone())
    }

    /// The context as plain JSON
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        self.to_value().to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_maps_number_flavours() {
        assert_eq!(Value::from_json(&json!(3)), Value::Int(3));
        assert_eq!(Value::from_json(&json!(2.5)), Value::Float(2.5));
        assert_eq!(
            Value::from_json(&json!(u64::MAX)),
            Value::Decimal(Decimal::from(u64::MAX))
        );
    }

    #[test]
    fn context_rejects_non_mapping_root() {
        let err = Context::from_json(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, NormalizeError::NotAMapping("sequence")));
    }

    #[test]
    fn get_path_walks_maps_and_sequences() {
        let ctx = Context::from_json(&json!({
            "range": ["2024-01-01", "2024-01-31"],
            "filter": {"category": "food"}
        }))
        .unwrap();

        assert_eq!(ctx.get_path("range.1"), Some(&Value::from("2024-01-31")));
        assert_eq!(ctx.get_path("filter.category"), Some(&Value::from("food")));
        assert_eq!(ctx.get_path("filter.missing"), None);
        assert_eq!(ctx.get_path("range.x"), None);
    }

    #[test]
    fn overlay_replaces_and_keeps() {
        let ctx = Context::new().with("a", 1_i64).with("b", 2_i64);
        let mut overlay = BTreeMap::new();
        overlay.insert("b".to_string(), Value::Int(20));
        let derived = ctx.overlaid(overlay);
        assert_eq!(derived.get("a"), Some(&Value::Int(1)));
        assert_eq!(derived.get("b"), Some(&Value::Int(20)));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::from("x").is_truthy());
        assert!(!Value::Seq(vec![]).is_truthy());
    }

    #[test]
    fn decimal_to_json_prefers_numbers() {
        let d: Decimal = "10.50".parse().unwrap();
        assert_eq!(Value::Decimal(d).to_json(), json!(10.5));
    }
}
