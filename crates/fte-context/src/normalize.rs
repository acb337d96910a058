//! Context normalization
//!
//! A context is reduced to a [`CanonicalForm`] in which:
//! - mapping keys are ordered (a `BTreeMap`), so insertion order is irrelevant;
//! - sequences keep their order;
//! - every finite number is rendered as normalized decimal text, so `10`,
//!   `10.0` and `10.00` agree;
//! - dates and timestamps become ISO-8601 text;
//! - transient keys are dropped at every level.
//!
//! The canonical form is then encoded as tagged, length-prefixed bytes and
//! hashed into a [`Fingerprint`].

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::NormalizeError;
use crate::fingerprint::Fingerprint;
use crate::value::{Context, Value};

/// Keys dropped from every context before fingerprinting
pub const DEFAULT_TRANSIENT_KEYS: [&str; 3] = ["user", "request", "session_id"];

/// Default nesting ceiling
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Order-independent representation of a context
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CanonicalForm {
    Null,
    Bool(bool),
    Number(String),
    Text(String),
    Seq(Vec<CanonicalForm>),
    Map(BTreeMap<String, CanonicalForm>),
}

const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_NUMBER: u8 = 0x02;
const TAG_TEXT: u8 = 0x03;
const TAG_SEQ: u8 = 0x04;
const TAG_MAP: u8 = 0x05;

impl CanonicalForm {
    /// Unambiguous byte encoding
    ///
    /// Every node is `tag || payload`; variable-length payloads carry a
    /// little-endian `u64` length (byte length for text, element count for
    /// collections) so no two distinct forms share an encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(TAG_NULL),
            Self::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Self::Number(n) => {
                out.push(TAG_NUMBER);
                put_str(out, n);
            }
            Self::Text(s) => {
                out.push(TAG_TEXT);
                put_str(out, s);
            }
            Self::Seq(items) => {
                out.push(TAG_SEQ);
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
            Self::Map(map) => {
                out.push(TAG_MAP);
                out.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (key, value) in map {
                    put_str(out, key);
                    value.encode_into(out);
                }
            }
        }
    }

    /// Fingerprint of this form
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.encode())
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Configurable normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    transient_keys: BTreeSet<String>,
    max_depth: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSIENT_KEYS.iter().copied(), DEFAULT_MAX_DEPTH)
    }
}

impl Normalizer {
    /// Normalizer with the given transient keys and depth ceiling
    pub fn new<I, S>(transient_keys: I, max_depth: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient_keys: transient_keys.into_iter().map(Into::into).collect(),
            max_depth,
        }
    }

    /// Whether `key` is dropped before fingerprinting
    #[inline]
    #[must_use]
    pub fn is_transient(&self, key: &str) -> bool {
        self.transient_keys.contains(key)
    }

    /// Canonicalize a context
    ///
    /// # Errors
    /// Fails on non-finite floats or nesting deeper than the ceiling.
    pub fn normalize(&self, context: &Context) -> Result<CanonicalForm, NormalizeError> {
        self.normalize_map(context.fields(), "", 0)
    }

    /// Canonicalize and hash in one step
    ///
    /// # Errors
    /// See [`Normalizer::normalize`].
    pub fn fingerprint(&self, context: &Context) -> Result<Fingerprint, NormalizeError> {
        Ok(self.normalize(context)?.fingerprint())
    }

    /// Canonicalize a single value
    ///
    /// # Errors
    /// See [`Normalizer::normalize`].
    pub fn normalize_value(&self, value: &Value) -> Result<CanonicalForm, NormalizeError> {
        self.walk(value, "$", 0)
    }

    fn normalize_map(
        &self,
        map: &BTreeMap<String, Value>,
        path: &str,
        depth: usize,
    ) -> Result<CanonicalForm, NormalizeError> {
        let mut out = BTreeMap::new();
        for (key, value) in map {
            if self.is_transient(key) {
                continue;
            }
            let child = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            out.insert(key.clone(), self.walk(value, &child, depth + 1)?);
        }
        Ok(CanonicalForm::Map(out))
    }

    fn walk(&self, value: &Value, path: &str, depth: usize) -> Result<CanonicalForm, NormalizeError> {
        if depth > self.max_depth {
            return Err(NormalizeError::TooDeep {
                path: path.to_string(),
                limit: self.max_depth,
            });
        }
        Ok(match value {
            Value::Null => CanonicalForm::Null,
            Value::Bool(b) => CanonicalForm::Bool(*b),
            Value::Int(i) => CanonicalForm::Number(i.to_string()),
            Value::Decimal(d) => CanonicalForm::Number(canonical_decimal(*d)),
            Value::Float(f) => CanonicalForm::Number(canonical_float(*f).ok_or_else(|| {
                NormalizeError::NonFiniteNumber {
                    path: path.to_string(),
                }
            })?),
            Value::Text(s) => CanonicalForm::Text(s.clone()),
            Value::Date(d) => CanonicalForm::Text(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(t) => CanonicalForm::Text(canonical_timestamp(t)),
            Value::Seq(items) => CanonicalForm::Seq(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.walk(item, &format!("{path}.{i}"), depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => self.normalize_map(map, path, depth)?,
        })
    }
}

/// Normalized decimal text: no trailing zeros, no negative zero
#[must_use]
pub fn canonical_decimal(d: Decimal) -> String {
    d.normalize().to_string()
}

/// Canonical text of a float, `None` when not finite
///
/// Uses the shortest round-trip rendering and routes it through
/// [`canonical_decimal`] whenever that is exact, so a float and a decimal
/// with the same value produce the same text.
#[must_use]
pub fn canonical_float(f: f64) -> Option<String> {
    if !f.is_finite() {
        return None;
    }
    let text = format!("{f}");
    Some(match Decimal::from_str_exact(&text) {
        Ok(d) => canonical_decimal(d),
        Err(_) if f == 0.0 => "0".to_string(),
        Err(_) => text,
    })
}

/// ISO-8601 rendering of a UTC instant with a `Z` suffix
#[must_use]
pub fn canonical_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Canonicalize with the default normalizer
///
/// # Errors
/// See [`Normalizer::normalize`].
pub fn normalize(context: &Context) -> Result<CanonicalForm, NormalizeError> {
    Normalizer::default().normalize(context)
}

/// Fingerprint a canonical form
#[inline]
#[must_use]
pub fn fingerprint(form: &CanonicalForm) -> Fingerprint {
    form.fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ctx(json: serde_json::Value) -> Context {
        Context::from_json(&json).unwrap()
    }

    fn fp(context: &Context) -> Fingerprint {
        fingerprint(&normalize(context).unwrap())
    }

    #[test]
    fn key_order_is_irrelevant() {
        let a = ctx(json!({"a": 1, "b": {"y": 2, "x": 1}}));
        let b = ctx(json!({"b": {"x": 1, "y": 2}, "a": 1}));
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn sequence_order_matters() {
        let a = ctx(json!({"r": [1, 2]}));
        let b = ctx(json!({"r": [2, 1]}));
        assert_ne!(fp(&a), fp(&b));
    }

    #[test]
    fn equal_numbers_agree_across_representations() {
        let int = Context::new().with("n", 10_i64);
        let float = Context::new().with("n", 10.0_f64);
        let dec = Context::new().with("n", "10.00".parse::<Decimal>().unwrap());
        assert_eq!(fp(&int), fp(&float));
        assert_eq!(fp(&int), fp(&dec));

        let half_float = Context::new().with("n", 10.5_f64);
        let half_dec = Context::new().with("n", "10.50".parse::<Decimal>().unwrap());
        assert_eq!(fp(&half_float), fp(&half_dec));
    }

    #[test]
    fn number_and_text_do_not_collide() {
        let num = Context::new().with("n", 1_i64);
        let text = Context::new().with("n", "1");
        assert_ne!(fp(&num), fp(&text));
    }

    #[test]
    fn dates_render_as_iso_text() {
        let date = Context::new().with("d", NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        let text = Context::new().with("d", "2023-01-01");
        assert_eq!(fp(&date), fp(&text));

        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(canonical_timestamp(&ts), "2024-01-01T12:00:00Z");
    }

    #[test]
    fn transient_keys_are_dropped_everywhere() {
        let a = ctx(json!({"a": 1, "user": "alice", "nested": {"session_id": "s1", "b": 2}}));
        let b = ctx(json!({"a": 1, "nested": {"b": 2}}));
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn non_finite_floats_are_unnormalizable() {
        let c = Context::new().with("x", Value::Seq(vec![Value::Float(f64::NAN)]));
        let err = normalize(&c).unwrap_err();
        assert_eq!(err, NormalizeError::NonFiniteNumber { path: "x.0".into() });
    }

    #[test]
    fn depth_ceiling_is_enforced() {
        let mut value = Value::Int(1);
        for _ in 0..10 {
            value = Value::Seq(vec![value]);
        }
        let c = Context::new().with("deep", value);
        let shallow = Normalizer::new(DEFAULT_TRANSIENT_KEYS, 4);
        assert!(matches!(shallow.normalize(&c), Err(NormalizeError::TooDeep { limit: 4, .. })));
        assert!(Normalizer::default().normalize(&c).is_ok());
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(canonical_float(-0.0).unwrap(), "0");
        assert_eq!(canonical_float(0.1).unwrap(), "0.1");
    }

    #[test]
    fn encoding_distinguishes_nesting() {
        let a = ctx(json!({"a": ["x", "y"]}));
        let b = ctx(json!({"a": ["xy"]}));
        let c = ctx(json!({"a": [["x"], "y"]}));
        assert_ne!(fp(&a), fp(&b));
        assert_ne!(fp(&a), fp(&c));
    }
}
