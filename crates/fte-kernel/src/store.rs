//! Data Store collaborator
//!
//! Fact logic never performs I/O itself. Procedures and data bindings reach
//! data through a [`DataStore`], which exposes a closed set of read-only
//! primitives.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use fte_context::{Decimal, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Errors raised by a data store primitive
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Primitive is not on the allow-list
    #[error("unknown primitive '{0}'")]
    UnknownPrimitive(String),

    /// Arguments do not fit the primitive's signature
    #[error("invalid arguments to {primitive}: {reason}")]
    InvalidArguments { primitive: String, reason: String },

    /// Backend failure
    #[error("data store failure: {0}")]
    Backend(String),
}

impl StoreError {
    fn args(primitive: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            primitive: primitive.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read-only query interface
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Allow-listed primitive names
    fn primitives(&self) -> Vec<String>;

    /// Run one read-only query
    async fn call(&self, primitive: &str, args: Vec<Value>) -> Result<Value, StoreError>;
}

/// Store with no primitives
#[derive(Debug, Default)]
pub struct EmptyDataStore;

#[async_trait]
impl DataStore for EmptyDataStore {
    fn primitives(&self) -> Vec<String> {
        Vec::new()
    }

    async fn call(&self, primitive: &str, _args: Vec<Value>) -> Result<Value, StoreError> {
        Err(StoreError::UnknownPrimitive(primitive.to_string()))
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub account_id: String,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl TransactionRecord {
    pub fn new(account_id: impl Into<String>, date: NaiveDate, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            date,
            amount,
            description: String::new(),
            category: None,
        }
    }

    fn to_value(&self) -> Value {
        let mut row = BTreeMap::new();
        row.insert("account_id".to_string(), Value::from(self.account_id.as_str()));
        row.insert("date".to_string(), Value::Date(self.date));
        row.insert("amount".to_string(), Value::Decimal(self.amount));
        row.insert("description".to_string(), Value::from(self.description.as_str()));
        row.insert(
            "category".to_string(),
            self.category.as_deref().map_or(Value::Null, Value::from),
        );
        Value::Map(row)
    }
}

#[derive(Debug, Default, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    transactions: Vec<TransactionRecord>,
}

/// In-memory ledger with call counting
///
/// Primitives:
/// - `transactions(account_id)` / `transactions(account_id, [from, to])`,
///   the range inclusive on both ends, dates as ISO text or native dates;
/// - `accounts()`, the sorted distinct account identifiers.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    records: RwLock<Vec<TransactionRecord>>,
    calls: DashMap<String, u64>,
}

pub const PRIMITIVE_TRANSACTIONS: &str = "transactions";
pub const PRIMITIVE_ACCOUNTS: &str = "accounts";

impl InMemoryDataStore {
    #[must_use]
    pub fn new(records: Vec<TransactionRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            calls: DashMap::new(),
        }
    }

    /// Parse a YAML or JSON document with a `transactions` list
    ///
    /// # Errors
    /// Returns the parser error.
    pub fn from_document(text: &str) -> Result<Self, serde_yaml::Error> {
        let doc: StoreDocument = serde_yaml::from_str(text)?;
        Ok(Self::new(doc.transactions))
    }

    /// Load a document from disk
    ///
    /// # Errors
    /// I/O and parse failures, as text.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))?;
        Self::from_document(&text)
            .map_err(|e| StoreError::Backend(format!("{}: {e}", path.display())))
    }

    pub fn insert(&self, record: TransactionRecord) {
        self.records.write().push(record);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Calls made to `primitive` so far
    #[must_use]
    pub fn call_count(&self, primitive: &str) -> u64 {
        self.calls.get(primitive).map_or(0, |c| *c)
    }

    /// Calls made to any primitive so far
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    fn transactions(&self, args: &[Value]) -> Result<Value, StoreError> {
        let (account, range) = match args {
            [account] => (account, None),
            [account, range] => (account, Some(date_range(range)?)),
            _ => {
                return Err(StoreError::args(
                    PRIMITIVE_TRANSACTIONS,
                    format!("expected 1 or 2 arguments, got {}", args.len()),
                ))
            }
        };
        let account = account
            .as_str()
            .ok_or_else(|| StoreError::args(PRIMITIVE_TRANSACTIONS, "account id must be text"))?;
        let rows = self
            .records
            .read()
            .iter()
            .filter(|r| r.account_id == account)
            .filter(|r| range.map_or(true, |(from, to)| r.date >= from && r.date <= to))
            .map(TransactionRecord::to_value)
            .collect();
        Ok(Value::Seq(rows))
    }

    fn accounts(&self) -> Value {
        let ids: BTreeSet<String> = self
            .records
            .read()
            .iter()
            .map(|r| r.account_id.clone())
            .collect();
        Value::Seq(ids.into_iter().map(Value::Text).collect())
    }
}

fn date_arg(value: &Value) -> Result<NaiveDate, StoreError> {
    match value {
        Value::Date(d) => Ok(*d),
        Value::Text(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| StoreError::args(PRIMITIVE_TRANSACTIONS, format!("bad date '{s}': {e}"))),
        other => Err(StoreError::args(
            PRIMITIVE_TRANSACTIONS,
            format!("expected a date, got {}", other.kind_name()),
        )),
    }
}

fn date_range(value: &Value) -> Result<(NaiveDate, NaiveDate), StoreError> {
    match value {
        Value::Seq(items) if items.len() == 2 => Ok((date_arg(&items[0])?, date_arg(&items[1])?)),
        _ => Err(StoreError::args(
            PRIMITIVE_TRANSACTIONS,
            "range must be a [from, to] pair",
        )),
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    fn primitives(&self) -> Vec<String> {
        vec![PRIMITIVE_ACCOUNTS.to_string(), PRIMITIVE_TRANSACTIONS.to_string()]
    }

    async fn call(&self, primitive: &str, args: Vec<Value>) -> Result<Value, StoreError> {
        *self.calls.entry(primitive.to_string()).or_insert(0) += 1;
        match primitive {
            PRIMITIVE_TRANSACTIONS => self.transactions(&args),
            PRIMITIVE_ACCOUNTS if args.is_empty() => Ok(self.accounts()),
            PRIMITIVE_ACCOUNTS => Err(StoreError::args(primitive, "takes no arguments")),
            other => Err(StoreError::UnknownPrimitive(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn store() -> InMemoryDataStore {
        InMemoryDataStore::new(vec![
            TransactionRecord::new("A1", d("2024-01-01"), "10.00".parse().unwrap()),
            TransactionRecord::new("A1", d("2024-01-31"), "5.50".parse().unwrap()),
            TransactionRecord::new("A1", d("2024-02-01"), "99.00".parse().unwrap()),
            TransactionRecord::new("B2", d("2024-01-15"), "1.00".parse().unwrap()),
        ])
    }

    fn count(v: &Value) -> usize {
        match v {
            Value::Seq(items) => items.len(),
            _ => 0,
        }
    }

    #[tokio::test]
    async fn range_is_inclusive() {
        let s = store();
        let rows = s
            .call(
                "transactions",
                vec![Value::from("A1"), Value::from(vec!["2024-01-01", "2024-01-31"])],
            )
            .await
            .unwrap();
        assert_eq!(count(&rows), 2);
        assert_eq!(s.call_count("transactions"), 1);
    }

    #[tokio::test]
    async fn without_range_returns_all_for_account() {
        let rows = store().call("transactions", vec![Value::from("A1")]).await.unwrap();
        assert_eq!(count(&rows), 3);
    }

    #[tokio::test]
    async fn accounts_are_distinct_and_sorted() {
        let v = store().call("accounts", vec![]).await.unwrap();
        assert_eq!(v, Value::from(vec!["A1", "B2"]));
    }

    #[tokio::test]
    async fn rejects_unknown_primitive_and_bad_args() {
        let s = store();
        assert!(matches!(
            s.call("delete_all", vec![]).await,
            Err(StoreError::UnknownPrimitive(_))
        ));
        assert!(matches!(
            s.call("transactions", vec![Value::Int(1)]).await,
            Err(StoreError::InvalidArguments { .. })
        ));
        assert_eq!(s.total_calls(), 2);
    }

    #[test]
    fn loads_yaml_document() {
        let s = InMemoryDataStore::from_document(
            "transactions:\n  - { account_id: A1, date: 2024-01-03, amount: 12.5 }\n",
        )
        .unwrap();
        assert_eq!(s.len(), 1);
    }
}
