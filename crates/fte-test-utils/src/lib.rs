//! Testing utilities for the fact engine workspace
//!
//! Shared fixtures: a small ledger, a spend taxonomy over it, and engines
//! wired to both.

#![allow(missing_docs)]

use chrono::NaiveDate;
use fte_kernel::prelude::*;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Spend facts over the sample ledger
///
/// `spend.total` and `spend.count` bind `transactions(accountId, range)`;
/// `spend.average` depends on both.
pub const SPEND_TAXONOMY: &str = r#"
facts:
  - id: spend.total
    kind: scalar
    description: Total spend for an account over a date range
    versions:
      - version: 1
        logic: sum(pluck(transactions, "amount"))
        schema:
          type: object
          required: [accountId, range]
          properties:
            accountId: { type: string, pattern: "^[A-Z][0-9]+$" }
            range: { type: array, items: { type: string, format: date } }
        bindings:
          - { name: transactions, primitive: transactions, args: [accountId, range] }
        test_cases:
          - name: january
            context: { accountId: A1, range: ["2024-01-01", "2024-01-31"] }
            expected: 42.75
  - id: spend.count
    kind: scalar
    description: Number of transactions for an account over a date range
    versions:
      - version: 1
        logic: len(transactions)
        schema:
          type: object
          required: [accountId, range]
          properties:
            accountId: { type: string }
            range: { type: array, items: { type: string, format: date } }
        bindings:
          - { name: transactions, primitive: transactions, args: [accountId, range] }
  - id: spend.average
    kind: scalar
    description: Average transaction amount
    versions:
      - version: 1
        logic: "if spend_count == 0 then 0 else round(spend_total / spend_count, 2)"
        dependencies: [spend.total, spend.count]
        test_cases:
          - context: { accountId: A1, range: ["2024-01-01", "2024-01-31"] }
            expected: 21.38
          - context: { accountId: Z9, range: ["2024-01-01", "2024-01-31"] }
            expected: 0
"#;

pub fn id(s: &str) -> FactId {
    FactId::new(s).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// A1 spends 12.50 and 30.25 in January and 99.99 in February; B2 spends
/// 5.00 in January
pub fn sample_transactions() -> Vec<TransactionRecord> {
    vec![
        TransactionRecord::new("A1", date("2024-01-05"), dec("12.50")),
        TransactionRecord::new("A1", date("2024-01-20"), dec("30.25")),
        TransactionRecord::new("A1", date("2024-02-02"), dec("99.99")),
        TransactionRecord::new("B2", date("2024-01-10"), dec("5.00")),
    ]
}

pub fn sample_store() -> Arc<InMemoryDataStore> {
    Arc::new(InMemoryDataStore::new(sample_transactions()))
}

/// Configuration with thread isolation and the given timeout
pub fn thread_config(timeout_ms: u64) -> EngineConfig {
    EngineConfig {
        isolation: IsolationLevel::Thread,
        default_timeout_ms: timeout_ms,
        ..EngineConfig::default()
    }
}

/// Engine over `store` with thread isolation
pub fn thread_engine(store: Arc<dyn DataStore>) -> Engine {
    Engine::new(thread_config(2_000), store).unwrap()
}

/// Thread-isolated engine with [`SPEND_TAXONOMY`] loaded over the sample
/// ledger
pub fn spend_engine() -> (Engine, Arc<InMemoryDataStore>) {
    let store = sample_store();
    let engine = thread_engine(store.clone());
    load_taxonomy(&engine, TaxonomyDocument::parse(SPEND_TAXONOMY).unwrap()).unwrap();
    (engine, store)
}

/// `{accountId, range: [from, to]}`
pub fn spend_context(account: &str, from: &str, to: &str) -> Context {
    Context::new()
        .with("accountId", account)
        .with("range", vec![from, to])
}
