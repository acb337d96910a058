//! Append-only resolution journal
//!
//! Every resolution outcome is appended with the SHA-256 hash of the
//! previous entry, so any edit, deletion or reordering breaks the chain.

use chrono::{DateTime, Utc};
use fte_context::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::types::FactId;

const GENESIS: [u8; 32] = [0u8; 32];

/// Journal integrity errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    #[error("journal integrity violation at entry {sequence}")]
    IntegrityViolation { sequence: u64 },
}

/// One recorded outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub fact: FactId,
    pub version: Option<u32>,
    pub fingerprint: Option<Fingerprint>,
    /// `computed`, `cache_hit`, `adopted` or an error kind
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Hex SHA-256 of the previous entry
    pub prev_hash: String,
    /// Hex SHA-256 of this entry
    pub hash: String,
}

/// What to record
#[derive(Debug, Clone)]
pub struct Record {
    pub fact: FactId,
    pub version: Option<u32>,
    pub fingerprint: Option<Fingerprint>,
    pub outcome: String,
    pub detail: Option<String>,
}

/// Entries kept in memory when no capacity is configured
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

#[derive(Debug)]
struct Chain {
    entries: VecDeque<JournalEntry>,
    /// `prev_hash` expected of the first retained entry
    anchor: String,
    next_sequence: u64,
}

impl Chain {
    fn first_sequence(&self) -> u64 {
        self.next_sequence - self.entries.len() as u64
    }
}

/// Hash-chained journal
///
/// Holds at most `capacity` entries; the oldest are dropped first and the
/// chain keeps verifying from the last dropped hash. Long-running callers
/// export with [`Journal::drain`].
#[derive(Debug)]
pub struct Journal {
    inner: Mutex<Chain>,
    capacity: usize,
}

impl Default for Journal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Journal retaining at most `capacity` entries (at least one)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Chain {
                entries: VecDeque::new(),
                anchor: hex::encode(GENESIS),
                next_sequence: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Restore a full export starting at the genesis hash; call
    /// [`Journal::verify_integrity`] before trusting it
    #[must_use]
    pub fn from_entries(entries: Vec<JournalEntry>) -> Self {
        Self::from_segment(hex::encode(GENESIS), entries)
    }

    /// Restore a drained segment whose first entry links to `anchor`
    #[must_use]
    pub fn from_segment(anchor: String, entries: Vec<JournalEntry>) -> Self {
        let first = entries.first().map_or(0, |e| e.sequence);
        let journal = Self::with_capacity(entries.len().max(DEFAULT_JOURNAL_CAPACITY));
        {
            let mut chain = journal.inner.lock();
            chain.anchor = anchor;
            chain.next_sequence = first + entries.len() as u64;
            chain.entries = entries.into();
        }
        journal
    }

    pub fn append(&self, record: Record) -> Uuid {
        let mut chain = self.inner.lock();
        let prev = chain
            .entries
            .back()
            .map_or_else(|| chain.anchor.clone(), |e| e.hash.clone());
        let mut entry = JournalEntry {
            id: Uuid::new_v4(),
            sequence: chain.next_sequence,
            timestamp: Utc::now(),
            fact: record.fact,
            version: record.version,
            fingerprint: record.fingerprint,
            outcome: record.outcome,
            detail: record.detail,
            prev_hash: prev,
            hash: String::new(),
        };
        entry.hash = hex::encode(compute_hash(&entry));
        let id = entry.id;
        chain.entries.push_back(entry);
        chain.next_sequence += 1;
        while chain.entries.len() > self.capacity {
            if let Some(dropped) = chain.entries.pop_front() {
                chain.anchor = dropped.hash;
            }
        }
        id
    }

    /// Remove and return every retained entry
    ///
    /// Later appends continue the same chain and sequence.
    pub fn drain(&self) -> Vec<JournalEntry> {
        let mut chain = self.inner.lock();
        let drained: Vec<JournalEntry> = chain.entries.drain(..).collect();
        if let Some(last) = drained.last() {
            chain.anchor.clone_from(&last.hash);
        }
        drained
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Retained entries whose outcome equals `outcome`
    #[must_use]
    pub fn count_outcome(&self, outcome: &str) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.outcome == outcome)
            .count()
    }

    /// Walk the retained chain from its anchor
    ///
    /// # Errors
    /// [`JournalError::IntegrityViolation`] at the first broken link.
    pub fn verify_integrity(&self) -> Result<(), JournalError> {
        let chain = self.inner.lock();
        let mut prev = chain.anchor.clone();
        for (sequence, e) in (chain.first_sequence()..).zip(chain.entries.iter()) {
            if e.sequence != sequence
                || e.prev_hash != prev
                || e.hash != hex::encode(compute_hash(e))
            {
                return Err(JournalError::IntegrityViolation { sequence });
            }
            prev.clone_from(&e.hash);
        }
        Ok(())
    }
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.id.as_bytes());
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(entry.timestamp.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(entry.fact.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(entry.version.unwrap_or(0).to_le_bytes());
    hasher.update([u8::from(entry.version.is_some())]);
    match &entry.fingerprint {
        Some(fp) => hasher.update(fp.as_bytes()),
        None => hasher.update([0u8; 32]),
    }
    hasher.update(entry.outcome.as_bytes());
    hasher.update([0]);
    hasher.update(entry.detail.as_deref().unwrap_or("").as_bytes());
    hasher.update([0]);
    hasher.update(entry.prev_hash.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: &str) -> Record {
        Record {
            fact: FactId::new("j.fact").unwrap(),
            version: Some(1),
            fingerprint: Some(Fingerprint::compute(b"ctx")),
            outcome: outcome.to_string(),
            detail: None,
        }
    }

    #[test]
    fn chain_verifies() {
        let journal = Journal::new();
        journal.append(record("computed"));
        journal.append(record("cache_hit"));
        journal.append(record("schema_violation"));
        assert_eq!(journal.len(), 3);
        assert_eq!(journal.count_outcome("cache_hit"), 1);
        journal.verify_integrity().unwrap();
    }

    #[test]
    fn edited_outcome_is_detected() {
        let journal = Journal::new();
        journal.append(record("computed"));
        journal.append(record("computed"));
        let mut entries = journal.entries();
        entries[0].outcome = "cache_hit".into();
        assert_eq!(
            Journal::from_entries(entries).verify_integrity(),
            Err(JournalError::IntegrityViolation { sequence: 0 })
        );
    }

    #[test]
    fn deleted_entry_is_detected() {
        let journal = Journal::new();
        for _ in 0..3 {
            journal.append(record("computed"));
        }
        let mut entries = journal.entries();
        entries.remove(1);
        assert!(Journal::from_entries(entries).verify_integrity().is_err());
    }

    #[test]
    fn capacity_drops_oldest_and_still_verifies() {
        let journal = Journal::with_capacity(3);
        for _ in 0..5 {
            journal.append(record("computed"));
        }
        let entries = journal.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].sequence, 2);
        journal.verify_integrity().unwrap();
    }

    #[test]
    fn drain_continues_the_chain() {
        let journal = Journal::with_capacity(10);
        journal.append(record("computed"));
        journal.append(record("cache_hit"));
        let exported = journal.drain();
        assert_eq!(exported.len(), 2);
        assert!(journal.is_empty());

        journal.append(record("computed"));
        let entries = journal.entries();
        assert_eq!(entries[0].sequence, 2);
        assert_eq!(entries[0].prev_hash, exported[1].hash);
        journal.verify_integrity().unwrap();

        let anchor = exported[1].prev_hash.clone();
        let segment = Journal::from_segment(anchor, exported[1..].to_vec());
        segment.verify_integrity().unwrap();
        assert!(Journal::from_entries(exported[1..].to_vec())
            .verify_integrity()
            .is_err());
    }
}
