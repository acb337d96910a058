//! Memoized fact instances using moka
//!
//! Keys are [`InstanceKey`]s: version, context fingerprint and the lineage of
//! active dependency versions. Inserts are atomic
//! insert-if-absent: concurrent computations of the same key may both run,
//! but exactly one instance is committed and every caller receives it.

use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::types::{FactInstance, InstanceKey, VersionKey};

/// How an instance was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Found without computing
    Hit,
    /// Computed and committed by this caller
    Computed,
    /// Computed, but another caller committed first; theirs was adopted
    Adopted,
}

impl CacheOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache_hit",
            Self::Computed => "computed",
            Self::Adopted => "adopted",
        }
    }
}

/// Counters for cache behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Approximate number of entries
    pub entry_count: u64,
    /// Instances committed
    pub commits: u64,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Computations discarded because another caller won
    pub duplicates: u64,
}

/// Unbounded instance cache
#[derive(Debug, Clone)]
pub struct InstanceCache {
    inner: Cache<InstanceKey, Arc<FactInstance>>,
    commits: Arc<AtomicU64>,
    hits: Arc<AtomicU64>,
    duplicates: Arc<AtomicU64>,
}

impl Default for InstanceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::builder().build(),
            commits: Arc::default(),
            hits: Arc::default(),
            duplicates: Arc::default(),
        }
    }

    /// Look up an instance
    pub async fn get(&self, key: &InstanceKey) -> Option<Arc<FactInstance>> {
        let found = self.inner.get(key).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                version = %key.version,
                fingerprint = %key.fingerprint.short(),
                lineage = %key.lineage.short(),
                "cache hit"
            );
        }
        found
    }

    /// Insert unless present; returns the stored instance and whether it is
    /// the one passed in
    pub async fn commit(&self, instance: FactInstance) -> (Arc<FactInstance>, bool) {
        let key = instance.key();
        let entry = self
            .inner
            .entry(key)
            .or_insert_with(async move { Arc::new(instance) })
            .await;
        if entry.is_fresh() {
            self.commits.fetch_add(1, Ordering::Relaxed);
            (entry.into_value(), true)
        } else {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            (entry.into_value(), false)
        }
    }

    /// Return the cached instance or compute, commit and return one
    ///
    /// # Errors
    /// Whatever `compute` fails with; nothing is cached in that case.
    pub async fn get_or_compute<E, F, Fut>(
        &self,
        key: &InstanceKey,
        compute: F,
    ) -> Result<(Arc<FactInstance>, CacheOutcome), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<FactInstance, E>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok((hit, CacheOutcome::Hit));
        }
        let instance = compute().await?;
        let (stored, won) = self.commit(instance).await;
        Ok((stored, if won { CacheOutcome::Computed } else { CacheOutcome::Adopted }))
    }

    /// Drop every instance of one version, whatever its lineage; returns
    /// how many were removed
    pub async fn invalidate_version(&self, version: &VersionKey) -> usize {
        let keys: Vec<InstanceKey> = self
            .inner
            .iter()
            .filter(|(k, _)| &k.version == version)
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in &keys {
            self.inner.invalidate(key).await;
        }
        debug!(version = %version, removed = keys.len(), "invalidated instances");
        keys.len()
    }

    /// Instances currently held for one version
    #[must_use]
    pub fn instances_of(&self, version: &VersionKey) -> Vec<Arc<FactInstance>> {
        self.inner
            .iter()
            .filter(|(k, _)| &k.version == version)
            .map(|(_, v)| v)
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
            commits: self.commits.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }

    /// Apply pending maintenance so counts are exact
    pub async fn sync(&self) {
        self.inner.run_pending_tasks().await;
    }
}
