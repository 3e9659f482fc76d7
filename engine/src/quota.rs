//! Storage quota sampling and eviction.
//!
//! Usage is measured in logical bytes (see [`Backend::used_bytes`]). When it
//! crosses the configured threshold, the oldest records of evictable
//! collections are removed in batches until usage is back under the
//! threshold. Collections are visited by their schema `eviction_priority`,
//! lowest first. Records still targeted by pending outbox entries are never
//! evicted, and neither are records younger than the optional retention
//! window.

use crate::clock::Clock;
use crate::store::{Backend, LocalStore, OutboxQueue, StorageQuota, StorageResult};
use crate::{CollectionName, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Quota settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaConfig {
    /// Budget in logical bytes; `0` disables eviction
    pub quota_bytes: u64,
    /// Fraction of the budget above which eviction starts
    pub threshold: f64,
    /// Records removed per scan
    pub batch_size: usize,
    /// Records updated within this many milliseconds are kept
    pub retention_ms: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            quota_bytes: 50 * 1024 * 1024,
            threshold: 0.9,
            batch_size: 50,
            retention_ms: None,
        }
    }
}

/// What one eviction pass did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub before: StorageQuota,
    pub after: StorageQuota,
    /// Records removed per collection
    pub evicted: BTreeMap<CollectionName, usize>,
    /// Candidates kept because a pending entry references them
    pub skipped_pending: usize,
    /// Usage is still over the threshold and nothing more can be evicted
    pub exhausted: bool,
}

impl EvictionReport {
    fn untouched(quota: StorageQuota) -> Self {
        Self {
            before: quota,
            after: quota,
            evicted: BTreeMap::new(),
            skipped_pending: 0,
            exhausted: false,
        }
    }

    pub fn total_evicted(&self) -> usize {
        self.evicted.values().sum()
    }
}

/// Watches usage of one backend and evicts under pressure.
pub struct QuotaMonitor {
    backend: Arc<dyn Backend>,
    schema: Arc<Schema>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
}

impl QuotaMonitor {
    pub fn new(
        backend: Arc<dyn Backend>,
        schema: Arc<Schema>,
        clock: Arc<dyn Clock>,
        config: QuotaConfig,
    ) -> Self {
        Self {
            backend,
            schema,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    /// Current usage against the configured budget.
    pub async fn sample(&self) -> StorageResult<StorageQuota> {
        Ok(StorageQuota {
            used_bytes: self.backend.used_bytes().await?,
            quota_bytes: self.config.quota_bytes,
        })
    }

    fn threshold_bytes(&self) -> u64 {
        (self.config.quota_bytes as f64 * self.config.threshold) as u64
    }

    fn is_over(&self, quota: &StorageQuota) -> bool {
        self.config.quota_bytes > 0 && quota.used_bytes > self.threshold_bytes()
    }

    /// Evict if usage is over the threshold.
    pub async fn check_and_evict(&self) -> StorageResult<EvictionReport> {
        let before = self.sample().await?;
        if !self.is_over(&before) {
            return Ok(EvictionReport::untouched(before));
        }
        self.evict_down_to(before, self.threshold_bytes()).await
    }

    /// Make room after a write was refused for lack of space.
    ///
    /// The backend may run out before the configured threshold is reached,
    /// so this aims at the lower of the threshold and the same fraction of
    /// current usage.
    pub async fn evict_for_space(&self) -> StorageResult<EvictionReport> {
        let before = self.sample().await?;
        let relative = (before.used_bytes as f64 * self.config.threshold) as u64;
        let target = if self.config.quota_bytes > 0 {
            relative.min(self.threshold_bytes())
        } else {
            relative
        };
        self.evict_down_to(before, target).await
    }

    async fn evict_down_to(
        &self,
        before: StorageQuota,
        target: u64,
    ) -> StorageResult<EvictionReport> {
        let mut report = EvictionReport::untouched(before);
        let mut used = before.used_bytes;
        let batch_size = self.config.batch_size.max(1);
        let cutoff = self
            .config
            .retention_ms
            .map(|window| self.clock.now().saturating_sub(window));

        'collections: for collection in self.schema.eviction_order() {
            if used <= target {
                break;
            }
            let name = collection.name.as_str();
            let pending = self.backend.pending_record_ids(name).await?;
            let mut kept: HashSet<String> = HashSet::new();

            loop {
                let oldest = self
                    .backend
                    .scan_oldest(name, kept.len() + batch_size)
                    .await?;
                let fresh: Vec<_> = oldest.into_iter().filter(|r| !kept.contains(&r.id)).collect();
                if fresh.is_empty() {
                    continue 'collections;
                }

                for record in fresh {
                    if used <= target {
                        break 'collections;
                    }
                    if cutoff.is_some_and(|cutoff| record.updated_at > cutoff) {
                        // the rest of the collection is even younger
                        continue 'collections;
                    }
                    if pending.contains(&record.id) {
                        report.skipped_pending += 1;
                        kept.insert(record.id);
                        continue;
                    }

                    // a write may have queued an entry since the pending snapshot
                    if !self.backend.evict_unreferenced(name, &record.id).await? {
                        if self.backend.get(name, &record.id).await?.is_some() {
                            report.skipped_pending += 1;
                        }
                        kept.insert(record.id);
                        continue;
                    }
                    used = used.saturating_sub(record.stored_size());
                    *report.evicted.entry(name.to_string()).or_default() += 1;
                }
                used = self.backend.used_bytes().await?;
            }
        }

        report.after = self.sample().await?;
        report.exhausted = report.after.used_bytes > target;

        if report.total_evicted() > 0 {
            tracing::info!(
                evicted = report.total_evicted(),
                skipped_pending = report.skipped_pending,
                used_before = report.before.used_bytes,
                used_after = report.after.used_bytes,
                "evicted records under storage pressure"
            );
        }
        if report.exhausted {
            tracing::warn!(
                used = report.after.used_bytes,
                quota = report.after.quota_bytes,
                "storage pressure remains, nothing more is evictable"
            );
        }
        Ok(report)
    }
}
