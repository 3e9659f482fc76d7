//! Cycle status, reports and events.

use crate::error::{ConflictError, ValidationError};
use crate::merge::MergeTally;
use crate::quota::EvictionReport;
use crate::{CollectionName, EntryId, OperationKind, RecordId, Timestamp};
use serde::{Deserialize, Serialize};

/// Where the engine is in its sync lifecycle.
///
/// A cycle publishes `Syncing`, then its outcome (`Success`, `Partial` or
/// `Error`), then returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Partial,
    Error,
}

/// Result of one collection within a cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub collection: CollectionName,
    /// The pull step completed
    pub pulled: bool,
    /// Remote records received
    pub received: usize,
    pub merge: MergeTally,
    /// Entries acknowledged by the remote
    pub pushed: usize,
    /// Entries still queued after the push step
    pub remaining: usize,
    /// Watermark after the cycle
    pub watermark: Option<Timestamp>,
    /// Why the collection did not complete
    pub error: Option<String>,
}

impl CollectionReport {
    pub fn new(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Pulled and fully drained.
    pub fn succeeded(&self) -> bool {
        self.pulled && self.remaining == 0 && self.error.is_none()
    }
}

/// Result of `run_sync_cycle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub status: SyncStatus,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub collections: Vec<CollectionReport>,
    pub eviction: Option<EvictionReport>,
    /// A stop request ended the cycle early
    pub stopped: bool,
    /// A cycle was already running; this request was folded into a rerun
    pub deferred: bool,
}

impl SyncReport {
    /// Report for a request that was coalesced into the running cycle.
    pub fn deferred(now: Timestamp) -> Self {
        Self {
            status: SyncStatus::Syncing,
            started_at: now,
            finished_at: now,
            collections: Vec::new(),
            eviction: None,
            stopped: false,
            deferred: true,
        }
    }

    /// `Success` if every collection completed, `Error` if none did,
    /// `Partial` otherwise. A stopped cycle is at best `Partial`.
    pub fn outcome(collections: &[CollectionReport], stopped: bool) -> SyncStatus {
        let succeeded = collections.iter().filter(|c| c.succeeded()).count();
        if succeeded == collections.len() && !stopped {
            SyncStatus::Success
        } else if succeeded == 0 && !stopped {
            SyncStatus::Error
        } else {
            SyncStatus::Partial
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionReport> {
        self.collections.iter().find(|c| c.collection == name)
    }

    pub fn total_pushed(&self) -> usize {
        self.collections.iter().map(|c| c.pushed).sum()
    }

    pub fn total_remaining(&self) -> usize {
        self.collections.iter().map(|c| c.remaining).sum()
    }
}

/// Notifications published by the engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    StatusChanged(SyncStatus),
    /// The remote rejected a replayed entry; both sides are attached
    Conflict(ConflictError),
    /// The remote refused a replayed entry as invalid
    Rejected(ValidationError),
    CycleFinished(SyncReport),
    Evicted(EvictionReport),
}

/// Acknowledgement of a local write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteReceipt {
    pub collection: CollectionName,
    pub record_id: RecordId,
    pub operation: OperationKind,
    /// Outbox entry holding the mutation until the remote acknowledges it
    pub entry_id: Option<EntryId>,
    /// The remote already acknowledged the mutation
    pub delivered: bool,
    pub written_at: Timestamp,
}

impl WriteReceipt {
    pub fn is_queued(&self) -> bool {
        self.entry_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, pulled: bool, remaining: usize) -> CollectionReport {
        CollectionReport {
            pulled,
            remaining,
            ..CollectionReport::new(name)
        }
    }

    #[test]
    fn outcome_rules() {
        let ok = report("orders", true, 0);
        let stuck = report("messages", true, 2);
        let offline = report("products", false, 0);

        assert_eq!(
            SyncReport::outcome(&[ok.clone(), ok.clone()], false),
            SyncStatus::Success
        );
        assert_eq!(
            SyncReport::outcome(&[ok.clone(), stuck.clone()], false),
            SyncStatus::Partial
        );
        assert_eq!(
            SyncReport::outcome(&[stuck.clone(), offline], false),
            SyncStatus::Error
        );
        assert_eq!(SyncReport::outcome(&[ok.clone()], true), SyncStatus::Partial);
        assert_eq!(SyncReport::outcome(&[stuck], true), SyncStatus::Partial);
        assert_eq!(SyncReport::outcome(&[], false), SyncStatus::Success);
    }

    #[test]
    fn status_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Partial).unwrap(),
            "\"partial\""
        );
    }
}
