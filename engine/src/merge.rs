//! Merge policy for applying pulled remote records to the local store.
//!
//! Remote deltas are applied as whole-record replacements, then pending local
//! operations are replayed on top in enqueue order. The result is
//! last-writer-wins at the operation level: two offline edits to different
//! fields of the same record are *not* combined field by field; whichever
//! operation is applied last replaces the record entirely.
//!
//! What varies is whether a remote record may replace a local copy:
//!
//! - [`MergeStrategy::PreserveLocal`] keeps records that still have pending
//!   outbox entries untouched until those entries are pushed (default).
//! - [`MergeStrategy::RemoteWins`] always takes the remote copy; pending
//!   entries are still replayed afterwards and will overwrite it remotely.
//! - [`MergeStrategy::NewestWins`] compares `updated_at` and keeps the newer
//!   copy. Local and remote clocks may be skewed; use with caution.

use crate::Record;
use serde::{Deserialize, Serialize};

/// How pulled remote records are reconciled with local copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStrategy {
    /// Records with pending local mutations keep their local state (default)
    #[default]
    PreserveLocal,
    /// Remote copy always replaces the local one
    RemoteWins,
    /// Newer `updated_at` wins; ties go to the remote
    NewestWins,
}

/// What to do with one pulled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Write the remote record (or delete, for a tombstone)
    ApplyRemote,
    /// Leave the local copy as it is
    KeepLocal,
}

impl MergeStrategy {
    /// Decide whether `remote` replaces `local`.
    ///
    /// `has_pending` tells whether an unacknowledged outbox entry targets the
    /// record.
    pub fn decide(
        &self,
        local: Option<&Record>,
        remote: &Record,
        has_pending: bool,
    ) -> MergeDecision {
        match self {
            MergeStrategy::PreserveLocal if has_pending => MergeDecision::KeepLocal,
            MergeStrategy::PreserveLocal | MergeStrategy::RemoteWins => MergeDecision::ApplyRemote,
            MergeStrategy::NewestWins => match local {
                Some(local) if local.updated_at > remote.updated_at => MergeDecision::KeepLocal,
                _ => MergeDecision::ApplyRemote,
            },
        }
    }
}

/// Tally of merge decisions over one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeTally {
    /// Remote records written locally
    pub applied: usize,
    /// Remote tombstones that removed a local record
    pub deleted: usize,
    /// Remote records skipped in favour of the local copy
    pub kept_local: usize,
}
