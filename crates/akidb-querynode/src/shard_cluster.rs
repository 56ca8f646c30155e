//! Per-channel distribution table.
//!
//! A `ShardCluster` tracks, for one DML channel, which node serves each
//! segment at which version across the whole replica group. The table is
//! replaced copy-on-write under a short write lock, so a snapshot is an
//! `Arc` clone that can never observe a half-applied sync batch.
//!
//! ```text
//!   Unsynced ──setup_first_version──▶ Synced
//!      │                                │
//!      └────────────release─────────────┴──▶ Released
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use akidb_core::{
    CollectionId, CoreError, CoreResult, NodeId, PartitionId, ReplicaId, SegmentId, SegmentState,
};

use crate::context::RequestContext;

/// Where one segment of the shard currently lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAssignment {
    pub segment_id: SegmentId,
    pub partition_id: PartitionId,
    pub node_id: NodeId,
    pub version: i64,
    pub state: SegmentState,
}

/// Incremental instruction against a distribution table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Install or update a record; ignored unless strictly newer than the stored one.
    Set(SegmentAssignment),
    /// Delete a record whose stored version is not newer than `version`.
    /// Later Sets must be newer than the deleted record to revive it.
    Remove {
        segment_id: SegmentId,
        partition_id: PartitionId,
        version: i64,
    },
    /// Action kind this node does not understand; accepted as a no-op.
    Unknown { kind: i32, segment_id: SegmentId },
}

/// Lifecycle of a shard cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterState {
    /// No baseline yet; not trustworthy for routing.
    Unsynced,
    /// Baseline published; serving.
    Synced,
    /// Torn down; every operation fails.
    Released,
}

/// Outcome counters of one `sync_segments` batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub applied: usize,
    pub ignored: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone)]
struct TableEntry {
    assignment: SegmentAssignment,
    arrival: u64,
}

#[derive(Debug, Clone, Default)]
struct DistributionTable {
    entries: HashMap<SegmentId, TableEntry>,
    /// Version of the last record removed per segment. A Set must be newer
    /// than this to bring the segment back.
    tombstones: HashMap<SegmentId, i64>,
    next_arrival: u64,
}

impl DistributionTable {
    /// Applies one action; returns `Some(true)` if the table changed,
    /// `Some(false)` if ignored, `None` for an unknown kind.
    fn apply(&mut self, action: &SyncAction) -> Option<bool> {
        match action {
            SyncAction::Set(assignment) => {
                if let Some(existing) = self.entries.get_mut(&assignment.segment_id) {
                    if assignment.version <= existing.assignment.version {
                        return Some(false);
                    }
                    existing.assignment = assignment.clone();
                    return Some(true);
                }
                if let Some(removed) = self.tombstones.get(&assignment.segment_id) {
                    if assignment.version <= *removed {
                        return Some(false);
                    }
                }
                self.tombstones.remove(&assignment.segment_id);
                let arrival = self.next_arrival;
                self.next_arrival += 1;
                self.entries.insert(
                    assignment.segment_id,
                    TableEntry {
                        assignment: assignment.clone(),
                        arrival,
                    },
                );
                Some(true)
            }
            SyncAction::Remove {
                segment_id,
                version,
                ..
            } => match self.entries.get(segment_id) {
                Some(existing) if *version >= existing.assignment.version => {
                    let removed = existing.assignment.version;
                    self.entries.remove(segment_id);
                    self.tombstones.insert(*segment_id, removed);
                    Some(true)
                }
                _ => Some(false),
            },
            SyncAction::Unknown { .. } => None,
        }
    }
}

/// Immutable, point-in-time view of a shard's distribution.
#[derive(Debug, Clone)]
pub struct DistributionSnapshot {
    channel: Arc<str>,
    state: ClusterState,
    version: i64,
    table: Arc<DistributionTable>,
}

impl DistributionSnapshot {
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn state(&self) -> ClusterState {
        self.state
    }

    /// Whether this snapshot may be used for routing decisions.
    #[must_use]
    pub fn is_serviceable(&self) -> bool {
        self.state == ClusterState::Synced
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, segment_id: SegmentId) -> Option<&SegmentAssignment> {
        self.table
            .entries
            .get(&segment_id)
            .map(|entry| &entry.assignment)
    }

    /// Records in arrival order.
    #[must_use]
    pub fn segments(&self) -> Vec<&SegmentAssignment> {
        let mut entries: Vec<_> = self.table.entries.values().collect();
        entries.sort_by_key(|entry| entry.arrival);
        entries.into_iter().map(|entry| &entry.assignment).collect()
    }
}

#[derive(Debug)]
struct ClusterInner {
    state: ClusterState,
    version: i64,
    table: Arc<DistributionTable>,
}

/// Versioned segment-to-node registry for one DML channel.
#[derive(Debug)]
pub struct ShardCluster {
    collection_id: CollectionId,
    replica_id: ReplicaId,
    channel: Arc<str>,
    inner: RwLock<ClusterInner>,
    state_tx: watch::Sender<ClusterState>,
}

impl ShardCluster {
    /// Creates an unsynced cluster whose version counter starts at `version`.
    #[must_use]
    pub fn new(
        collection_id: CollectionId,
        replica_id: ReplicaId,
        channel: impl Into<String>,
        version: i64,
    ) -> Self {
        let (state_tx, _) = watch::channel(ClusterState::Unsynced);
        Self {
            collection_id,
            replica_id,
            channel: Arc::from(channel.into()),
            inner: RwLock::new(ClusterInner {
                state: ClusterState::Unsynced,
                version,
                table: Arc::new(DistributionTable::default()),
            }),
            state_tx,
        }
    }

    #[must_use]
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    #[must_use]
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn state(&self) -> ClusterState {
        self.inner.read().state
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.state() == ClusterState::Synced
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.inner.read().version
    }

    /// Publishes the baseline: Unsynced → Synced. Later calls are no-ops.
    pub fn setup_first_version(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        match inner.state {
            ClusterState::Released => Err(CoreError::ClusterReleased(self.channel.to_string())),
            ClusterState::Synced => Ok(()),
            ClusterState::Unsynced => {
                inner.state = ClusterState::Synced;
                self.state_tx.send_replace(ClusterState::Synced);
                tracing::info!(
                    channel = %self.channel,
                    version = inner.version,
                    segments = inner.table.entries.len(),
                    "shard cluster first version set up"
                );
                Ok(())
            }
        }
    }

    /// Applies a batch of actions atomically with respect to readers.
    ///
    /// Accepted while Unsynced (building the baseline) and Synced; fails only
    /// once the cluster is released.
    pub fn sync_segments(&self, actions: &[SyncAction]) -> CoreResult<SyncSummary> {
        let mut inner = self.inner.write();
        if inner.state == ClusterState::Released {
            return Err(CoreError::ClusterReleased(self.channel.to_string()));
        }

        let mut summary = SyncSummary::default();
        let table = Arc::make_mut(&mut inner.table);
        for action in actions {
            match table.apply(action) {
                Some(true) => summary.applied += 1,
                Some(false) => {
                    summary.ignored += 1;
                    tracing::debug!(channel = %self.channel, ?action, "stale sync action ignored");
                }
                None => {
                    summary.unknown += 1;
                    tracing::warn!(channel = %self.channel, ?action, "unknown sync action kind ignored");
                }
            }
        }

        if summary.applied > 0 {
            inner.version += 1;
        }
        tracing::debug!(
            channel = %self.channel,
            version = inner.version,
            applied = summary.applied,
            ignored = summary.ignored,
            unknown = summary.unknown,
            "sync segments applied"
        );
        Ok(summary)
    }

    /// Point lookup against the current table.
    #[must_use]
    pub fn get_segment(&self, segment_id: SegmentId) -> Option<SegmentAssignment> {
        self.inner
            .read()
            .table
            .entries
            .get(&segment_id)
            .map(|entry| entry.assignment.clone())
    }

    /// Consistent point-in-time view of the table.
    #[must_use]
    pub fn snapshot(&self) -> DistributionSnapshot {
        let inner = self.inner.read();
        DistributionSnapshot {
            channel: Arc::clone(&self.channel),
            state: inner.state,
            version: inner.version,
            table: Arc::clone(&inner.table),
        }
    }

    /// Tears the cluster down, dropping every record and waking waiters.
    pub fn release(&self) {
        let mut inner = self.inner.write();
        if inner.state == ClusterState::Released {
            return;
        }
        inner.state = ClusterState::Released;
        inner.table = Arc::new(DistributionTable::default());
        self.state_tx.send_replace(ClusterState::Released);
        tracing::info!(channel = %self.channel, "shard cluster released");
    }

    /// Waits until the cluster is Synced.
    ///
    /// Fails with `ClusterReleased` if it is released first, or `Cancelled`
    /// when `ctx` fires.
    pub async fn wait_synced(&self, ctx: &RequestContext) -> CoreResult<()> {
        let mut rx = self.state_tx.subscribe();
        let state = ctx
            .run(async move {
                let state = rx
                    .wait_for(|state| *state != ClusterState::Unsynced)
                    .await
                    .map(|state| *state)
                    .map_err(|_| CoreError::internal("shard cluster state channel closed"))?;
                Ok(state)
            })
            .await?;

        match state {
            ClusterState::Synced => Ok(()),
            _ => Err(CoreError::ClusterReleased(self.channel.to_string())),
        }
    }
}
