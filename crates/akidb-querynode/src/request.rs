//! Typed requests and responses of every query node entry point.
//!
//! These are the shapes the transport layer hands to [`crate::QueryNode`].
//! Every response carries a [`Status`] that is populated on the success path
//! as well.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use akidb_core::{
    CollectionId, CollectionSchema, CoreError, CoreResult, IndexedFieldInfo, MetricType, NodeId, PartitionId, ReplicaId,
    SegmentId, SegmentInfo, SegmentState, Status,
};

use crate::gate::StateCode;
use crate::shard_cluster::{SegmentAssignment, SyncAction};

/// Common header of every request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBase {
    /// Node the sender believes it is talking to. `None` for requests that
    /// are not node-addressed.
    pub target_id: Option<NodeId>,
}

impl MsgBase {
    #[must_use]
    pub fn to(node_id: NodeId) -> Self {
        Self {
            target_id: Some(node_id),
        }
    }
}

// ========== Watch / load / release ==========

/// A segment handed to this node by the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentLoadInfo {
    pub segment_id: SegmentId,
    pub partition_id: PartitionId,
    pub channel: String,
    pub num_rows: i64,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub indexes: Vec<IndexedFieldInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchChannelRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    pub replica_id: ReplicaId,
    pub partition_ids: Vec<PartitionId>,
    pub schema: CollectionSchema,
    pub channel: String,
    /// Starting value of the shard cluster's version counter.
    pub version: i64,
    /// Growing segments already streaming on the channel.
    #[serde(default)]
    pub growing_segments: Vec<SegmentLoadInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnwatchChannelRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSegmentsRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    pub replica_id: ReplicaId,
    pub schema: CollectionSchema,
    /// Metric the collection's vector index was built with, if known.
    #[serde(default)]
    pub metric_type: Option<MetricType>,
    pub infos: Vec<SegmentLoadInfo>,
}

/// Which local segments a release applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseScope {
    #[default]
    All,
    /// Growing segments only.
    Streaming,
    /// Sealed segments only.
    Historical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSegmentsRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub scope: ReleaseScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCollectionRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleasePartitionsRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    pub partition_ids: Vec<PartitionId>,
}

// ========== Search ==========

/// Client-facing part of a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub collection_id: CollectionId,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
    /// JSON-encoded [`crate::plan::SearchPlan`].
    pub serialized_plan: Vec<u8>,
    pub num_queries: usize,
    pub topk: usize,
    pub metric_type: MetricType,
    #[serde(default)]
    pub ignore_growing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub base: MsgBase,
    pub req: SearchParams,
    pub dml_channels: Vec<String>,
    /// Segments to search when the request was forwarded by a shard leader.
    #[serde(default)]
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub from_shard_leader: bool,
}

/// One ranked hit. Higher scores are better; distance metrics report the
/// negated distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    pub score: f32,
}

/// Hits per query, each list sorted by descending score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<Vec<SearchHit>>,
}

impl SearchResults {
    #[must_use]
    pub fn empty(num_queries: usize) -> Self {
        Self {
            hits: vec![Vec::new(); num_queries],
        }
    }

    #[must_use]
    pub fn total_hits(&self) -> usize {
        self.hits.iter().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: Status,
    pub results: SearchResults,
}

// ========== Query ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParams {
    pub collection_id: CollectionId,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
    /// Boolean filter expression.
    pub expr: String,
    #[serde(default)]
    pub output_fields: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub ignore_growing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub base: MsgBase,
    pub req: QueryParams,
    pub dml_channels: Vec<String>,
    #[serde(default)]
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub from_shard_leader: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub pk: i64,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub rows: Vec<QueryRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: Status,
    pub results: QueryResults,
}

// ========== Statistics ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsParams {
    pub collection_id: CollectionId,
    #[serde(default)]
    pub partition_ids: Vec<PartitionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStatisticsRequest {
    pub base: MsgBase,
    pub req: StatisticsParams,
    pub dml_channels: Vec<String>,
    #[serde(default)]
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub from_shard_leader: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub row_count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetStatisticsResponse {
    pub status: Status,
    pub statistics: Statistics,
}

// ========== Distribution sync ==========

/// Wire code of a distribution sync action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Remove,
    Set,
}

impl SyncType {
    pub const fn code(self) -> i32 {
        match self {
            Self::Remove => 0,
            Self::Set => 1,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Remove),
            1 => Some(Self::Set),
            _ => None,
        }
    }
}

/// One sync action as delivered on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncActionRecord {
    pub kind: i32,
    pub partition_id: PartitionId,
    pub segment_id: SegmentId,
    #[serde(default)]
    pub node_id: NodeId,
    pub version: i64,
    /// Serving state carried by a Set; absent on the wire means `Loaded`.
    #[serde(default = "loaded")]
    pub state: SegmentState,
}

fn loaded() -> SegmentState {
    SegmentState::Loaded
}

impl SyncActionRecord {
    #[must_use]
    pub fn set(partition_id: PartitionId, segment_id: SegmentId, node_id: NodeId, version: i64) -> Self {
        Self {
            kind: SyncType::Set.code(),
            partition_id,
            segment_id,
            node_id,
            version,
            state: SegmentState::Loaded,
        }
    }

    #[must_use]
    pub fn remove(partition_id: PartitionId, segment_id: SegmentId, version: i64) -> Self {
        Self {
            kind: SyncType::Remove.code(),
            partition_id,
            segment_id,
            node_id: NodeId::INVALID,
            version,
            state: SegmentState::Offline,
        }
    }
}

impl From<&SyncActionRecord> for SyncAction {
    fn from(record: &SyncActionRecord) -> Self {
        match SyncType::from_code(record.kind) {
            Some(SyncType::Set) => SyncAction::Set(SegmentAssignment {
                segment_id: record.segment_id,
                partition_id: record.partition_id,
                node_id: record.node_id,
                version: record.version,
                state: record.state,
            }),
            Some(SyncType::Remove) => SyncAction::Remove {
                segment_id: record.segment_id,
                partition_id: record.partition_id,
                version: record.version,
            },
            None => SyncAction::Unknown {
                kind: record.kind,
                segment_id: record.segment_id,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDistributionRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    pub channel: String,
    pub actions: Vec<SyncActionRecord>,
}

/// Legacy per-node segment list; `versions[i]` belongs to `segment_ids[i]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaSegmentsInfo {
    pub node_id: NodeId,
    pub partition_id: PartitionId,
    pub segment_ids: Vec<SegmentId>,
    #[serde(default)]
    pub versions: Vec<i64>,
}

impl ReplicaSegmentsInfo {
    /// Converts to `Set` actions in the `Loaded` state. Every segment must
    /// carry a version; a record that does not is rejected as a whole.
    pub fn to_actions(&self) -> CoreResult<Vec<SyncAction>> {
        if self.segment_ids.len() != self.versions.len() {
            return Err(CoreError::ValidationError(format!(
                "replica segments of node {} carry {} segment ids but {} versions",
                self.node_id,
                self.segment_ids.len(),
                self.versions.len()
            )));
        }

        Ok(self
            .segment_ids
            .iter()
            .zip(&self.versions)
            .map(|(segment_id, version)| {
                SyncAction::Set(SegmentAssignment {
                    segment_id: *segment_id,
                    partition_id: self.partition_id,
                    node_id: self.node_id,
                    version: *version,
                    state: SegmentState::Loaded,
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReplicaSegmentsRequest {
    pub base: MsgBase,
    pub vchannel_name: String,
    pub replica_segments: Vec<ReplicaSegmentsInfo>,
}

// ========== Introspection ==========

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDataDistributionRequest {
    pub base: MsgBase,
}

/// A locally held segment as reported to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentVersionInfo {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub channel: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelVersionInfo {
    pub channel: String,
    pub collection_id: CollectionId,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDist {
    pub node_id: NodeId,
    pub version: i64,
}

/// What this node, as shard leader, believes about one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderView {
    pub collection_id: CollectionId,
    pub channel: String,
    pub segment_dist: BTreeMap<SegmentId, SegmentDist>,
    pub growing_segment_ids: Vec<SegmentId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetDataDistributionResponse {
    pub status: Status,
    pub node_id: NodeId,
    pub segments: Vec<SegmentVersionInfo>,
    pub channels: Vec<ChannelVersionInfo>,
    pub leader_views: Vec<LeaderView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSegmentInfoRequest {
    pub base: MsgBase,
    pub collection_id: CollectionId,
    /// Empty means every local segment of the collection.
    #[serde(default)]
    pub segment_ids: Vec<SegmentId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetSegmentInfoResponse {
    pub status: Status,
    pub infos: Vec<SegmentInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStates {
    pub status: Status,
    pub node_id: NodeId,
    pub state_code: StateCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_conversion() {
        let set = SyncActionRecord::set(PartitionId::new(1), SegmentId::new(2), NodeId::new(99), 3);
        match SyncAction::from(&set) {
            SyncAction::Set(assignment) => {
                assert_eq!(assignment.node_id, NodeId::new(99));
                assert_eq!(assignment.state, SegmentState::Loaded);
                assert_eq!(assignment.version, 3);
            }
            other => panic!("unexpected action {other:?}"),
        }

        let remove = SyncActionRecord::remove(PartitionId::new(1), SegmentId::new(2), 3);
        assert!(matches!(SyncAction::from(&remove), SyncAction::Remove { version: 3, .. }));

        let unknown = SyncActionRecord {
            kind: 30,
            ..set
        };
        assert!(matches!(
            SyncAction::from(&unknown),
            SyncAction::Unknown { kind: 30, .. }
        ));
    }

    #[test]
    fn test_record_state_defaults_to_loaded() {
        let json = r#"{"kind":1,"partition_id":1,"segment_id":2,"node_id":3,"version":4}"#;
        let record: SyncActionRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.state, SegmentState::Loaded);

        let loading = SyncActionRecord {
            state: SegmentState::Loading,
            ..record
        };
        match SyncAction::from(&loading) {
            SyncAction::Set(assignment) => assert_eq!(assignment.state, SegmentState::Loading),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_replica_segments_to_actions() {
        let info = ReplicaSegmentsInfo {
            node_id: NodeId::new(5),
            partition_id: PartitionId::new(1),
            segment_ids: vec![SegmentId::new(1), SegmentId::new(2)],
            versions: vec![7, 8],
        };
        let actions = info.to_actions().unwrap();
        assert_eq!(actions.len(), 2);
        match &actions[1] {
            SyncAction::Set(assignment) => {
                assert_eq!(assignment.segment_id, SegmentId::new(2));
                assert_eq!(assignment.version, 8);
                assert_eq!(assignment.state, SegmentState::Loaded);
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_replica_segments_missing_version_rejected() {
        let info = ReplicaSegmentsInfo {
            node_id: NodeId::new(5),
            partition_id: PartitionId::new(1),
            segment_ids: vec![SegmentId::new(1), SegmentId::new(2)],
            versions: vec![7],
        };
        let err = info.to_actions().unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(err.to_string().contains("2 segment ids but 1 versions"));
    }
}
