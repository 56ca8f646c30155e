//! Request routing against a distribution snapshot, and merging of partial
//! results gathered from local segments and peers.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use akidb_core::{CollectionId, NodeId, PartitionId, SegmentId, SegmentState, SegmentType};

use crate::catalog::{Segment, SegmentCatalog};
use crate::request::{QueryResults, SearchHit, SearchResults, Statistics};
use crate::shard_cluster::DistributionSnapshot;

/// What part of a collection a request covers.
#[derive(Debug, Clone, Copy)]
pub struct RouteScope<'a> {
    pub collection_id: CollectionId,
    /// Empty means every partition.
    pub partition_ids: &'a [PartitionId],
    pub ignore_growing: bool,
}

impl RouteScope<'_> {
    fn covers_partition(&self, partition_id: PartitionId) -> bool {
        self.partition_ids.is_empty() || self.partition_ids.contains(&partition_id)
    }

    fn admits(&self, segment: &Segment) -> bool {
        segment.collection_id() == self.collection_id
            && self.covers_partition(segment.partition_id())
            && !(self.ignore_growing && segment.segment_type() == SegmentType::Growing)
    }
}

/// Split of one channel's segments between this node and its peers.
#[derive(Debug, Default)]
pub struct RoutePlan {
    /// Segments to execute here, ordered as routed.
    pub local: Vec<Arc<Segment>>,
    /// Segments to forward, grouped by owning node.
    pub remote: BTreeMap<NodeId, Vec<SegmentId>>,
    /// Assigned to this node by the snapshot but missing from the catalog.
    pub(crate) skipped: Vec<SegmentId>,
}

impl RoutePlan {
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Decides where each segment of a request is served.
#[derive(Debug, Clone)]
pub struct RequestRouter {
    node_id: NodeId,
    catalog: Arc<SegmentCatalog>,
}

impl RequestRouter {
    pub fn new(node_id: NodeId, catalog: Arc<SegmentCatalog>) -> Self {
        Self { node_id, catalog }
    }

    /// Routes a shard-leader request.
    ///
    /// An unserviceable snapshot routes nothing. Only `Loaded` records are
    /// routable. Growing segments streaming on the channel are always local
    /// unless the scope ignores them.
    pub fn route(&self, snapshot: &DistributionSnapshot, scope: &RouteScope<'_>) -> RoutePlan {
        let mut plan = RoutePlan::default();
        if !snapshot.is_serviceable() {
            return plan;
        }

        let mut seen = HashSet::new();
        for assignment in snapshot.segments() {
            if assignment.state != SegmentState::Loaded
                || !scope.covers_partition(assignment.partition_id)
            {
                continue;
            }

            if assignment.node_id != self.node_id {
                plan.remote
                    .entry(assignment.node_id)
                    .or_default()
                    .push(assignment.segment_id);
                continue;
            }

            match self.catalog.get_segment(assignment.segment_id) {
                Some(segment) if segment.collection_id() == scope.collection_id => {
                    if scope.admits(&segment) && seen.insert(segment.id()) {
                        plan.local.push(segment);
                    }
                }
                _ => {
                    tracing::warn!(
                        channel = snapshot.channel(),
                        segment_id = %assignment.segment_id,
                        version = assignment.version,
                        "segment assigned to this node is not in the catalog, skipped"
                    );
                    plan.skipped.push(assignment.segment_id);
                }
            }
        }

        if !scope.ignore_growing {
            for segment in self
                .catalog
                .channel_segments(snapshot.channel(), SegmentType::Growing)
            {
                if scope.admits(&segment) && seen.insert(segment.id()) {
                    plan.local.push(segment);
                }
            }
        }

        tracing::debug!(
            channel = snapshot.channel(),
            version = snapshot.version(),
            local = plan.local.len(),
            remote_nodes = plan.remote.len(),
            skipped = ?plan.skipped,
            "request routed"
        );
        plan
    }

    /// Resolves the explicit segment list of a request forwarded by a shard
    /// leader. Segments no longer held here are skipped.
    pub fn resolve_local(&self, segment_ids: &[SegmentId], scope: &RouteScope<'_>) -> Vec<Arc<Segment>> {
        segment_ids
            .iter()
            .filter_map(|id| {
                let segment = self.catalog.get_segment(*id);
                if segment.is_none() {
                    tracing::debug!(segment_id = %id, "forwarded segment not held locally");
                }
                segment
            })
            .filter(|segment| scope.admits(segment))
            .collect()
    }
}

/// Merges per-source hits: per query, highest score first, one hit per id,
/// truncated to `topk`.
pub fn merge_search_results(parts: Vec<SearchResults>, num_queries: usize, topk: usize) -> SearchResults {
    let mut merged = SearchResults::empty(num_queries);
    for part in parts {
        for (query, hits) in part.hits.into_iter().enumerate().take(num_queries) {
            merged.hits[query].extend(hits);
        }
    }

    for hits in &mut merged.hits {
        hits.sort_by(|a: &SearchHit, b: &SearchHit| {
            b.score.total_cmp(&a.score).then(a.id.cmp(&b.id))
        });
        let mut seen = HashSet::new();
        hits.retain(|hit| seen.insert(hit.id));
        hits.truncate(topk);
    }
    merged
}

/// Merges query rows: first row per primary key wins, ordered by key.
pub fn merge_query_results(parts: Vec<QueryResults>, limit: Option<usize>) -> QueryResults {
    let mut rows = BTreeMap::new();
    for part in parts {
        for row in part.rows {
            rows.entry(row.pk).or_insert(row);
        }
    }

    let mut merged: Vec<_> = rows.into_values().collect();
    if let Some(limit) = limit {
        merged.truncate(limit);
    }
    QueryResults { rows: merged }
}

pub fn merge_statistics(parts: impl IntoIterator<Item = Statistics>) -> Statistics {
    Statistics {
        row_count: parts.into_iter().map(|s| s.row_count).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewSegment;
    use crate::request::QueryRow;
    use crate::shard_cluster::{SegmentAssignment, ShardCluster, SyncAction};
    use akidb_core::{CollectionSchema, ReplicaId};

    const SELF: i64 = 1;

    fn catalog() -> Arc<SegmentCatalog> {
        let catalog = Arc::new(SegmentCatalog::new());
        catalog.add_collection(CollectionId::new(1), CollectionSchema::default());
        catalog.add_partition(CollectionId::new(1), PartitionId::new(1)).unwrap();
        catalog.add_partition(CollectionId::new(1), PartitionId::new(2)).unwrap();
        catalog
    }

    fn add(catalog: &SegmentCatalog, id: i64, partition: i64, segment_type: SegmentType) {
        catalog
            .add_segment(NewSegment {
                segment_id: SegmentId::new(id),
                collection_id: CollectionId::new(1),
                partition_id: PartitionId::new(partition),
                channel: "dml-0".to_string(),
                segment_type,
                num_rows: 10,
                version: 1,
                indexes: vec![],
            })
            .unwrap();
    }

    fn assign(segment: i64, partition: i64, node: i64, state: SegmentState) -> SyncAction {
        SyncAction::Set(SegmentAssignment {
            segment_id: SegmentId::new(segment),
            partition_id: PartitionId::new(partition),
            node_id: NodeId::new(node),
            version: 1,
            state,
        })
    }

    fn scope(partitions: &[PartitionId], ignore_growing: bool) -> RouteScope<'_> {
        RouteScope {
            collection_id: CollectionId::new(1),
            partition_ids: partitions,
            ignore_growing,
        }
    }

    fn ids(segments: &[Arc<Segment>]) -> Vec<i64> {
        segments.iter().map(|s| s.id().get()).collect()
    }

    fn synced_cluster(actions: &[SyncAction]) -> ShardCluster {
        let cluster = ShardCluster::new(CollectionId::new(1), ReplicaId::new(1), "dml-0", 0);
        cluster.sync_segments(actions).unwrap();
        cluster.setup_first_version().unwrap();
        cluster
    }

    #[test]
    fn test_unsynced_routes_nothing() {
        let catalog = catalog();
        add(&catalog, 1, 1, SegmentType::Sealed);
        add(&catalog, 5, 1, SegmentType::Growing);
        let cluster = ShardCluster::new(CollectionId::new(1), ReplicaId::new(1), "dml-0", 0);
        cluster
            .sync_segments(&[assign(1, 1, SELF, SegmentState::Loaded)])
            .unwrap();

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let plan = router.route(&cluster.snapshot(), &scope(&[], false));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_local_remote_split() {
        let catalog = catalog();
        add(&catalog, 1, 1, SegmentType::Sealed);
        add(&catalog, 5, 1, SegmentType::Growing);
        let cluster = synced_cluster(&[
            assign(1, 1, SELF, SegmentState::Loaded),
            assign(2, 1, 2, SegmentState::Loaded),
            assign(3, 2, 2, SegmentState::Loaded),
            assign(4, 1, 3, SegmentState::Loading),
        ]);

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let plan = router.route(&cluster.snapshot(), &scope(&[], false));

        assert_eq!(ids(&plan.local), vec![1, 5]);
        assert_eq!(
            plan.remote.get(&NodeId::new(2)),
            Some(&vec![SegmentId::new(2), SegmentId::new(3)])
        );
        assert!(!plan.remote.contains_key(&NodeId::new(3)));
    }

    #[test]
    fn test_ignore_growing_narrows_scope() {
        let catalog = catalog();
        add(&catalog, 1, 1, SegmentType::Sealed);
        add(&catalog, 5, 1, SegmentType::Growing);
        let cluster = synced_cluster(&[assign(1, 1, SELF, SegmentState::Loaded)]);

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let plan = router.route(&cluster.snapshot(), &scope(&[], true));
        assert_eq!(ids(&plan.local), vec![1]);
    }

    #[test]
    fn test_partition_filter() {
        let catalog = catalog();
        add(&catalog, 1, 1, SegmentType::Sealed);
        add(&catalog, 2, 2, SegmentType::Sealed);
        let cluster = synced_cluster(&[
            assign(1, 1, SELF, SegmentState::Loaded),
            assign(2, 2, SELF, SegmentState::Loaded),
        ]);

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let partitions = [PartitionId::new(2)];
        let plan = router.route(&cluster.snapshot(), &scope(&partitions, false));
        assert_eq!(ids(&plan.local), vec![2]);
    }

    #[test]
    fn test_missing_local_segment_skipped() {
        let catalog = catalog();
        let cluster = synced_cluster(&[assign(7, 1, SELF, SegmentState::Loaded)]);

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let plan = router.route(&cluster.snapshot(), &scope(&[], false));
        assert!(plan.local.is_empty());
        assert_eq!(plan.skipped, vec![SegmentId::new(7)]);
    }

    #[test]
    fn test_resolve_local() {
        let catalog = catalog();
        add(&catalog, 1, 1, SegmentType::Sealed);
        add(&catalog, 5, 1, SegmentType::Growing);

        let router = RequestRouter::new(NodeId::new(SELF), catalog);
        let wanted = [SegmentId::new(1), SegmentId::new(5), SegmentId::new(9)];
        assert_eq!(ids(&router.resolve_local(&wanted, &scope(&[], false))), vec![1, 5]);
        assert_eq!(ids(&router.resolve_local(&wanted, &scope(&[], true))), vec![1]);
    }

    fn hit(id: i64, score: f32) -> SearchHit {
        SearchHit { id, score }
    }

    #[test]
    fn test_merge_search_results() {
        let a = SearchResults {
            hits: vec![vec![hit(1, 0.9), hit(2, 0.5)], vec![hit(10, 0.1)]],
        };
        let b = SearchResults {
            hits: vec![vec![hit(3, 0.7), hit(1, 0.9)], vec![hit(11, 0.3)]],
        };

        let merged = merge_search_results(vec![a, b], 2, 2);
        assert_eq!(merged.hits[0], vec![hit(1, 0.9), hit(3, 0.7)]);
        assert_eq!(merged.hits[1], vec![hit(11, 0.3), hit(10, 0.1)]);
    }

    #[test]
    fn test_merge_search_results_empty() {
        let merged = merge_search_results(vec![], 3, 10);
        assert_eq!(merged.hits.len(), 3);
        assert_eq!(merged.total_hits(), 0);
    }

    #[test]
    fn test_merge_query_results_dedups_by_pk() {
        let row = |pk: i64, tag: &str| QueryRow {
            pk,
            fields: [("tag".to_string(), serde_json::json!(tag))].into_iter().collect(),
        };
        let merged = merge_query_results(
            vec![
                QueryResults {
                    rows: vec![row(3, "a"), row(1, "a")],
                },
                QueryResults {
                    rows: vec![row(1, "b"), row(2, "b")],
                },
            ],
            None,
        );
        let pks: Vec<_> = merged.rows.iter().map(|r| r.pk).collect();
        assert_eq!(pks, vec![1, 2, 3]);
        assert_eq!(merged.rows[0].fields["tag"], serde_json::json!("a"));

        let limited = merge_query_results(vec![merged], Some(2));
        assert_eq!(limited.rows.len(), 2);
    }

    #[test]
    fn test_merge_statistics() {
        let total = merge_statistics([Statistics { row_count: 3 }, Statistics { row_count: 4 }]);
        assert_eq!(total.row_count, 7);
    }
}
