//! Local segment catalog.
//!
//! Registry of the collections, partitions and segments this node holds.
//! Every request path reads it concurrently; mutation is always explicit
//! (add / remove / set-type) and idempotent so that redundant load and
//! release notifications from the control plane are harmless.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use akidb_core::{
    CollectionId, CollectionSchema, CoreError, CoreResult, FieldId, IndexedFieldInfo, MetricType,
    PartitionId, SegmentId, SegmentInfo, SegmentType,
};

/// A collection loaded on this node.
#[derive(Debug)]
pub struct Collection {
    id: CollectionId,
    schema: CollectionSchema,
    metric_type: RwLock<Option<MetricType>>,
}

impl Collection {
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.id
    }

    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema
    }

    #[must_use]
    pub fn metric_type(&self) -> Option<MetricType> {
        *self.metric_type.read()
    }

    pub fn set_metric_type(&self, metric: MetricType) {
        *self.metric_type.write() = Some(metric);
    }
}

#[derive(Debug)]
struct SegmentMeta {
    segment_type: SegmentType,
    num_rows: i64,
    indexes: HashMap<FieldId, IndexedFieldInfo>,
}

/// A segment held by this node. Identity is fixed; type and index metadata
/// may change in place and are visible to every holder of the handle.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    collection_id: CollectionId,
    partition_id: PartitionId,
    channel: String,
    version: i64,
    loaded_at: DateTime<Utc>,
    meta: RwLock<SegmentMeta>,
}

impl Segment {
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[must_use]
    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    #[must_use]
    pub fn segment_type(&self) -> SegmentType {
        self.meta.read().segment_type
    }

    pub fn set_type(&self, segment_type: SegmentType) {
        self.meta.write().segment_type = segment_type;
    }

    #[must_use]
    pub fn num_rows(&self) -> i64 {
        self.meta.read().num_rows
    }

    pub fn set_num_rows(&self, num_rows: i64) {
        self.meta.write().num_rows = num_rows;
    }

    pub fn set_indexed_field_info(&self, field_id: FieldId, info: IndexedFieldInfo) {
        self.meta.write().indexes.insert(field_id, info);
    }

    #[must_use]
    pub fn indexed_field_info(&self, field_id: FieldId) -> Option<IndexedFieldInfo> {
        self.meta.read().indexes.get(&field_id).cloned()
    }

    #[must_use]
    pub fn has_index(&self, field_id: FieldId) -> bool {
        self.meta.read().indexes.contains_key(&field_id)
    }

    /// Point-in-time copy of this segment's metadata.
    #[must_use]
    pub fn info(&self) -> SegmentInfo {
        let meta = self.meta.read();
        let mut indexes: Vec<_> = meta.indexes.values().cloned().collect();
        indexes.sort_by_key(|info| info.field_id);
        SegmentInfo {
            segment_id: self.id,
            collection_id: self.collection_id,
            partition_id: self.partition_id,
            channel: self.channel.clone(),
            segment_type: meta.segment_type,
            num_rows: meta.num_rows,
            version: self.version,
            indexes,
            loaded_at: self.loaded_at,
        }
    }
}

/// Parameters for registering a segment.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub channel: String,
    pub segment_type: SegmentType,
    pub num_rows: i64,
    pub version: i64,
    pub indexes: Vec<IndexedFieldInfo>,
}

#[derive(Debug)]
struct CollectionEntry {
    collection: Arc<Collection>,
    partitions: BTreeSet<PartitionId>,
}

#[derive(Debug, Default)]
struct CatalogInner {
    collections: HashMap<CollectionId, CollectionEntry>,
    partitions: HashMap<PartitionId, CollectionId>,
    segments: HashMap<SegmentId, Arc<Segment>>,
}

/// Concurrency-safe registry of locally owned segments.
#[derive(Debug, Default)]
pub struct SegmentCatalog {
    inner: RwLock<CatalogInner>,
}

impl SegmentCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Collections ==========

    /// Registers a collection; an existing registration is returned unchanged.
    pub fn add_collection(&self, id: CollectionId, schema: CollectionSchema) -> Arc<Collection> {
        let mut inner = self.inner.write();
        if let Some(entry) = inner.collections.get(&id) {
            tracing::debug!(collection_id = %id, "collection already in catalog");
            return Arc::clone(&entry.collection);
        }

        let collection = Arc::new(Collection {
            id,
            schema,
            metric_type: RwLock::new(None),
        });
        inner.collections.insert(
            id,
            CollectionEntry {
                collection: Arc::clone(&collection),
                partitions: BTreeSet::new(),
            },
        );
        tracing::info!(collection_id = %id, "collection added to catalog");
        collection
    }

    pub fn get_collection(&self, id: CollectionId) -> CoreResult<Arc<Collection>> {
        self.inner
            .read()
            .collections
            .get(&id)
            .map(|entry| Arc::clone(&entry.collection))
            .ok_or(CoreError::CollectionNotFound(id))
    }

    #[must_use]
    pub fn has_collection(&self, id: CollectionId) -> bool {
        self.inner.read().collections.contains_key(&id)
    }

    #[must_use]
    pub fn collection_ids(&self) -> Vec<CollectionId> {
        let mut ids: Vec<_> = self.inner.read().collections.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Removes a collection with all of its partitions and segments.
    /// Removing an absent collection is not an error.
    pub fn remove_collection(&self, id: CollectionId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let Some(entry) = inner.collections.remove(&id) else {
            tracing::debug!(collection_id = %id, "collection not in catalog, nothing to remove");
            return Ok(());
        };

        for partition_id in &entry.partitions {
            inner.partitions.remove(partition_id);
        }
        let before = inner.segments.len();
        inner.segments.retain(|_, seg| seg.collection_id != id);

        tracing::info!(
            collection_id = %id,
            partitions = entry.partitions.len(),
            segments = before - inner.segments.len(),
            "collection removed from catalog"
        );
        Ok(())
    }

    // ========== Partitions ==========

    /// Registers a partition under a loaded collection. Idempotent.
    pub fn add_partition(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();
        if let Some(owner) = inner.partitions.get(&partition_id) {
            if *owner != collection_id {
                return Err(CoreError::already_exists(
                    "partition",
                    format!("{partition_id} (owned by collection {owner})"),
                ));
            }
            return Ok(());
        }

        let entry = inner
            .collections
            .get_mut(&collection_id)
            .ok_or(CoreError::CollectionNotFound(collection_id))?;
        entry.partitions.insert(partition_id);
        inner.partitions.insert(partition_id, collection_id);
        Ok(())
    }

    #[must_use]
    pub fn has_partition(&self, partition_id: PartitionId) -> bool {
        self.inner.read().partitions.contains_key(&partition_id)
    }

    pub fn partition_ids(&self, collection_id: CollectionId) -> CoreResult<Vec<PartitionId>> {
        self.inner
            .read()
            .collections
            .get(&collection_id)
            .map(|entry| entry.partitions.iter().copied().collect())
            .ok_or(CoreError::CollectionNotFound(collection_id))
    }

    /// Removes a partition and its segments. Removing an absent partition is not an error.
    pub fn remove_partition(&self, partition_id: PartitionId) -> CoreResult<()> {
        let mut inner = self.inner.write();
        let Some(collection_id) = inner.partitions.remove(&partition_id) else {
            return Ok(());
        };
        if let Some(entry) = inner.collections.get_mut(&collection_id) {
            entry.partitions.remove(&partition_id);
        }
        inner.segments.retain(|_, seg| seg.partition_id != partition_id);
        tracing::info!(
            collection_id = %collection_id,
            partition_id = %partition_id,
            "partition removed from catalog"
        );
        Ok(())
    }

    // ========== Segments ==========

    /// Registers a segment. Returns `Ok(false)` when the segment is already
    /// present, leaving the existing entry untouched.
    pub fn add_segment(&self, segment: NewSegment) -> CoreResult<bool> {
        let mut inner = self.inner.write();
        if inner.segments.contains_key(&segment.segment_id) {
            tracing::debug!(segment_id = %segment.segment_id, "segment already in catalog");
            return Ok(false);
        }

        if !inner.collections.contains_key(&segment.collection_id) {
            return Err(CoreError::CollectionNotFound(segment.collection_id));
        }
        match inner.partitions.get(&segment.partition_id) {
            Some(owner) if *owner == segment.collection_id => {}
            _ => return Err(CoreError::PartitionNotFound(segment.partition_id)),
        }

        let indexes = segment
            .indexes
            .into_iter()
            .map(|info| (info.field_id, info))
            .collect();
        let entry = Arc::new(Segment {
            id: segment.segment_id,
            collection_id: segment.collection_id,
            partition_id: segment.partition_id,
            channel: segment.channel,
            version: segment.version,
            loaded_at: Utc::now(),
            meta: RwLock::new(SegmentMeta {
                segment_type: segment.segment_type,
                num_rows: segment.num_rows,
                indexes,
            }),
        });
        tracing::debug!(
            segment_id = %entry.id,
            segment_type = segment.segment_type.as_str(),
            channel = %entry.channel,
            "segment added to catalog"
        );
        inner.segments.insert(entry.id, entry);
        Ok(true)
    }

    /// Looks up a segment of the given type.
    pub fn get_segment_by_id(
        &self,
        id: SegmentId,
        segment_type: SegmentType,
    ) -> CoreResult<Arc<Segment>> {
        self.get_segment(id)
            .filter(|seg| seg.segment_type() == segment_type)
            .ok_or(CoreError::SegmentNotFound(id))
    }

    /// Looks up a segment of any type.
    #[must_use]
    pub fn get_segment(&self, id: SegmentId) -> Option<Arc<Segment>> {
        self.inner.read().segments.get(&id).cloned()
    }

    /// Removes a segment if it is present with the given type.
    /// Returns whether anything was removed.
    pub fn remove_segment(&self, id: SegmentId, segment_type: SegmentType) -> bool {
        let mut inner = self.inner.write();
        let matches = inner
            .segments
            .get(&id)
            .is_some_and(|seg| seg.segment_type() == segment_type);
        if matches {
            inner.segments.remove(&id);
            tracing::debug!(segment_id = %id, segment_type = segment_type.as_str(), "segment removed");
        }
        matches
    }

    /// Removes every segment of `channel`, optionally restricted to one type.
    pub fn remove_channel_segments(
        &self,
        channel: &str,
        segment_type: Option<SegmentType>,
    ) -> usize {
        let mut inner = self.inner.write();
        let before = inner.segments.len();
        inner.segments.retain(|_, seg| {
            !(seg.channel == channel && segment_type.map_or(true, |t| seg.segment_type() == t))
        });
        before - inner.segments.len()
    }

    /// Segments of a collection, optionally restricted to partitions and a type,
    /// ordered by segment id.
    #[must_use]
    pub fn segments(
        &self,
        collection_id: CollectionId,
        partition_ids: &[PartitionId],
        segment_type: Option<SegmentType>,
    ) -> Vec<Arc<Segment>> {
        let inner = self.inner.read();
        let mut segments: Vec<_> = inner
            .segments
            .values()
            .filter(|seg| seg.collection_id == collection_id)
            .filter(|seg| partition_ids.is_empty() || partition_ids.contains(&seg.partition_id))
            .filter(|seg| segment_type.map_or(true, |t| seg.segment_type() == t))
            .cloned()
            .collect();
        segments.sort_by_key(|seg| seg.id);
        segments
    }

    /// Segments streaming from `channel` with the given type, ordered by segment id.
    #[must_use]
    pub fn channel_segments(&self, channel: &str, segment_type: SegmentType) -> Vec<Arc<Segment>> {
        let inner = self.inner.read();
        let mut segments: Vec<_> = inner
            .segments
            .values()
            .filter(|seg| seg.channel == channel && seg.segment_type() == segment_type)
            .cloned()
            .collect();
        segments.sort_by_key(|seg| seg.id);
        segments
    }

    /// Metadata of every local segment, ordered by segment id.
    #[must_use]
    pub fn segment_infos(&self) -> Vec<SegmentInfo> {
        let inner = self.inner.read();
        let mut infos: Vec<_> = inner.segments.values().map(|seg| seg.info()).collect();
        infos.sort_by_key(|info| info.segment_id);
        infos
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_segment(id: i64, partition: i64, segment_type: SegmentType) -> NewSegment {
        NewSegment {
            segment_id: SegmentId::new(id),
            collection_id: CollectionId::new(1),
            partition_id: PartitionId::new(partition),
            channel: "dml-0".to_string(),
            segment_type,
            num_rows: 100,
            version: 1,
            indexes: Vec::new(),
        }
    }

    fn catalog_with_partitions() -> SegmentCatalog {
        let catalog = SegmentCatalog::new();
        catalog.add_collection(CollectionId::new(1), CollectionSchema::default());
        catalog
            .add_partition(CollectionId::new(1), PartitionId::new(10))
            .unwrap();
        catalog
            .add_partition(CollectionId::new(1), PartitionId::new(11))
            .unwrap();
        catalog
    }

    #[test]
    fn test_add_collection_is_idempotent() {
        let catalog = SegmentCatalog::new();
        let first = catalog.add_collection(CollectionId::new(1), CollectionSchema::default());
        first.set_metric_type(MetricType::L2);
        let second = catalog.add_collection(CollectionId::new(1), CollectionSchema::default());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.metric_type(), Some(MetricType::L2));
        assert_eq!(catalog.collection_ids(), vec![CollectionId::new(1)]);
    }

    #[test]
    fn test_add_partition_requires_collection() {
        let catalog = SegmentCatalog::new();
        let err = catalog
            .add_partition(CollectionId::new(9), PartitionId::new(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotFound(_)));
    }

    #[test]
    fn test_add_segment_is_idempotent() {
        let catalog = catalog_with_partitions();
        assert!(catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap());
        let first = catalog.get_segment(SegmentId::new(1)).unwrap().loaded_at();
        assert!(!catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap());
        assert_eq!(catalog.segment_count(), 1);

        // The first registration is kept.
        let segment = catalog.get_segment(SegmentId::new(1)).unwrap();
        assert_eq!(segment.loaded_at(), first);
        assert_eq!(segment.info().loaded_at, first);
    }

    #[test]
    fn test_add_segment_requires_partition() {
        let catalog = catalog_with_partitions();
        let err = catalog
            .add_segment(new_segment(1, 99, SegmentType::Sealed))
            .unwrap_err();
        assert!(matches!(err, CoreError::PartitionNotFound(_)));
    }

    #[test]
    fn test_get_segment_by_id_filters_type() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap();

        assert!(catalog
            .get_segment_by_id(SegmentId::new(1), SegmentType::Sealed)
            .is_ok());
        let err = catalog
            .get_segment_by_id(SegmentId::new(1), SegmentType::Growing)
            .unwrap_err();
        assert!(matches!(err, CoreError::SegmentNotFound(_)));
        assert!(catalog
            .get_segment_by_id(SegmentId::new(2), SegmentType::Sealed)
            .is_err());
    }

    #[test]
    fn test_set_type_visible_immediately() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Growing))
            .unwrap();
        let handle = catalog.get_segment(SegmentId::new(1)).unwrap();
        handle.set_type(SegmentType::Sealed);

        assert!(catalog
            .get_segment_by_id(SegmentId::new(1), SegmentType::Sealed)
            .is_ok());
        assert!(catalog
            .channel_segments("dml-0", SegmentType::Growing)
            .is_empty());
    }

    #[test]
    fn test_set_indexed_field_info() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap();
        let handle = catalog
            .get_segment_by_id(SegmentId::new(1), SegmentType::Sealed)
            .unwrap();
        handle.set_indexed_field_info(
            FieldId::new(101),
            IndexedFieldInfo {
                field_id: FieldId::new(101),
                index_name: "ivf".into(),
                ..Default::default()
            },
        );

        let again = catalog.get_segment(SegmentId::new(1)).unwrap();
        assert!(again.has_index(FieldId::new(101)));
        assert_eq!(again.info().indexes.len(), 1);
    }

    #[test]
    fn test_remove_missing_is_not_error() {
        let catalog = catalog_with_partitions();
        assert!(!catalog.remove_segment(SegmentId::new(42), SegmentType::Sealed));
        assert!(catalog.remove_partition(PartitionId::new(77)).is_ok());
        assert!(catalog.remove_collection(CollectionId::new(77)).is_ok());
    }

    #[test]
    fn test_remove_segment_respects_type() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Growing))
            .unwrap();
        assert!(!catalog.remove_segment(SegmentId::new(1), SegmentType::Sealed));
        assert!(catalog.remove_segment(SegmentId::new(1), SegmentType::Growing));
        assert!(catalog.get_segment(SegmentId::new(1)).is_none());
    }

    #[test]
    fn test_remove_collection_cascades() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap();
        catalog
            .add_segment(new_segment(2, 11, SegmentType::Growing))
            .unwrap();

        catalog.remove_collection(CollectionId::new(1)).unwrap();

        assert!(!catalog.has_collection(CollectionId::new(1)));
        assert!(!catalog.has_partition(PartitionId::new(10)));
        for (id, segment_type) in [(1, SegmentType::Sealed), (2, SegmentType::Growing)] {
            let err = catalog
                .get_segment_by_id(SegmentId::new(id), segment_type)
                .unwrap_err();
            assert!(matches!(err, CoreError::SegmentNotFound(_)));
        }
    }

    #[test]
    fn test_remove_partition_cascades() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(1, 10, SegmentType::Sealed))
            .unwrap();
        catalog
            .add_segment(new_segment(2, 11, SegmentType::Sealed))
            .unwrap();

        catalog.remove_partition(PartitionId::new(10)).unwrap();

        assert!(catalog.get_segment(SegmentId::new(1)).is_none());
        assert!(catalog.get_segment(SegmentId::new(2)).is_some());
        assert_eq!(
            catalog.partition_ids(CollectionId::new(1)).unwrap(),
            vec![PartitionId::new(11)]
        );
    }

    #[test]
    fn test_segments_filtering() {
        let catalog = catalog_with_partitions();
        catalog
            .add_segment(new_segment(3, 10, SegmentType::Sealed))
            .unwrap();
        catalog
            .add_segment(new_segment(1, 11, SegmentType::Sealed))
            .unwrap();
        catalog
            .add_segment(new_segment(2, 10, SegmentType::Growing))
            .unwrap();

        let all = catalog.segments(CollectionId::new(1), &[], None);
        let ids: Vec<_> = all.iter().map(|s| s.id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let sealed_p10 = catalog.segments(
            CollectionId::new(1),
            &[PartitionId::new(10)],
            Some(SegmentType::Sealed),
        );
        assert_eq!(sealed_p10.len(), 1);
        assert_eq!(sealed_p10[0].id(), SegmentId::new(3));

        assert_eq!(catalog.remove_channel_segments("dml-0", Some(SegmentType::Growing)), 1);
        assert_eq!(catalog.segment_count(), 2);
    }

    #[test]
    fn test_concurrent_reads_during_mutation() {
        let catalog = Arc::new(catalog_with_partitions());
        let writer = {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for id in 0..200 {
                    catalog
                        .add_segment(new_segment(id, 10, SegmentType::Sealed))
                        .unwrap();
                }
                for id in 0..200 {
                    catalog.remove_segment(SegmentId::new(id), SegmentType::Sealed);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let catalog = Arc::clone(&catalog);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let segments = catalog.segments(CollectionId::new(1), &[], None);
                        assert!(segments.len() <= 200);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(catalog.segment_count(), 0);
    }
}
