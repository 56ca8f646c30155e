use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, FieldId, PartitionId, SegmentId};

/// Local data type of a segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SegmentType {
    /// Still receiving inserts from the DML stream.
    Growing,
    /// Flushed and immutable; may carry an index.
    Sealed,
}

impl SegmentType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Growing => "growing",
            Self::Sealed => "sealed",
        }
    }
}

/// Serving state of a segment in a shard's distribution table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SegmentState {
    #[default]
    Offline,
    Loading,
    Loaded,
}

/// Index attached to one field of a sealed segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IndexedFieldInfo {
    pub field_id: FieldId,
    pub index_name: String,
    pub index_id: i64,
    pub build_id: i64,
    #[serde(default)]
    pub index_params: HashMap<String, String>,
}

/// Point-in-time description of a locally held segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub channel: String,
    pub segment_type: SegmentType,
    pub num_rows: i64,
    pub version: i64,
    pub indexes: Vec<IndexedFieldInfo>,
    /// When this node registered the segment.
    pub loaded_at: DateTime<Utc>,
}
