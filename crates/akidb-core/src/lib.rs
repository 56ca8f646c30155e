//! Core domain types shared by the AkiDB query node crates.

pub mod collection;
pub mod config;
pub mod error;
pub mod ids;
pub mod segment;
pub mod status;

pub use collection::{CollectionSchema, DataType, FieldSchema, MetricType};
pub use config::{LoggingConfig, NodeConfig, QueryConfig, QueryNodeConfig, SchedulerConfig};
pub use error::{CoreError, CoreResult};
pub use ids::{CollectionId, FieldId, NodeId, PartitionId, ReplicaId, SegmentId};
pub use segment::{IndexedFieldInfo, SegmentInfo, SegmentState, SegmentType};
pub use status::{ErrorCode, Status};
