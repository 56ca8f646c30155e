//! AkiDB query node: segment catalog, per-channel shard distribution and
//! request fan-out.

pub mod catalog;
pub mod context;
pub mod gate;
pub mod hook;
pub mod node;
pub mod plan;
pub mod registry;
pub mod request;
pub mod router;
pub mod shard_cluster;
pub mod task_pool;
pub mod telemetry;
pub mod traits;

pub use catalog::{Collection, NewSegment, Segment, SegmentCatalog};
pub use context::{CancelHandle, RequestContext};
pub use gate::{NodeGate, StateCode};
pub use hook::{HookContext, QueryHook};
pub use node::QueryNode;
pub use plan::SearchPlan;
pub use registry::ShardClusterRegistry;
pub use router::{RequestRouter, RoutePlan, RouteScope};
pub use shard_cluster::{
    ClusterState, DistributionSnapshot, SegmentAssignment, ShardCluster, SyncAction, SyncSummary,
};
pub use task_pool::TaskPool;
pub use traits::{PeerClient, SegmentExecutor};
