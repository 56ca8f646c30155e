use async_trait::async_trait;

use akidb_core::{CoreResult, NodeId};

use crate::catalog::Segment;
use crate::request::{
    GetStatisticsRequest, GetStatisticsResponse, QueryParams, QueryRequest, QueryResponse,
    QueryResults, SearchParams, SearchRequest, SearchResponse, SearchResults, Statistics,
};

/// Execution kernel evaluating requests against one locally loaded segment.
#[async_trait]
pub trait SegmentExecutor: Send + Sync {
    /// Ranked hits for each query in `params`, best first.
    async fn search(&self, segment: &Segment, params: &SearchParams) -> CoreResult<SearchResults>;

    /// Rows matching the filter expression.
    async fn retrieve(&self, segment: &Segment, params: &QueryParams) -> CoreResult<QueryResults>;

    async fn statistics(&self, segment: &Segment) -> CoreResult<Statistics>;
}

/// Transport used to forward sub-requests to the nodes owning remote segments.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn search(&self, node_id: NodeId, request: SearchRequest) -> CoreResult<SearchResponse>;

    async fn query(&self, node_id: NodeId, request: QueryRequest) -> CoreResult<QueryResponse>;

    async fn get_statistics(
        &self,
        node_id: NodeId,
        request: GetStatisticsRequest,
    ) -> CoreResult<GetStatisticsResponse>;
}
