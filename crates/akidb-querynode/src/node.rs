//! Query node entry points.
//!
//! Every entry point checks the [`NodeGate`] before touching shared state and
//! answers with a response carrying a [`Status`]; none of them return `Err`.

use std::sync::Arc;

use futures::future::{join, join_all};
use parking_lot::RwLock;

use akidb_core::{
    CoreError, CoreResult, NodeId, QueryNodeConfig, SegmentId, SegmentInfo, SegmentType, Status,
};

use crate::catalog::{NewSegment, Segment, SegmentCatalog};
use crate::context::RequestContext;
use crate::gate::{NodeGate, StateCode};
use crate::hook::{apply_hook, HookContext, QueryHook};
use crate::registry::ShardClusterRegistry;
use crate::request::{
    ChannelVersionInfo, ComponentStates, GetDataDistributionRequest, GetDataDistributionResponse,
    GetSegmentInfoRequest, GetSegmentInfoResponse, GetStatisticsRequest, GetStatisticsResponse,
    LeaderView, LoadSegmentsRequest, MsgBase, QueryRequest, QueryResponse, QueryResults,
    ReleaseCollectionRequest, ReleasePartitionsRequest, ReleaseScope, ReleaseSegmentsRequest,
    SearchRequest, SearchResponse, SearchResults, SegmentDist, SegmentVersionInfo, Statistics,
    SyncDistributionRequest, SyncReplicaSegmentsRequest, UnwatchChannelRequest,
    WatchChannelRequest,
};
use crate::router::{
    merge_query_results, merge_search_results, merge_statistics, RequestRouter, RoutePlan,
    RouteScope,
};
use crate::shard_cluster::SyncAction;
use crate::task_pool::TaskPool;
use crate::traits::{PeerClient, SegmentExecutor};

/// A query-serving node: local segment catalog, per-channel distribution
/// tables, and the request fan-out built on them.
pub struct QueryNode {
    config: QueryNodeConfig,
    gate: NodeGate,
    catalog: Arc<SegmentCatalog>,
    registry: Arc<ShardClusterRegistry>,
    router: RequestRouter,
    task_pool: TaskPool,
    executor: Arc<dyn SegmentExecutor>,
    peer: Option<Arc<dyn PeerClient>>,
    hook: RwLock<Option<Arc<dyn QueryHook>>>,
}

impl QueryNode {
    /// Creates a node in the `Abnormal` state; call [`QueryNode::start`] to serve.
    pub fn new(config: QueryNodeConfig, executor: Arc<dyn SegmentExecutor>) -> Self {
        let node_id = config.node.node_id;
        let catalog = Arc::new(SegmentCatalog::new());
        Self {
            gate: NodeGate::new(node_id),
            router: RequestRouter::new(node_id, Arc::clone(&catalog)),
            catalog,
            registry: Arc::new(ShardClusterRegistry::new()),
            task_pool: TaskPool::new(config.scheduler.task_pool_size),
            executor,
            peer: None,
            hook: RwLock::new(None),
            config,
        }
    }

    pub fn with_peer_client(mut self, peer: Arc<dyn PeerClient>) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_query_hook(self, hook: Arc<dyn QueryHook>) -> Self {
        self.set_query_hook(Some(hook));
        self
    }

    pub fn set_query_hook(&self, hook: Option<Arc<dyn QueryHook>>) {
        *self.hook.write() = hook;
    }

    fn query_hook(&self) -> Option<Arc<dyn QueryHook>> {
        self.hook.read().clone()
    }

    pub fn node_id(&self) -> NodeId {
        self.gate.node_id()
    }

    pub fn catalog(&self) -> &Arc<SegmentCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<ShardClusterRegistry> {
        &self.registry
    }

    pub fn task_pool(&self) -> &TaskPool {
        &self.task_pool
    }

    // ========== Lifecycle ==========

    pub fn start(&self) {
        self.gate.update_state_code(StateCode::Healthy);
        tracing::info!(node_id = %self.node_id(), "query node started");
    }

    pub fn update_state_code(&self, code: StateCode) {
        self.gate.update_state_code(code);
    }

    pub fn state_code(&self) -> StateCode {
        self.gate.state_code()
    }

    /// Refuses new requests, closes the task pool and releases every shard cluster.
    pub fn stop(&self) {
        self.gate.update_state_code(StateCode::Stopping);
        self.task_pool.close();
        for channel in self.registry.channels() {
            self.registry.release_shard_cluster(&channel);
        }
        tracing::info!(node_id = %self.node_id(), "query node stopped");
    }

    /// Liveness probe. Not gated.
    pub fn get_component_states(&self) -> ComponentStates {
        ComponentStates {
            status: Status::success(),
            node_id: self.node_id(),
            state_code: self.gate.state_code(),
        }
    }

    // ========== Watch / load / release ==========

    /// Watches a DML channel. The context is checked at admission only: a
    /// watch that has started is never abandoned halfway.
    pub async fn watch_channel(&self, ctx: &RequestContext, req: WatchChannelRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        if ctx.is_done() {
            return failure("watch_channel", &CoreError::Cancelled);
        }
        let channel = req.channel.clone();
        let catalog = Arc::clone(&self.catalog);
        let registry = Arc::clone(&self.registry);
        let result = self
            .task_pool
            .submit("watch_channel", async move { watch(&catalog, &registry, req) })
            .await;

        match result {
            Ok(()) => {
                tracing::info!(channel = %channel, "channel watched");
                Status::success()
            }
            Err(err) => failure("watch_channel", &err),
        }
    }

    pub async fn unwatch_channel(&self, req: UnwatchChannelRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        let released = self.registry.release_shard_cluster(&req.channel);
        let removed = self
            .catalog
            .remove_channel_segments(&req.channel, Some(SegmentType::Growing));
        tracing::info!(
            channel = %req.channel,
            released,
            growing_segments = removed,
            "channel unwatched"
        );
        Status::success()
    }

    /// Registers sealed segments. Segments already present are left as they are.
    /// Like a watch, the context is only checked at admission.
    pub async fn load_segments(&self, ctx: &RequestContext, req: LoadSegmentsRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        if ctx.is_done() {
            return failure("load_segments", &CoreError::Cancelled);
        }
        let catalog = Arc::clone(&self.catalog);
        let result = self
            .task_pool
            .submit("load_segments", async move { load(&catalog, req) })
            .await;

        match result {
            Ok(()) => Status::success(),
            Err(err) => failure("load_segments", &err),
        }
    }

    pub async fn release_segments(&self, req: ReleaseSegmentsRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        let types: &[SegmentType] = match req.scope {
            ReleaseScope::All => &[SegmentType::Growing, SegmentType::Sealed],
            ReleaseScope::Streaming => &[SegmentType::Growing],
            ReleaseScope::Historical => &[SegmentType::Sealed],
        };
        let mut removed = 0;
        for segment_id in &req.segment_ids {
            for segment_type in types {
                if self.catalog.remove_segment(*segment_id, *segment_type) {
                    removed += 1;
                }
            }
        }
        tracing::info!(
            collection_id = %req.collection_id,
            requested = req.segment_ids.len(),
            removed,
            scope = ?req.scope,
            "segments released"
        );
        Status::success()
    }

    pub async fn release_collection(&self, req: ReleaseCollectionRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        let channels = self.registry.release_collection(req.collection_id);
        for channel in &channels {
            self.catalog.remove_channel_segments(channel, None);
        }
        match self.catalog.remove_collection(req.collection_id) {
            Ok(()) => {
                tracing::info!(
                    collection_id = %req.collection_id,
                    channels = channels.len(),
                    "collection released"
                );
                Status::success()
            }
            Err(err) => failure("release_collection", &err),
        }
    }

    pub async fn release_partitions(&self, req: ReleasePartitionsRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        for partition_id in &req.partition_ids {
            if let Err(err) = self.catalog.remove_partition(*partition_id) {
                return failure("release_partitions", &err);
            }
        }
        Status::success()
    }

    // ========== Distribution sync ==========

    pub async fn sync_distribution(&self, req: SyncDistributionRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        let actions: Vec<SyncAction> = req.actions.iter().map(SyncAction::from).collect();
        match self.sync_channel(&req.channel, &actions) {
            Ok(()) => Status::success(),
            Err(err) => failure("sync_distribution", &err),
        }
    }

    /// Legacy sync: per-node segment lists installed as `Loaded` records.
    pub async fn sync_replica_segments(&self, req: SyncReplicaSegmentsRequest) -> Status {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return status;
        }

        let result = req
            .replica_segments
            .iter()
            .map(|info| info.to_actions())
            .collect::<CoreResult<Vec<_>>>()
            .map(|batches| batches.concat())
            .and_then(|actions| self.sync_channel(&req.vchannel_name, &actions));
        match result {
            Ok(()) => Status::success(),
            Err(err) => failure("sync_replica_segments", &err),
        }
    }

    fn sync_channel(&self, channel: &str, actions: &[SyncAction]) -> CoreResult<()> {
        let cluster = self
            .registry
            .get_shard_cluster(channel)
            .ok_or_else(|| CoreError::ChannelNotFound(channel.to_string()))?;
        cluster.sync_segments(actions)?;
        Ok(())
    }

    // ========== Introspection ==========

    pub async fn get_data_distribution(
        &self,
        req: GetDataDistributionRequest,
    ) -> GetDataDistributionResponse {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return GetDataDistributionResponse {
                status,
                node_id: self.node_id(),
                ..Default::default()
            };
        }

        let segments = self
            .catalog
            .segment_infos()
            .into_iter()
            .filter(|info| info.segment_type == SegmentType::Sealed)
            .map(|info| SegmentVersionInfo {
                segment_id: info.segment_id,
                collection_id: info.collection_id,
                partition_id: info.partition_id,
                channel: info.channel,
                version: info.version,
            })
            .collect();

        let mut channels = Vec::new();
        let mut leader_views = Vec::new();
        for cluster in self.registry.clusters() {
            let snapshot = cluster.snapshot();
            channels.push(ChannelVersionInfo {
                channel: cluster.channel().to_string(),
                collection_id: cluster.collection_id(),
                version: snapshot.version(),
            });
            leader_views.push(LeaderView {
                collection_id: cluster.collection_id(),
                channel: cluster.channel().to_string(),
                segment_dist: snapshot
                    .segments()
                    .into_iter()
                    .map(|a| {
                        (
                            a.segment_id,
                            SegmentDist {
                                node_id: a.node_id,
                                version: a.version,
                            },
                        )
                    })
                    .collect(),
                growing_segment_ids: self
                    .catalog
                    .channel_segments(cluster.channel(), SegmentType::Growing)
                    .iter()
                    .map(|segment| segment.id())
                    .collect(),
            });
        }

        GetDataDistributionResponse {
            status: Status::success(),
            node_id: self.node_id(),
            segments,
            channels,
            leader_views,
        }
    }

    pub async fn get_segment_info(&self, req: GetSegmentInfoRequest) -> GetSegmentInfoResponse {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return GetSegmentInfoResponse {
                status,
                infos: Vec::new(),
            };
        }

        let infos: Vec<SegmentInfo> = if req.segment_ids.is_empty() {
            self.catalog
                .segments(req.collection_id, &[], None)
                .iter()
                .map(|segment| segment.info())
                .collect()
        } else {
            req.segment_ids
                .iter()
                .filter_map(|id| self.catalog.get_segment(*id))
                .filter(|segment| segment.collection_id() == req.collection_id)
                .map(|segment| segment.info())
                .collect()
        };

        GetSegmentInfoResponse {
            status: Status::success(),
            infos,
        }
    }

    // ========== Search / query / statistics ==========

    pub async fn search(&self, ctx: &RequestContext, req: SearchRequest) -> SearchResponse {
        let num_queries = req.req.num_queries;
        if let Some(status) = self.gate.check(req.base.target_id) {
            return SearchResponse {
                status,
                results: SearchResults::empty(num_queries),
            };
        }

        let max_topk = self.config.query.max_topk;
        if i64::try_from(req.req.topk).map_or(true, |topk| topk > max_topk) {
            let err = CoreError::ValidationError(format!(
                "topk {} exceeds the limit {max_topk}",
                req.req.topk
            ));
            return SearchResponse {
                status: failure("search", &err),
                results: SearchResults::empty(num_queries),
            };
        }

        let outcomes = join_all(
            req.dml_channels
                .iter()
                .map(|channel| self.search_channel(ctx, &req, channel)),
        )
        .await;

        let (parts, status) = collect_outcomes("search", outcomes);
        SearchResponse {
            status,
            results: merge_search_results(parts, num_queries, req.req.topk),
        }
    }

    /// Searches one channel. An unwatched or unsynced channel contributes nothing.
    pub async fn search_channel(
        &self,
        ctx: &RequestContext,
        req: &SearchRequest,
        channel: &str,
    ) -> CoreResult<SearchResults> {
        let params = &req.req;
        let scope = RouteScope {
            collection_id: params.collection_id,
            partition_ids: &params.partition_ids,
            ignore_growing: params.ignore_growing,
        };
        let Some(plan) = self
            .resolve_channel(ctx, channel, &scope, req.from_shard_leader, &req.segment_ids)
            .await?
        else {
            return Ok(SearchResults::empty(params.num_queries));
        };

        let collection = self.catalog.get_collection(params.collection_id)?;
        if let Some(loaded) = collection.metric_type() {
            if loaded != params.metric_type {
                return Err(CoreError::ValidationError(format!(
                    "metric type not match, expected {}, actual {}",
                    loaded.as_str(),
                    params.metric_type.as_str()
                )));
            }
        }

        let mut params = params.clone();
        if !req.from_shard_leader {
            if let Some(hook) = self.query_hook() {
                let hook_ctx = HookContext {
                    node_id: self.node_id(),
                    collection_id: params.collection_id,
                    channel,
                };
                params.serialized_plan =
                    apply_hook(hook.as_ref(), &hook_ctx, &params.serialized_plan)?;
            }
        }

        let local = ctx.run(async {
            join_all(
                plan.local
                    .iter()
                    .map(|segment| self.executor.search(segment, &params)),
            )
            .await
            .into_iter()
            .collect::<CoreResult<Vec<_>>>()
        });

        let remote = join_all(plan.remote.into_iter().map(|(node_id, segment_ids)| {
            let request = SearchRequest {
                base: MsgBase::to(node_id),
                req: params.clone(),
                dml_channels: vec![channel.to_string()],
                segment_ids,
                from_shard_leader: true,
            };
            async move {
                let peer = self.peer_client(node_id)?;
                let response = ctx
                    .with_timeout(self.config.query.forward_timeout())
                    .run(peer.search(node_id, request))
                    .await?;
                check_remote(node_id, &response.status)?;
                Ok::<_, CoreError>(response.results)
            }
        }));

        let (local, remote) = join(local, remote).await;
        let mut parts = local?;
        for part in remote {
            parts.push(part?);
        }
        Ok(merge_search_results(parts, params.num_queries, params.topk))
    }

    pub async fn query(&self, ctx: &RequestContext, req: QueryRequest) -> QueryResponse {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return QueryResponse {
                status,
                results: QueryResults::default(),
            };
        }

        let outcomes = join_all(
            req.dml_channels
                .iter()
                .map(|channel| self.query_channel(ctx, &req, channel)),
        )
        .await;

        let (parts, status) = collect_outcomes("query", outcomes);
        QueryResponse {
            status,
            results: merge_query_results(parts, req.req.limit),
        }
    }

    async fn query_channel(
        &self,
        ctx: &RequestContext,
        req: &QueryRequest,
        channel: &str,
    ) -> CoreResult<QueryResults> {
        let params = &req.req;
        let scope = RouteScope {
            collection_id: params.collection_id,
            partition_ids: &params.partition_ids,
            ignore_growing: params.ignore_growing,
        };
        let Some(plan) = self
            .resolve_channel(ctx, channel, &scope, req.from_shard_leader, &req.segment_ids)
            .await?
        else {
            return Ok(QueryResults::default());
        };

        let local = ctx.run(async {
            join_all(
                plan.local
                    .iter()
                    .map(|segment| self.executor.retrieve(segment, params)),
            )
            .await
            .into_iter()
            .collect::<CoreResult<Vec<_>>>()
        });

        let remote = join_all(plan.remote.into_iter().map(|(node_id, segment_ids)| {
            let request = QueryRequest {
                base: MsgBase::to(node_id),
                req: params.clone(),
                dml_channels: vec![channel.to_string()],
                segment_ids,
                from_shard_leader: true,
            };
            async move {
                let peer = self.peer_client(node_id)?;
                let response = ctx
                    .with_timeout(self.config.query.forward_timeout())
                    .run(peer.query(node_id, request))
                    .await?;
                check_remote(node_id, &response.status)?;
                Ok::<_, CoreError>(response.results)
            }
        }));

        let (local, remote) = join(local, remote).await;
        let mut parts = local?;
        for part in remote {
            parts.push(part?);
        }
        Ok(merge_query_results(parts, params.limit))
    }

    pub async fn get_statistics(
        &self,
        ctx: &RequestContext,
        req: GetStatisticsRequest,
    ) -> GetStatisticsResponse {
        if let Some(status) = self.gate.check(req.base.target_id) {
            return GetStatisticsResponse {
                status,
                statistics: Statistics::default(),
            };
        }

        let outcomes = join_all(
            req.dml_channels
                .iter()
                .map(|channel| self.statistics_channel(ctx, &req, channel)),
        )
        .await;

        let (parts, status) = collect_outcomes("get_statistics", outcomes);
        GetStatisticsResponse {
            status,
            statistics: merge_statistics(parts),
        }
    }

    async fn statistics_channel(
        &self,
        ctx: &RequestContext,
        req: &GetStatisticsRequest,
        channel: &str,
    ) -> CoreResult<Statistics> {
        let scope = RouteScope {
            collection_id: req.req.collection_id,
            partition_ids: &req.req.partition_ids,
            ignore_growing: false,
        };
        let Some(plan) = self
            .resolve_channel(ctx, channel, &scope, req.from_shard_leader, &req.segment_ids)
            .await?
        else {
            return Ok(Statistics::default());
        };

        let local = ctx.run(async {
            join_all(
                plan.local
                    .iter()
                    .map(|segment| self.executor.statistics(segment)),
            )
            .await
            .into_iter()
            .collect::<CoreResult<Vec<_>>>()
        });

        let remote = join_all(plan.remote.into_iter().map(|(node_id, segment_ids)| {
            let request = GetStatisticsRequest {
                base: MsgBase::to(node_id),
                req: req.req.clone(),
                dml_channels: vec![channel.to_string()],
                segment_ids,
                from_shard_leader: true,
            };
            async move {
                let peer = self.peer_client(node_id)?;
                let response = ctx
                    .with_timeout(self.config.query.forward_timeout())
                    .run(peer.get_statistics(node_id, request))
                    .await?;
                check_remote(node_id, &response.status)?;
                Ok::<_, CoreError>(response.statistics)
            }
        }));

        let (local, remote) = join(local, remote).await;
        let mut parts = local?;
        for part in remote {
            parts.push(part?);
        }
        Ok(merge_statistics(parts))
    }

    /// Decides which segments of `channel` this request covers.
    ///
    /// `None` means the channel contributes nothing: it is not watched here,
    /// or its distribution is not synced (after waiting up to the configured
    /// sync timeout).
    async fn resolve_channel(
        &self,
        ctx: &RequestContext,
        channel: &str,
        scope: &RouteScope<'_>,
        from_shard_leader: bool,
        segment_ids: &[SegmentId],
    ) -> CoreResult<Option<RoutePlan>> {
        if from_shard_leader {
            let local: Vec<Arc<Segment>> = self.router.resolve_local(segment_ids, scope);
            return Ok(Some(RoutePlan {
                local,
                ..Default::default()
            }));
        }

        let Some(cluster) = self.registry.get_shard_cluster(channel) else {
            tracing::debug!(channel, "channel not watched, no contribution");
            return Ok(None);
        };

        if !cluster.is_synced() {
            let Some(timeout) = self.config.query.sync_wait_timeout() else {
                tracing::debug!(channel, "shard cluster not synced, no contribution");
                return Ok(None);
            };
            match cluster.wait_synced(&ctx.with_timeout(timeout)).await {
                Ok(()) => {}
                Err(CoreError::Cancelled) if !ctx.is_done() => {
                    tracing::debug!(channel, "shard cluster not synced in time, no contribution");
                    return Ok(None);
                }
                Err(CoreError::ClusterReleased(_)) => return Ok(None),
                Err(err) => return Err(err),
            }
        }

        let snapshot = cluster.snapshot();
        if !snapshot.is_serviceable() {
            return Ok(None);
        }
        Ok(Some(self.router.route(&snapshot, scope)))
    }

    fn peer_client(&self, node_id: NodeId) -> CoreResult<&Arc<dyn PeerClient>> {
        self.peer.as_ref().ok_or_else(|| {
            CoreError::Execution(format!("no peer client configured to reach node {node_id}"))
        })
    }
}

fn watch(
    catalog: &SegmentCatalog,
    registry: &ShardClusterRegistry,
    req: WatchChannelRequest,
) -> CoreResult<()> {
    catalog.add_collection(req.collection_id, req.schema);
    for partition_id in &req.partition_ids {
        catalog.add_partition(req.collection_id, *partition_id)?;
    }

    let cluster = registry.add_shard_cluster(
        req.collection_id,
        req.replica_id,
        &req.channel,
        req.version,
    );

    for info in req.growing_segments {
        catalog.add_partition(req.collection_id, info.partition_id)?;
        catalog.add_segment(NewSegment {
            segment_id: info.segment_id,
            collection_id: req.collection_id,
            partition_id: info.partition_id,
            channel: info.channel,
            segment_type: SegmentType::Growing,
            num_rows: info.num_rows,
            version: info.version,
            indexes: info.indexes,
        })?;
    }

    cluster.setup_first_version()
}

fn load(catalog: &SegmentCatalog, req: LoadSegmentsRequest) -> CoreResult<()> {
    let collection = catalog.add_collection(req.collection_id, req.schema);
    if let Some(metric) = req.metric_type {
        collection.set_metric_type(metric);
    }

    for info in req.infos {
        catalog.add_partition(req.collection_id, info.partition_id)?;
        let segment_id = info.segment_id;
        let added = catalog.add_segment(NewSegment {
            segment_id,
            collection_id: req.collection_id,
            partition_id: info.partition_id,
            channel: info.channel,
            segment_type: SegmentType::Sealed,
            num_rows: info.num_rows,
            version: info.version,
            indexes: info.indexes,
        })?;
        if added {
            tracing::info!(segment_id = %segment_id, collection_id = %req.collection_id, "segment loaded");
        } else {
            tracing::debug!(segment_id = %segment_id, "segment already loaded");
        }
    }
    Ok(())
}

fn check_remote(node_id: NodeId, status: &Status) -> CoreResult<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CoreError::Execution(format!(
            "node {node_id} replied {}: {}",
            status.error_code.as_str(),
            status.reason
        )))
    }
}

fn failure(operation: &'static str, err: &CoreError) -> Status {
    match err {
        CoreError::Cancelled => tracing::debug!(operation, "request cancelled"),
        _ => tracing::error!(operation, error = %err, "request failed"),
    }
    Status::from(err)
}

/// Splits per-channel outcomes into successful parts and the overall status,
/// which reports the first failing channel.
fn collect_outcomes<T>(operation: &'static str, outcomes: Vec<CoreResult<T>>) -> (Vec<T>, Status) {
    let mut parts = Vec::with_capacity(outcomes.len());
    let mut status = Status::success();
    for outcome in outcomes {
        match outcome {
            Ok(part) => parts.push(part),
            Err(err) => {
                let failed = failure(operation, &err);
                if status.is_success() {
                    status = failed;
                }
            }
        }
    }
    (parts, status)
}
