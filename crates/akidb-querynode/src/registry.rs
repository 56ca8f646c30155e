use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use akidb_core::{CollectionId, ReplicaId};

use crate::shard_cluster::ShardCluster;

/// Shard cluster registry, one cluster per watched DML channel.
///
/// Lookups hand out `Arc<ShardCluster>`; releasing a channel removes it from
/// the map and releases the instance, so a caller still holding the `Arc` sees
/// a Released cluster while earlier snapshots stay intact.
#[derive(Debug, Default)]
pub struct ShardClusterRegistry {
    clusters: RwLock<HashMap<String, Arc<ShardCluster>>>,
}

impl ShardClusterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cluster for `channel`. Returns the existing instance when
    /// the channel is already present.
    pub fn add_shard_cluster(
        &self,
        collection_id: CollectionId,
        replica_id: ReplicaId,
        channel: &str,
        version: i64,
    ) -> Arc<ShardCluster> {
        let mut clusters = self.clusters.write();
        if let Some(existing) = clusters.get(channel) {
            tracing::debug!(channel, "shard cluster already registered");
            return Arc::clone(existing);
        }

        let cluster = Arc::new(ShardCluster::new(
            collection_id,
            replica_id,
            channel,
            version,
        ));
        clusters.insert(channel.to_string(), Arc::clone(&cluster));
        tracing::info!(
            channel,
            collection_id = %collection_id,
            replica_id = %replica_id,
            version,
            "shard cluster registered"
        );
        cluster
    }

    /// Lookup; absence means the channel is not watched here.
    pub fn get_shard_cluster(&self, channel: &str) -> Option<Arc<ShardCluster>> {
        self.clusters.read().get(channel).cloned()
    }

    /// Remove and release the cluster for `channel`. Returns whether one existed.
    pub fn release_shard_cluster(&self, channel: &str) -> bool {
        let removed = self.clusters.write().remove(channel);
        match removed {
            Some(cluster) => {
                cluster.release();
                true
            }
            None => false,
        }
    }

    /// Release every cluster belonging to `collection_id`; returns their channels.
    pub fn release_collection(&self, collection_id: CollectionId) -> Vec<String> {
        let removed: Vec<(String, Arc<ShardCluster>)> = {
            let mut clusters = self.clusters.write();
            let channels: Vec<String> = clusters
                .iter()
                .filter(|(_, cluster)| cluster.collection_id() == collection_id)
                .map(|(channel, _)| channel.clone())
                .collect();
            channels
                .into_iter()
                .filter_map(|channel| clusters.remove(&channel).map(|c| (channel, c)))
                .collect()
        };

        removed
            .into_iter()
            .map(|(channel, cluster)| {
                cluster.release();
                channel
            })
            .collect()
    }

    /// Watched channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.clusters.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    /// All registered clusters, sorted by channel.
    pub fn clusters(&self) -> Vec<Arc<ShardCluster>> {
        let mut clusters: Vec<Arc<ShardCluster>> = self.clusters.read().values().cloned().collect();
        clusters.sort_by(|a, b| a.channel().cmp(b.channel()));
        clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.read().is_empty()
    }
}
