use std::sync::Arc;

use async_trait::async_trait;

use akidb_core::{CoreError, CoreResult, QueryNodeConfig};
use akidb_querynode::request::{QueryParams, QueryResults, SearchParams, SearchResults, Statistics};
use akidb_querynode::{telemetry, QueryNode, Segment, SegmentExecutor};

/// Kernel placeholder used until the transport attaches a real one; every
/// call fails with an execution error.
struct DetachedKernel;

#[async_trait]
impl SegmentExecutor for DetachedKernel {
    async fn search(&self, segment: &Segment, _params: &SearchParams) -> CoreResult<SearchResults> {
        Err(detached(segment))
    }

    async fn retrieve(&self, segment: &Segment, _params: &QueryParams) -> CoreResult<QueryResults> {
        Err(detached(segment))
    }

    async fn statistics(&self, segment: &Segment) -> CoreResult<Statistics> {
        Ok(Statistics {
            row_count: segment.num_rows(),
        })
    }
}

fn detached(segment: &Segment) -> CoreError {
    CoreError::Execution(format!(
        "no execution kernel attached for segment {}",
        segment.id()
    ))
}

#[tokio::main]
async fn main() {
    let config = match QueryNodeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    telemetry::init_logging(&config.logging);

    let node = QueryNode::new(config, Arc::new(DetachedKernel));
    node.start();

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }

    node.stop();
}
