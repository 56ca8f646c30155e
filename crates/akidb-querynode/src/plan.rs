//! Serialized search plan carried by search requests.
//!
//! Plans travel as JSON bytes. The node only decodes them when a rewrite
//! hook is installed; otherwise the bytes go to the execution kernel as-is.

use serde::{Deserialize, Serialize};

use akidb_core::{CoreResult, MetricType};

/// Vector search plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPlan {
    /// Boolean filter expression applied before ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<String>,

    /// Name of the vector field searched.
    pub anns_field: String,

    pub topk: i64,

    pub metric_type: MetricType,

    /// Index-specific search parameters as a JSON string, e.g. `{"nprobe":10}`.
    #[serde(default)]
    pub search_params: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_fields: Vec<String>,
}

impl SearchPlan {
    /// Decodes a plan. The error message is the decoder's, unaltered.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
