//! Optional query-rewrite capability.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use akidb_core::{CollectionId, CoreError, CoreResult, NodeId};

use crate::plan::SearchPlan;

/// What the hook is told about the request it rewrites.
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub node_id: NodeId,
    pub collection_id: CollectionId,
    pub channel: &'a str,
}

/// Rewrites a search plan before dispatch.
///
/// Returning `Err(reason)` aborts the request for that channel; the reason is
/// reported to the caller unchanged.
pub trait QueryHook: Send + Sync {
    fn rewrite(&self, ctx: &HookContext<'_>, plan: SearchPlan) -> Result<SearchPlan, String>;
}

/// Decodes `serialized_plan`, runs the hook and re-encodes the result.
///
/// A panicking hook is reported as an internal error carrying the panic message.
pub(crate) fn apply_hook(
    hook: &dyn QueryHook,
    ctx: &HookContext<'_>,
    serialized_plan: &[u8],
) -> CoreResult<Vec<u8>> {
    let plan = SearchPlan::decode(serialized_plan)?;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook.rewrite(ctx, plan)));
    let rewritten = match outcome {
        Ok(Ok(plan)) => plan,
        Ok(Err(reason)) => return Err(CoreError::Hook(reason)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(channel = ctx.channel, %message, "query hook panicked");
            return Err(CoreError::internal(format!("query hook panicked: {message}")));
        }
    };

    rewritten.encode()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
