use anyhow::Context;
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

/// Traces carry no block information, they stay valid for any block the
/// transaction lands in.
#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "debug_traceTransaction"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::AtLeast(1))?;
        common::require_transaction_hash(&params[0])?;

        if params.len() > 1 {
            params[1].as_object().context("params[1] not an object")?;
        }

        Ok(BlockReference::wildcard())
    }
}
