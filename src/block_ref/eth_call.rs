use anyhow::Context;
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_call"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::AtLeast(1))?;

        params[0]
            .as_object()
            .context("params[0] not a transaction call object")?;

        common::extract_block_param(params.get(1).unwrap_or(&Value::Null))
            .context("params[1] not a valid block tag")
    }
}
