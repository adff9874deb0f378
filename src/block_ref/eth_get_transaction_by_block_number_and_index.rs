use anyhow::Context;
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionByBlockNumberAndIndex"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::Exact(2))?;

        let reference =
            common::extract_block_number(&params[0]).context("params[0] not a valid block number")?;
        common::require_index(&params[1])?;

        Ok(reference)
    }

    fn extract_from_response(&self, _params: &Value, result: &Value) -> anyhow::Result<BlockReference> {
        common::extract_transaction_block_reference(result)
    }
}
