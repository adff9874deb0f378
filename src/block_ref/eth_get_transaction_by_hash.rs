use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getTransactionByHash"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::Exact(1))?;
        common::require_transaction_hash(&params[0])?;

        Ok(BlockReference::wildcard())
    }

    fn extract_from_response(&self, _params: &Value, result: &Value) -> anyhow::Result<BlockReference> {
        common::extract_transaction_block_reference(result)
    }
}
