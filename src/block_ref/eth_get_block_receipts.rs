use anyhow::Context;
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getBlockReceipts"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::AtLeast(1))?;

        common::extract_block_param(&params[0]).context("params[0] is not a valid block tag")
    }

    fn extract_from_response(&self, _params: &Value, result: &Value) -> anyhow::Result<BlockReference> {
        let receipts = result.as_array().context("receipts not an array")?;

        match receipts.first() {
            Some(receipt) => common::extract_transaction_block_reference(receipt),
            None => Ok(BlockReference::unresolved()),
        }
    }
}
