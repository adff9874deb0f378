use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getBalance"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::AtLeast(1))?;
        common::extract_account_block_reference(params, 1)
    }
}
