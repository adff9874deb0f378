use anyhow::Context;
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference};

#[derive(Default, Clone)]
pub struct Handler;

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getStorageAt"
    }

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::AtLeast(2))?;

        params[1].as_str().context("params[1] not a storage slot")?;

        common::extract_account_block_reference(params, 2)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    static HANDLER: Handler = Handler;

    #[test]
    fn test() {
        let params = json!([
            "0x1234567890abcdef1234567890abcdef12345678",
            "0x0",
            "0x10"
        ]);
        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap(),
            BlockReference::from_number(16)
        );
    }

    #[test]
    fn test_invalid_params_len() {
        let params = json!(["0x1234567890abcdef1234567890abcdef12345678"]);
        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap_err().to_string(),
            "expected at least 2 params, got 1"
        );
    }

    #[test]
    fn test_invalid_block_tag() {
        let params = json!([
            "0x1234567890abcdef1234567890abcdef12345678",
            "0x0",
            true
        ]);
        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap_err().to_string(),
            "params[2] not a valid block tag"
        );
    }
}
