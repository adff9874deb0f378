use anyhow::{bail, Context};
use serde_json::Value;

use crate::block_ref::{common, BlockRefHandler, BlockReference, BlockScope};

#[derive(Default, Clone)]
pub struct Handler;

fn range_bound(filter: &Value, field: &str) -> anyhow::Result<Option<u64>> {
    if filter[field].is_null() {
        return Ok(None);
    }

    let reference = common::extract_block_number(&filter[field])
        .with_context(|| format!("`{field}` is not a valid block number"))?;

    Ok(match reference.scope {
        BlockScope::Concrete(_) => Some(reference.number),
        _ => None,
    })
}

impl BlockRefHandler for Handler {
    fn method_name(&self) -> &'static str {
        "eth_getLogs"
    }

    /// A `blockHash` filter pins a single block, a fully numeric range is keyed
    /// as `<from>-<to>` and numbered after its upper bound.
    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference> {
        let params = common::require_array_params(params, common::ParamsSpec::Exact(1))?;
        let filter = &params[0];

        if !filter.is_object() {
            bail!("params[0] not a filter object");
        }

        if !filter["blockHash"].is_null() {
            return common::extract_block_hash(&filter["blockHash"])
                .context("`blockHash` is not a valid block hash");
        }

        let from_block = range_bound(filter, "fromBlock")?;
        let to_block = range_bound(filter, "toBlock")?;

        match (from_block, to_block) {
            (Some(from_block), Some(to_block)) => Ok(BlockReference {
                scope: BlockScope::Concrete(format!("{from_block}-{to_block}")),
                number: to_block,
            }),
            _ => Ok(BlockReference::unresolved()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    static HANDLER: Handler = Handler;

    #[test]
    fn test_block_range() {
        let params = json!([
          {
            "address": [
              "0xb59f67a8bff5d8cd03f6ac17265c550ed8f33907"
            ],
            "fromBlock": "0x429d3b",
            "toBlock": "0x429d3c",
            "topics": [
              "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
            ]
          },
        ]);

        let reference = HANDLER.extract_from_request(&params).unwrap();
        assert_eq!(
            reference,
            BlockReference {
                scope: BlockScope::Concrete("4365627-4365628".to_string()),
                number: 4365628,
            }
        );
    }

    #[test]
    fn test_block_hash() {
        let params = json!([
          {
            "blockHash": "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef",
            "topics": []
          },
        ]);

        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap(),
            BlockReference::from_hash(
                "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef".to_string()
            )
        );
    }

    #[test]
    fn test_open_range_is_unresolved() {
        let params = json!([{ "fromBlock": "0x1" }]);
        assert!(HANDLER.extract_from_request(&params).unwrap().is_unresolved());

        let params = json!([{ "fromBlock": "0x1", "toBlock": "latest" }]);
        assert!(HANDLER.extract_from_request(&params).unwrap().is_unresolved());
    }

    #[test]
    fn test_invalid_filter() {
        let params = json!(["0x1"]);
        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap_err().to_string(),
            "params[0] not a filter object"
        );

        let params = json!([{ "fromBlock": "0x1", "toBlock": "bogus" }]);
        assert_eq!(
            HANDLER.extract_from_request(&params).unwrap_err().to_string(),
            "`toBlock` is not a valid block number"
        );
    }
}
