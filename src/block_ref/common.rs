use std::str::FromStr;

use alloy_primitives::{Address, B256, U64};
use anyhow::{bail, Context};
use serde_json::Value;

use super::BlockReference;

pub(super) enum ParamsSpec {
    Exact(usize),
    AtLeast(usize),
}

pub(super) fn require_array_params(params: &Value, spec: ParamsSpec) -> anyhow::Result<&Vec<Value>> {
    let params = params
        .as_array()
        .context("params not found or not an array")?;

    match spec {
        ParamsSpec::Exact(n) if params.len() != n => {
            bail!("expected {} params, got {}", n, params.len())
        }
        ParamsSpec::AtLeast(n) if params.len() < n => {
            bail!("expected at least {} params, got {}", n, params.len())
        }
        _ => Ok(params),
    }
}

pub(super) fn parse_hex_u64(s: &str) -> anyhow::Result<u64> {
    let digits = s.strip_prefix("0x").context("expect a 0x prefixed hex string")?;
    u64::from_str_radix(digits, 16).context("expect a valid hex number")
}

fn format_hash(s: &str) -> anyhow::Result<String> {
    let hash = B256::from_str(s).context("expect a valid block hash")?;
    Ok(format!("{hash:#x}"))
}

/// Block number or tag, as taken by `eth_getBlockByNumber` and friends.
pub(super) fn extract_block_number(value: &Value) -> anyhow::Result<BlockReference> {
    match value {
        Value::String(tag) => match tag.as_str() {
            "earliest" => Ok(BlockReference::from_number(0)),
            "latest" | "pending" | "safe" | "finalized" => Ok(BlockReference::unresolved()),
            tag => Ok(BlockReference::from_number(parse_hex_u64(tag)?)),
        },
        _ => bail!("block number not a string"),
    }
}

pub(super) fn extract_block_hash(value: &Value) -> anyhow::Result<BlockReference> {
    match value {
        Value::String(hash) => Ok(BlockReference::from_hash(format_hash(hash)?)),
        _ => bail!("block hash not a string"),
    }
}

/// Any block parameter: a number, a tag, a raw block hash or an EIP-1898
/// `{blockHash}` / `{blockNumber}` object. A missing parameter means `latest`.
pub(super) fn extract_block_param(value: &Value) -> anyhow::Result<BlockReference> {
    match value {
        Value::Null => Ok(BlockReference::unresolved()),
        Value::String(tag) if tag.len() == 66 => extract_block_hash(value),
        Value::String(_) => extract_block_number(value),
        Value::Object(obj) => {
            if let Some(block_hash) = obj.get("blockHash") {
                return extract_block_hash(block_hash);
            }

            if let Some(block_number) = obj.get("blockNumber") {
                return extract_block_number(block_number);
            }

            bail!("block object has neither blockHash nor blockNumber")
        }
        _ => bail!("block tag not a string or object"),
    }
}

/// Validates `[address, ..., block]` style params and extracts the block at `block_index`.
pub(super) fn extract_account_block_reference(
    params: &[Value],
    block_index: usize,
) -> anyhow::Result<BlockReference> {
    let _: Address =
        serde_json::from_value(params[0].clone()).context("params[0] not a valid address")?;

    extract_block_param(params.get(block_index).unwrap_or(&Value::Null))
        .with_context(|| format!("params[{block_index}] not a valid block tag"))
}

pub(super) fn require_transaction_hash(value: &Value) -> anyhow::Result<()> {
    let _: B256 = serde_json::from_value(value.clone())
        .context("params[0] is not a valid transaction hash")?;
    Ok(())
}

pub(super) fn require_index(value: &Value) -> anyhow::Result<()> {
    let _: U64 = serde_json::from_value(value.clone()).context("params[1] is not a valid index")?;
    Ok(())
}

/// Block of a mined transaction or receipt; pending transactions carry null block fields.
pub(super) fn extract_transaction_block_reference(result: &Value) -> anyhow::Result<BlockReference> {
    if !result.is_object() {
        bail!("transaction result not an object");
    }

    let number = match &result["blockNumber"] {
        Value::String(number) => parse_hex_u64(number).context("blockNumber not a hex string")?,
        _ => 0,
    };

    match &result["blockHash"] {
        Value::String(hash) => Ok(BlockReference {
            number,
            ..BlockReference::from_hash(format_hash(hash)?)
        }),
        _ if number != 0 => Ok(BlockReference::from_number(number)),
        _ => Ok(BlockReference::unresolved()),
    }
}

/// Block of a block object, from its `hash` and `number` fields.
pub(super) fn extract_block_object_reference(result: &Value) -> anyhow::Result<BlockReference> {
    if !result.is_object() {
        bail!("block result not an object");
    }

    let number = match &result["number"] {
        Value::String(number) => parse_hex_u64(number).context("number not a hex string")?,
        _ => 0,
    };

    match &result["hash"] {
        Value::String(hash) => Ok(BlockReference {
            number,
            ..BlockReference::from_hash(format_hash(hash)?)
        }),
        _ if number != 0 => Ok(BlockReference::from_number(number)),
        _ => Ok(BlockReference::unresolved()),
    }
}
