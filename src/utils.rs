use anyhow::{bail, Context};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};

pub async fn do_rpc_request<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    rpc_url: Url,
    body: &T,
) -> anyhow::Result<Value> {
    let result = client
        .post(rpc_url)
        .json(body)
        .send()
        .await?
        .json::<Value>()
        .await?;

    Ok(result)
}

async fn call_upstream(
    client: &reqwest::Client,
    rpc_url: &Url,
    method: &str,
    params: Value,
) -> anyhow::Result<Value> {
    let request_payload = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    });

    let mut response = do_rpc_request(client, rpc_url.clone(), &request_payload)
        .await
        .with_context(|| format!("fail to call {method}"))?;

    match response["error"].take() {
        Value::Null => Ok(response["result"].take()),
        error => bail!("{method} failed: {error}"),
    }
}

fn parse_quantity(value: &Value) -> anyhow::Result<u64> {
    let quantity = value.as_str().context("quantity not a string")?;
    let digits = quantity
        .strip_prefix("0x")
        .context("quantity not 0x prefixed")?;

    u64::from_str_radix(digits, 16).context("quantity not a valid hex number")
}

pub async fn get_chain_id(client: &reqwest::Client, rpc_url: &Url) -> anyhow::Result<u64> {
    let result = call_upstream(client, rpc_url, "eth_chainId", json!([])).await?;
    parse_quantity(&result).context("fail to get chain id")
}

pub async fn get_finalized_block_number(
    client: &reqwest::Client,
    rpc_url: &Url,
) -> anyhow::Result<u64> {
    let block = call_upstream(
        client,
        rpc_url,
        "eth_getBlockByNumber",
        json!(["finalized", false]),
    )
    .await?;

    parse_quantity(&block["number"]).context("fail to get finalized block number")
}

/// `eth_syncing` answers `false` when synced and a progress object otherwise.
pub async fn get_syncing(client: &reqwest::Client, rpc_url: &Url) -> anyhow::Result<bool> {
    let result = call_upstream(client, rpc_url, "eth_syncing", json!([])).await?;
    Ok(parse_syncing(&result))
}

fn parse_syncing(result: &Value) -> bool {
    !matches!(result, Value::Bool(false) | Value::Null)
}
