use anyhow::{anyhow, bail};
use serde_json::{Map, Value};
use sha1::Digest;

use crate::json_rpc::{JsonRpcRequest, JsonRpcResponse};

/// A parsed JSON-RPC call bound to the network it is addressed to.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    network_id: String,
    rpc: JsonRpcRequest,
}

impl NormalizedRequest {
    pub fn new(network_id: impl Into<String>, rpc: JsonRpcRequest) -> Self {
        Self {
            network_id: network_id.into(),
            rpc,
        }
    }

    pub fn from_value(network_id: impl Into<String>, raw: Value) -> anyhow::Result<Self> {
        let rpc = JsonRpcRequest::from_value(raw).map_err(|(_, err)| {
            let (code, message) = err.code_and_message();
            anyhow!("malformed json-rpc request ({code}): {message}")
        })?;

        Ok(Self::new(network_id, rpc))
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn method(&self) -> &str {
        &self.rpc.method
    }

    pub fn params(&self) -> &Value {
        &self.rpc.params
    }

    pub fn json_rpc_request(&self) -> &JsonRpcRequest {
        &self.rpc
    }

    /// Content hash of the call, `<method>:<sha1 of canonical params>`.
    ///
    /// The id and version are not part of the hash and object keys are sorted
    /// before hashing, so equivalent calls always share a key.
    pub fn cache_hash(&self) -> anyhow::Result<String> {
        if self.rpc.method.is_empty() {
            bail!("request has no method");
        }

        if !self.rpc.params.is_array() && !self.rpc.params.is_object() {
            bail!("params not an array or object");
        }

        let canonical = serde_json::to_string(&canonicalize(&self.rpc.params))?;

        Ok(format!("{}:{}", self.rpc.method, hash_string(&canonical)))
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort_unstable();

            let mut sorted = Map::with_capacity(obj.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&obj[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub(crate) fn hash_string(s: &str) -> String {
    let mut hasher = sha1::Sha1::new();
    hasher.update(s.as_bytes());
    let result = hasher.finalize();

    hex::encode(result.as_slice())
}

/// Describes the upstream node a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamInfo {
    pub id: String,
    /// `Some(false)` only when the node is known to be fully synced.
    pub syncing: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NormalizedResponse {
    rpc: JsonRpcResponse,
    upstream: Option<UpstreamInfo>,
    from_cache: bool,
}

impl NormalizedResponse {
    pub fn new(rpc: JsonRpcResponse) -> Self {
        Self {
            rpc,
            upstream: None,
            from_cache: false,
        }
    }

    pub fn from_cache(request: &NormalizedRequest, result: Value) -> Self {
        Self {
            rpc: JsonRpcResponse::for_request(request.json_rpc_request(), result),
            upstream: None,
            from_cache: true,
        }
    }

    pub fn with_upstream(mut self, upstream: UpstreamInfo) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn json_rpc_response(&self) -> &JsonRpcResponse {
        &self.rpc
    }

    pub fn into_json_rpc_response(self) -> JsonRpcResponse {
        self.rpc
    }

    pub fn upstream(&self) -> Option<&UpstreamInfo> {
        self.upstream.as_ref()
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn result(&self) -> Option<&Value> {
        self.rpc.result_value()
    }

    pub fn has_error(&self) -> bool {
        self.rpc.has_error()
    }

    pub fn is_object_null(&self) -> bool {
        matches!(self.result(), Some(Value::Null))
    }

    /// True for results that carry no data: `null`, `""`, `"0x"`, `[]` and `{}`.
    pub fn is_result_emptyish(&self) -> bool {
        match self.result() {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty() || s == "0x",
            Some(Value::Array(arr)) => arr.is_empty(),
            Some(Value::Object(obj)) => obj.is_empty(),
            Some(_) => false,
        }
    }
}
