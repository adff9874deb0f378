use std::hash::Hash;

use actix_web::HttpResponse;
use serde::Serialize;
use serde_json::{Number, Value};

pub const DEFAULT_JSON_RPC_VERSION: &str = "2.0";

#[derive(PartialEq, Hash, Debug, Clone)]
pub struct RequestId {
    id: StringOrNumber,
}

impl TryFrom<Value> for RequestId {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(number) => number
                .as_u64()
                .ok_or(anyhow::anyhow!("invalid request id"))
                .map(|number| Self {
                    id: StringOrNumber::Number(number),
                }),
            Value::String(string) => Ok(Self {
                id: StringOrNumber::String(string),
            }),
            _ => Err(anyhow::anyhow!("invalid request id")),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.id {
            StringOrNumber::String(string) => string.serialize(serializer),
            StringOrNumber::Number(number) => number.serialize(serializer),
        }
    }
}

impl Eq for RequestId {}

#[derive(PartialEq, Hash, Debug, Clone)]
enum StringOrNumber {
    String(String),
    Number(u64),
}

#[derive(Serialize, Clone, Debug)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: Option<RequestId>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<RequestId>, method: String, params: Value) -> Self {
        Self {
            jsonrpc: DEFAULT_JSON_RPC_VERSION.to_string(),
            method,
            params,
            id,
        }
    }

    /// Parses one entry of a (possibly batched) request body.
    ///
    /// On failure the id is returned alongside the error whenever it could be
    /// read, so the caller can still answer with a matching error response.
    pub fn from_value(mut raw: Value) -> Result<Self, (Option<RequestId>, DefinedError)> {
        if !raw.is_object() {
            return Err((None, DefinedError::InvalidRequest));
        }

        let id = RequestId::try_from(raw["id"].take())
            .map_err(|_| (None, DefinedError::InvalidRequest))?;

        let method = match raw["method"].take() {
            Value::String(s) if !s.is_empty() => s,
            _ => return Err((Some(id), DefinedError::MethodNotFound)),
        };

        let jsonrpc = match raw["jsonrpc"].take() {
            Value::String(s) => s,
            Value::Null => DEFAULT_JSON_RPC_VERSION.to_string(),
            _ => return Err((Some(id), DefinedError::InvalidRequest)),
        };

        let params = match raw["params"].take() {
            Value::Null => Value::Array(vec![]),
            params @ (Value::Array(_) | Value::Object(_)) => params,
            _ => return Err((Some(id), DefinedError::InvalidParams)),
        };

        Ok(Self {
            jsonrpc,
            method,
            params,
            id: Some(id),
        })
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,

    #[serde(flatten)]
    pub result: ResultOrError,
}

impl JsonRpcResponse {
    pub fn from_error(id: Option<RequestId>, error: DefinedError) -> Self {
        Self {
            jsonrpc: DEFAULT_JSON_RPC_VERSION.to_string(),
            id,
            result: ResultOrError::Error {
                error: DefinedOrCustomError::Defined(error),
            },
        }
    }

    /// Builds a result envelope that echoes the version and id of the request it answers.
    pub fn for_request(request: &JsonRpcRequest, result: Value) -> Self {
        Self {
            jsonrpc: request.jsonrpc.clone(),
            id: request.id.clone(),
            result: ResultOrError::Result { result },
        }
    }

    /// Reads a single response object as returned by an upstream node.
    ///
    /// A missing `result` field is kept as `null`; a non-null `error` wins over any result.
    pub fn from_upstream(mut raw: Value) -> Self {
        if !raw.is_object() {
            return Self::from_error(
                None,
                DefinedError::InternalError(Some(Value::String(format!(
                    "upstream response is not an object: {raw}"
                )))),
            );
        }

        let id = RequestId::try_from(raw["id"].take()).ok();
        let jsonrpc = match raw["jsonrpc"].take() {
            Value::String(s) => s,
            _ => DEFAULT_JSON_RPC_VERSION.to_string(),
        };

        let result = match raw["error"].take() {
            Value::Null => ResultOrError::Result {
                result: raw["result"].take(),
            },
            error => ResultOrError::Error {
                error: DefinedOrCustomError::Custom(error),
            },
        };

        Self {
            jsonrpc,
            id,
            result,
        }
    }

    pub fn result_value(&self) -> Option<&Value> {
        match &self.result {
            ResultOrError::Result { result } => Some(result),
            ResultOrError::Error { .. } => None,
        }
    }

    pub fn has_error(&self) -> bool {
        matches!(self.result, ResultOrError::Error { .. })
    }
}

impl From<JsonRpcResponse> for HttpResponse {
    fn from(val: JsonRpcResponse) -> Self {
        HttpResponse::Ok().json(val)
    }
}

impl From<JsonRpcResponse> for Result<HttpResponse, actix_web::Error> {
    fn from(val: JsonRpcResponse) -> Self {
        Ok(val.into())
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(untagged)]
pub enum ResultOrError {
    Error {
        #[serde(rename = "error")]
        error: DefinedOrCustomError,
    },

    Result {
        #[serde(rename = "result")]
        result: Value,
    },
}

#[derive(Serialize, Clone, Debug)]
#[serde(untagged)]
pub enum DefinedOrCustomError {
    Defined(DefinedError),
    Custom(Value),
}

/// Source: https://www.jsonrpc.org/specification
#[derive(Clone, Debug)]
pub enum DefinedError {
    InvalidRequest,

    MethodNotFound,

    InvalidParams,

    InternalError(Option<Value>),
}

impl DefinedError {
    pub fn code_and_message(&self) -> (i64, String) {
        match self {
            DefinedError::InvalidRequest => {
                (-32600, "JSON is not a valid request object".to_string())
            }
            DefinedError::MethodNotFound => (-32601, "Method does not exist".to_string()),
            DefinedError::InvalidParams => (-32602, "Invalid method parameters".to_string()),
            DefinedError::InternalError(_) => (-32603, "Internal JSON-RPC error".to_string()),
        }
    }

    pub fn data(&self) -> &Option<Value> {
        match self {
            DefinedError::InvalidRequest => &None,
            DefinedError::MethodNotFound => &None,
            DefinedError::InvalidParams => &None,
            DefinedError::InternalError(err) => err,
        }
    }
}

impl Serialize for DefinedError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (code, message) = self.code_and_message();

        let mut error = serde_json::Map::new();

        error.insert("code".to_string(), Value::Number(Number::from(code)));
        error.insert("message".to_string(), Value::String(message));

        if let Some(data) = self.data() {
            error.insert("data".to_string(), data.clone());
        }

        error.serialize(serializer)
    }
}
