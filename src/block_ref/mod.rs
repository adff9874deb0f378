//! Block reference extraction for EVM json-rpc calls.
//!
//! Every supported method has a handler that knows where the block lives in
//! its params and, after execution, in its result. Methods without a handler
//! resolve to [`BlockScope::Unresolved`].

use std::collections::HashMap;

use anyhow::Context;
use serde_json::Value;

use crate::normalized::{NormalizedRequest, NormalizedResponse};

mod common;
mod debug_trace_transaction;
mod eth_call;
mod eth_get_balance;
mod eth_get_block_by_hash;
mod eth_get_block_by_number;
mod eth_get_block_receipts;
mod eth_get_code;
mod eth_get_logs;
mod eth_get_storage_at;
mod eth_get_transaction_by_block_hash_and_index;
mod eth_get_transaction_by_block_number_and_index;
mod eth_get_transaction_by_hash;
mod eth_get_transaction_count;
mod eth_get_transaction_receipt;

/// Which blocks a call result is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockScope {
    /// A specific block, identified by hash, number or number range.
    Concrete(String),
    /// Valid whatever block it ends up in, e.g. lookups keyed by a transaction hash.
    Wildcard,
    /// Nothing to anchor the result to, e.g. `latest` before execution.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReference {
    pub scope: BlockScope,
    /// Block number, `0` when unknown.
    pub number: u64,
}

impl BlockReference {
    pub fn unresolved() -> Self {
        Self {
            scope: BlockScope::Unresolved,
            number: 0,
        }
    }

    pub fn wildcard() -> Self {
        Self {
            scope: BlockScope::Wildcard,
            number: 0,
        }
    }

    pub fn from_number(number: u64) -> Self {
        Self {
            scope: BlockScope::Concrete(number.to_string()),
            number,
        }
    }

    pub fn from_hash(hash: String) -> Self {
        Self {
            scope: BlockScope::Concrete(hash),
            number: 0,
        }
    }

    /// No scope and no number, there is nothing to key a cache entry on.
    pub fn is_unresolved(&self) -> bool {
        self.scope == BlockScope::Unresolved && self.number == 0
    }

    /// Completes a pre-call reference with what the response revealed.
    ///
    /// A concrete scope from the request wins. A wildcard never survives next
    /// to a known block number: it falls back to the number itself.
    pub fn merge(self, from_response: BlockReference) -> Self {
        let number = if self.number != 0 {
            self.number
        } else {
            from_response.number
        };

        let scope = match (self.scope, from_response.scope) {
            (BlockScope::Concrete(r), _) => BlockScope::Concrete(r),
            (_, BlockScope::Concrete(r)) => BlockScope::Concrete(r),
            (BlockScope::Wildcard, _) if number != 0 => BlockScope::Concrete(number.to_string()),
            (scope, _) => scope,
        };

        Self { scope, number }
    }
}

/// Resolves the block a call is anchored to.
pub trait BlockRefResolver: Send + Sync {
    /// Pre-call resolution, from the request alone.
    fn from_request(&self, request: &NormalizedRequest) -> anyhow::Result<BlockReference>;

    /// What the response alone tells about the block, e.g. a receipt's `blockHash`.
    fn from_response(
        &self,
        request: &NormalizedRequest,
        response: &NormalizedResponse,
    ) -> anyhow::Result<BlockReference>;

    /// Post-call resolution combining request and response.
    fn resolve(
        &self,
        request: &NormalizedRequest,
        response: &NormalizedResponse,
    ) -> anyhow::Result<BlockReference> {
        let from_request = self.from_request(request)?;
        if matches!(from_request.scope, BlockScope::Concrete(_)) && from_request.number != 0 {
            return Ok(from_request);
        }

        let from_response = self.from_response(request, response)?;
        Ok(from_request.merge(from_response))
    }
}

pub trait BlockRefHandler: Send + Sync {
    fn method_name(&self) -> &'static str;

    fn extract_from_request(&self, params: &Value) -> anyhow::Result<BlockReference>;

    fn extract_from_response(
        &self,
        _params: &Value,
        _result: &Value,
    ) -> anyhow::Result<BlockReference> {
        Ok(BlockReference::unresolved())
    }
}

pub type BlockRefHandlerFactory = fn() -> Box<dyn BlockRefHandler>;

pub fn get_factory<T>() -> fn() -> Box<dyn BlockRefHandler>
where
    T: Default + BlockRefHandler + 'static,
{
    || Box::<T>::default()
}

pub fn factories() -> Vec<BlockRefHandlerFactory> {
    vec![
        get_factory::<debug_trace_transaction::Handler>(),
        get_factory::<eth_call::Handler>(),
        get_factory::<eth_get_balance::Handler>(),
        get_factory::<eth_get_block_by_hash::Handler>(),
        get_factory::<eth_get_block_by_number::Handler>(),
        get_factory::<eth_get_block_receipts::Handler>(),
        get_factory::<eth_get_code::Handler>(),
        get_factory::<eth_get_logs::Handler>(),
        get_factory::<eth_get_storage_at::Handler>(),
        get_factory::<eth_get_transaction_by_block_hash_and_index::Handler>(),
        get_factory::<eth_get_transaction_by_block_number_and_index::Handler>(),
        get_factory::<eth_get_transaction_by_hash::Handler>(),
        get_factory::<eth_get_transaction_count::Handler>(),
        get_factory::<eth_get_transaction_receipt::Handler>(),
    ]
}

/// Resolver backed by the per-method handlers of this module.
pub struct EvmBlockRefResolver {
    handlers: HashMap<&'static str, Box<dyn BlockRefHandler>>,
}

impl EvmBlockRefResolver {
    pub fn new() -> Self {
        let handlers = factories()
            .into_iter()
            .map(|factory| {
                let handler = factory();
                (handler.method_name(), handler)
            })
            .collect();

        Self { handlers }
    }

    pub fn supports(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for EvmBlockRefResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRefResolver for EvmBlockRefResolver {
    fn from_request(&self, request: &NormalizedRequest) -> anyhow::Result<BlockReference> {
        let method = request.method();

        match self.handlers.get(method) {
            Some(handler) => handler
                .extract_from_request(request.params())
                .with_context(|| format!("fail to extract block reference for {method}")),
            None => Ok(BlockReference::unresolved()),
        }
    }

    fn from_response(
        &self,
        request: &NormalizedRequest,
        response: &NormalizedResponse,
    ) -> anyhow::Result<BlockReference> {
        let method = request.method();

        let (handler, result) = match (self.handlers.get(method), response.result()) {
            (Some(handler), Some(result)) if !result.is_null() => (handler, result),
            _ => return Ok(BlockReference::unresolved()),
        };

        handler
            .extract_from_response(request.params(), result)
            .with_context(|| format!("fail to extract block reference from {method} result"))
    }
}
