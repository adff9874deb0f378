use crate::block_ref::BlockRefResolver;
use crate::finality::FinalityOracle;
use crate::normalized::{NormalizedRequest, NormalizedResponse};

/// Methods whose result only becomes stable once the transaction is mined.
const TRANSACTION_LOOKUP_METHODS: [&str; 4] = [
    "eth_getTransactionByHash",
    "eth_getTransactionReceipt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
];

/// Decides whether a response may be persisted at all.
///
/// Empty or failed responses are dropped unless a synced upstream produced
/// them for a finalized block. Transaction lookups are dropped while the
/// transaction is still pending.
pub async fn should_cache(
    request: &NormalizedRequest,
    response: &NormalizedResponse,
    resolver: &dyn BlockRefResolver,
    finality: Option<&dyn FinalityOracle>,
) -> anyhow::Result<bool> {
    if response.is_object_null()
        || response.is_result_emptyish()
        || response.result().is_none()
        || response.has_error()
    {
        let cacheable = is_finalized_on_synced_upstream(request, response, resolver, finality).await;
        if !cacheable {
            tracing::debug!(
                network_id = request.network_id(),
                method = request.method(),
                "skip caching because it has no result or has error and we cannot determine finality and sync-state"
            );
        }
        return Ok(cacheable);
    }

    if TRANSACTION_LOOKUP_METHODS.contains(&request.method()) {
        let reference = resolver.from_response(request, response)?;

        if reference.is_unresolved() {
            tracing::debug!(
                network_id = request.network_id(),
                method = request.method(),
                "skip caching because block number/hash is not yet available"
            );
            return Ok(false);
        }
    }

    Ok(true)
}

async fn is_finalized_on_synced_upstream(
    request: &NormalizedRequest,
    response: &NormalizedResponse,
    resolver: &dyn BlockRefResolver,
    finality: Option<&dyn FinalityOracle>,
) -> bool {
    let synced = matches!(response.upstream(), Some(upstream) if upstream.syncing == Some(false));
    let finality = match finality {
        Some(finality) if synced => finality,
        _ => return false,
    };

    let number = match resolver.resolve(request, response) {
        Ok(reference) if reference.number > 0 => reference.number,
        _ => return false,
    };

    matches!(
        finality.is_block_finalized(request.network_id(), number).await,
        Ok(true)
    )
}
