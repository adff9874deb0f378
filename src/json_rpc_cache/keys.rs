use crate::block_ref::BlockScope;
use crate::normalized::NormalizedRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    pub group_key: String,
    pub request_key: String,
}

/// Group key: `<network id>:<block>`, with `*` for wildcard lookups and `nil`
/// when no block is known. Request key: the request's content hash.
pub fn derive_keys(request: &NormalizedRequest, scope: &BlockScope) -> anyhow::Result<CacheKeys> {
    let request_key = request.cache_hash()?;

    let block = match scope {
        BlockScope::Concrete(reference) => reference.as_str(),
        BlockScope::Wildcard => "*",
        BlockScope::Unresolved => "nil",
    };

    Ok(CacheKeys {
        group_key: format!("{}:{block}", request.network_id()),
        request_key,
    })
}
