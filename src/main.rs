use std::collections::HashMap;

use actix_web::{error, web, App, Error, HttpResponse, HttpServer};
use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use serde_json::{json, Value};

use evm_rpc_cache::app_state::{AppState, ChainState};
use evm_rpc_cache::args::Args;
use evm_rpc_cache::config::AppConfig;
use evm_rpc_cache::json_rpc::{DefinedError, JsonRpcRequest, JsonRpcResponse, RequestId};
use evm_rpc_cache::metrics;
use evm_rpc_cache::normalized::{NormalizedRequest, NormalizedResponse};
use evm_rpc_cache::utils;

const METRICS_PREFIX: &str = "evm_rpc_cache";

#[actix_web::post("/{chain}")]
async fn rpc_call(
    path: web::Path<(String,)>,
    data: web::Data<AppState>,
    body: web::Json<Value>,
) -> Result<HttpResponse, Error> {
    let (chain,) = path.into_inner();
    let chain = chain.to_uppercase();
    let chain_state = data
        .chains
        .get(&chain)
        .ok_or_else(|| error::ErrorNotFound("endpoint not supported"))?;

    let (requests, is_single_request) = match body {
        web::Json(Value::Array(requests)) => (requests, false),
        web::Json(Value::Object(obj)) => (vec![Value::Object(obj)], true),
        _ => return JsonRpcResponse::from_error(None, DefinedError::InvalidRequest).into(),
    };

    let mut ordered_requests_result: Vec<Option<JsonRpcResponse>> = vec![None; requests.len()];
    let mut uncached_requests: Vec<(usize, NormalizedRequest)> = vec![];
    let mut request_id_index_map: HashMap<RequestId, usize> = HashMap::new();

    // serve what we can from cache and collect the rest for one upstream batch
    for (index, raw_request) in requests.into_iter().enumerate() {
        let rpc_request = match JsonRpcRequest::from_value(raw_request) {
            Ok(v) => v,
            Err((request_id, err)) => {
                ordered_requests_result[index] = Some(JsonRpcResponse::from_error(request_id, err));
                continue;
            }
        };

        let request = NormalizedRequest::new(chain_state.network_id.clone(), rpc_request);

        match chain_state.cache.get(&request).await {
            Ok(Some(response)) => {
                data.metrics.record_call(&chain, request.method(), true);
                ordered_requests_result[index] = Some(response.into_json_rpc_response());
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                data.metrics.cache_get_error_counter.inc();
                tracing::error!(method = request.method(), "fail to read cache: {err:#}");
            }
        }

        data.metrics.record_call(&chain, request.method(), false);

        if let Some(id) = &request.json_rpc_request().id {
            request_id_index_map.insert(id.clone(), uncached_requests.len());
        }
        uncached_requests.push((index, request));
    }

    if uncached_requests.is_empty() {
        return Ok(respond(ordered_requests_result, is_single_request));
    }

    let rpc_requests: Vec<&JsonRpcRequest> = uncached_requests
        .iter()
        .map(|(_, request)| request.json_rpc_request())
        .collect();

    let rpc_result = utils::do_rpc_request(
        &data.http_client,
        chain_state.upstream.clone(),
        &rpc_requests,
    )
    .await;

    let result_values = match rpc_result {
        Ok(Value::Array(v)) => v,
        Ok(other) => {
            tracing::error!("array is expected but we got invalid rpc response: {other}");
            data.metrics.error_counter.inc();
            fail_uncached(
                &mut ordered_requests_result,
                &uncached_requests,
                json!({
                    "error": "invalid rpc response from backend",
                    "reason": "array is expected",
                    "response": other.to_string(),
                }),
            );
            return Ok(respond(ordered_requests_result, is_single_request));
        }
        Err(err) => {
            tracing::error!("fail to make rpc request because: {err:#}");
            data.metrics.error_counter.inc();
            fail_uncached(
                &mut ordered_requests_result,
                &uncached_requests,
                json!({
                    "error": "fail to make rpc request to backend",
                    "reason": err.to_string(),
                }),
            );
            return Ok(respond(ordered_requests_result, is_single_request));
        }
    };

    if result_values.len() != uncached_requests.len() {
        tracing::warn!(
            "rpc response length mismatch, expected: {}, got: {}",
            uncached_requests.len(),
            result_values.len()
        );
    }

    for (position, response) in result_values.into_iter().enumerate() {
        let uncached_index = match RequestId::try_from(response["id"].clone()) {
            Ok(id) if request_id_index_map.contains_key(&id) => request_id_index_map[&id],
            _ if position < uncached_requests.len() => {
                tracing::warn!(
                    "rpc response has invalid id. find a potential match from original request"
                );
                position
            }
            _ => {
                tracing::warn!("rpc response has invalid id and fail to map to original request. response is ignored, response: {response}");
                continue;
            }
        };

        let (index, request) = &uncached_requests[uncached_index];
        let response = NormalizedResponse::new(JsonRpcResponse::from_upstream(response))
            .with_upstream(chain_state.finality.upstream_info());

        if response.has_error() {
            data.metrics.error_counter.inc();
        }

        write_cache(chain_state, &data, request, &response).await;

        let mut rpc_response = response.into_json_rpc_response();
        rpc_response.id = request.json_rpc_request().id.clone();
        ordered_requests_result[*index] = Some(rpc_response);
    }

    fail_uncached(
        &mut ordered_requests_result,
        &uncached_requests,
        json!({ "error": "no response from backend" }),
    );

    Ok(respond(ordered_requests_result, is_single_request))
}

/// Cache failures never change what the client gets back.
async fn write_cache(
    chain_state: &ChainState,
    data: &AppState,
    request: &NormalizedRequest,
    response: &NormalizedResponse,
) {
    if let Err(err) = chain_state.cache.set(request, response).await {
        data.metrics.cache_set_error_counter.inc();
        tracing::error!(
            network_id = %chain_state.network_id,
            method = request.method(),
            "fail to write cache: {err:#}"
        );
    }
}

/// Answers every uncached request that has no response yet with an internal error.
fn fail_uncached(
    ordered_requests_result: &mut [Option<JsonRpcResponse>],
    uncached_requests: &[(usize, NormalizedRequest)],
    reason: Value,
) {
    for (index, request) in uncached_requests {
        if ordered_requests_result[*index].is_none() {
            ordered_requests_result[*index] = Some(JsonRpcResponse::from_error(
                request.json_rpc_request().id.clone(),
                DefinedError::InternalError(Some(reason.clone())),
            ));
        }
    }
}

fn respond(ordered_requests_result: Vec<Option<JsonRpcResponse>>, is_single_request: bool) -> HttpResponse {
    if is_single_request {
        return match ordered_requests_result.into_iter().next().flatten() {
            Some(response) => response.into(),
            None => JsonRpcResponse::from_error(None, DefinedError::InternalError(None)).into(),
        };
    }

    HttpResponse::Ok().json(ordered_requests_result)
}

fn expected_chain_id(network_id: &str) -> Option<u64> {
    network_id.strip_prefix("evm:")?.parse().ok()
}

async fn check_chain_id(client: &reqwest::Client, chain_state: &ChainState) {
    let expected = match expected_chain_id(&chain_state.network_id) {
        Some(expected) => expected,
        None => return,
    };

    match utils::get_chain_id(client, &chain_state.upstream).await {
        Ok(chain_id) if chain_id == expected => {}
        Ok(chain_id) => tracing::warn!(
            network_id = %chain_state.network_id,
            chain_id,
            "upstream serves a different chain than configured"
        ),
        Err(err) => tracing::warn!(
            network_id = %chain_state.network_id,
            "fail to get chain id: {err:#}"
        ),
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let args = Args::parse();
    let cfg = AppConfig::new(&args.config).context("fail to load config")?;
    let app_state = AppState::new(&cfg, METRICS_PREFIX)?;

    for chain_state in app_state.chains.values() {
        check_chain_id(&app_state.http_client, chain_state).await;

        actix_web::rt::spawn(
            chain_state
                .finality
                .clone()
                .run(chain_state.finality_poll_interval),
        );
    }

    let bind = args.bind.unwrap_or(cfg.server.host);
    let port = args.port.unwrap_or(cfg.server.port);
    let app_state = web::Data::new(app_state);

    tracing::info!("Server listening on {}:{}", bind, port);

    {
        let app_state = app_state.clone();

        HttpServer::new(move || {
            App::new()
                .service(rpc_call)
                .service(metrics::metrics)
                .app_data(app_state.clone())
        })
        .bind((bind, port))?
        .run()
        .await?;
    }

    tracing::info!("Server stopped");

    Ok(())
}
