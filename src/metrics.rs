use actix_web::{error, web, Error, HttpResponse};
use prometheus::{Counter, Encoder, IntCounterVec, Registry, TextEncoder};

use crate::app_state::AppState;

pub struct Metrics {
    pub registry: prometheus::Registry,
    pub cache_hit_counter: Counter,
    pub cache_miss_counter: Counter,
    pub cache_get_error_counter: Counter,
    pub cache_set_error_counter: Counter,
    pub error_counter: Counter,
    pub method_call_counter: IntCounterVec,
}

// Function to add a prefix to the metric names
fn add_prefix(prefix: &str, name: &str) -> String {
    format!("{}_{}", prefix, name)
}

fn register_counter_with_prefix(
    registry: &Registry,
    prefix: &str,
    name: &str,
    description: &str,
) -> anyhow::Result<Counter> {
    let opts = prometheus::Opts::new(add_prefix(prefix, name), description);
    let counter = Counter::with_opts(opts)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn register_int_counter_vec_with_prefix(
    registry: &Registry,
    prefix: &str,
    name: &str,
    description: &str,
    labels: &[&str],
) -> anyhow::Result<IntCounterVec> {
    let opts = prometheus::Opts::new(add_prefix(prefix, name), description);
    let counter_vec = IntCounterVec::new(opts, labels)?;
    registry.register(Box::new(counter_vec.clone()))?;
    Ok(counter_vec)
}

impl Metrics {
    pub fn new(prefix: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cache_hit_counter = register_counter_with_prefix(
            &registry,
            prefix,
            "cache_hit_total",
            "Total number of cache hits.",
        )?;
        let cache_miss_counter = register_counter_with_prefix(
            &registry,
            prefix,
            "cache_miss_total",
            "Total number of requests not served from cache.",
        )?;
        let cache_get_error_counter = register_counter_with_prefix(
            &registry,
            prefix,
            "cache_get_error_total",
            "Total number of failed cache reads.",
        )?;
        let cache_set_error_counter = register_counter_with_prefix(
            &registry,
            prefix,
            "cache_set_error_total",
            "Total number of failed cache writes.",
        )?;
        let error_counter = register_counter_with_prefix(
            &registry,
            prefix,
            "error_total",
            "Total number of upstream errors.",
        )?;
        let method_call_counter = register_int_counter_vec_with_prefix(
            &registry,
            prefix,
            "method_call_total",
            "Total number of method calls per chain",
            &["chain", "method", "cache"],
        )?;

        Ok(Self {
            registry,
            cache_hit_counter,
            cache_miss_counter,
            cache_get_error_counter,
            cache_set_error_counter,
            error_counter,
            method_call_counter,
        })
    }

    pub fn record_call(&self, chain: &str, method: &str, cached: bool) {
        let cache = if cached { "hit" } else { "miss" };
        self.method_call_counter
            .with_label_values(&[chain, method, cache])
            .inc();

        if cached {
            self.cache_hit_counter.inc();
        } else {
            self.cache_miss_counter.inc();
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

// Metrics handler
#[actix_web::get("/metrics")]
pub async fn metrics(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let buffer = data.metrics.encode().map_err(|err| {
        tracing::error!("fail to encode metrics: {err:#}");
        error::ErrorInternalServerError("fail to encode metrics")
    })?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(buffer))
}
