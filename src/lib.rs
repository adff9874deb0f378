pub mod app_state;
pub mod args;
pub mod block_ref;
pub mod cache;
pub mod config;
pub mod finality;
pub mod json_rpc;
pub mod json_rpc_cache;
pub mod metrics;
pub mod normalized;
pub mod utils;
