pub mod body;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod metrics_defs;
pub mod proxy;
pub mod rpc;
pub mod service;
pub mod settings;

#[cfg(test)]
pub mod testutils;
