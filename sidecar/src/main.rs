use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sidecar::config::Config;
use sidecar::dispatch::HttpApi;
use sidecar::errors::SidecarError;
use sidecar::metrics::{MetricsService, install_recorder};
use sidecar::proxy::ProxyClient;
use sidecar::service::SidecarService;
use shared::http::run_http_service;

#[tokio::main]
async fn main() -> Result<(), SidecarError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env()?);
    config.validate().map_err(SidecarError::Config)?;

    if let Some(metrics_listener) = config.metrics_listener.clone() {
        let handle = install_recorder()?;
        tokio::spawn(async move {
            tracing::info!(
                host = %metrics_listener.host,
                port = metrics_listener.port,
                "metric server is running"
            );
            if let Err(error) = run_http_service(
                &metrics_listener.host,
                metrics_listener.port,
                MetricsService::new(handle),
            )
            .await
            {
                tracing::error!(%error, "metric server terminated");
            }
        });
    }

    let service = SidecarService::new(
        config.clone(),
        Arc::new(HttpApi::new()?),
        ProxyClient::new()?,
    );

    tracing::info!(
        host = %config.listener.host,
        port = config.listener.port,
        "server is running"
    );
    run_http_service(&config.listener.host, config.listener.port, service).await
}
