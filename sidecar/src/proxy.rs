use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::HeaderMap;
use hyper::{Method, Response, StatusCode};
use serde_json::Value;
use shared::counter;
use shared::http::{empty_response, normalize_relay_headers, strip_host_header};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{RpcClient, dispatch};
use crate::errors::{Result, SidecarError};
use crate::metrics_defs::{PROXY_RELAY_FAILURES, SHADOW_DISPATCH_FAILURES};
use crate::service::error_envelope;
use crate::settings::resolve_settings;

/// Bound on establishing the legacy connection and receiving response
/// headers. Streaming the body afterwards is unbounded.
const LEGACY_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler for the `/test` path: runs the primary pipeline as a
/// fire-and-forget shadow while transparently relaying the request to the
/// legacy provider endpoint. The two paths are fully isolated; a shadow
/// fault can never reach the relayed response.
pub struct ProxyClient {
    http: reqwest::Client,
}

impl ProxyClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(LEGACY_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { http })
    }

    pub async fn shadow_and_proxy(
        &self,
        method: Method,
        headers: HeaderMap,
        raw_body: Bytes,
        query: &str,
        config: &Arc<Config>,
        rpc_client: &Arc<dyn RpcClient>,
    ) -> Result<Response<BoxBody<Bytes, SidecarError>>> {
        // The path only exists in deployments that configure a legacy target.
        let Some(legacy_url) = config.rpc_provider.clone() else {
            return Ok(empty_response(StatusCode::NOT_FOUND));
        };

        self.spawn_shadow_dispatch(query, &raw_body, config, rpc_client);
        self.relay(method, headers, raw_body, legacy_url).await
    }

    /// Runs resolve -> normalize -> dispatch in the background. Failures are
    /// reduced to a log line and a counter; nothing propagates.
    fn spawn_shadow_dispatch(
        &self,
        query: &str,
        raw_body: &Bytes,
        config: &Arc<Config>,
        rpc_client: &Arc<dyn RpcClient>,
    ) {
        let query = query.to_string();
        let raw_body = raw_body.clone();
        let config = Arc::clone(config);
        let rpc_client = Arc::clone(rpc_client);

        tokio::spawn(async move {
            if let Err(error) =
                shadow_dispatch(&query, &raw_body, &config, rpc_client.as_ref()).await
            {
                counter!(SHADOW_DISPATCH_FAILURES).increment(1);
                tracing::error!(
                    %error,
                    body = %String::from_utf8_lossy(&raw_body),
                    "shadow dispatch failed"
                );
            }
        });
    }

    async fn relay(
        &self,
        method: Method,
        mut headers: HeaderMap,
        raw_body: Bytes,
        legacy_url: url::Url,
    ) -> Result<Response<BoxBody<Bytes, SidecarError>>> {
        strip_host_header(&mut headers);

        let outcome = self
            .http
            .request(method, legacy_url)
            .headers(headers)
            .body(raw_body)
            .send()
            .await;

        let upstream = match outcome {
            Ok(response) => response,
            Err(error) => {
                counter!(PROXY_RELAY_FAILURES).increment(1);
                tracing::error!(%error, "Proxy error");
                return Ok(error_envelope(StatusCode::BAD_GATEWAY, "Bad gateway"));
            }
        };

        let status = upstream.status();
        if status != StatusCode::OK {
            tracing::warn!(
                %status,
                headers = ?upstream.headers(),
                "Proxy response error"
            );
        }

        let mut relay_headers = upstream.headers().clone();
        normalize_relay_headers(&mut relay_headers);

        // Pump the legacy body through a bounded channel so the response
        // streams chunk by chunk instead of being collected first. If the
        // caller hangs up, the pump stops at the next send.
        let (mut tx, rx) = futures::channel::mpsc::channel::<
            std::result::Result<Frame<Bytes>, SidecarError>,
        >(16);
        let mut chunks = upstream.bytes_stream();
        tokio::spawn(async move {
            while let Some(chunk) = chunks.next().await {
                let failed = chunk.is_err();
                let item = chunk
                    .map(Frame::data)
                    .map_err(|e| SidecarError::Upstream(e.to_string()));
                if tx.send(item).await.is_err() {
                    break;
                }
                if failed {
                    counter!(PROXY_RELAY_FAILURES).increment(1);
                    break;
                }
            }
        });

        let mut response = Response::new(BodyExt::boxed(StreamBody::new(rx)));
        *response.status_mut() = status;
        *response.headers_mut() = relay_headers;
        Ok(response)
    }
}

async fn shadow_dispatch(
    query: &str,
    raw_body: &Bytes,
    config: &Config,
    rpc_client: &dyn RpcClient,
) -> Result<Value> {
    let settings = resolve_settings(query, config)?;
    let body: Value =
        serde_json::from_slice(raw_body).map_err(|_| SidecarError::UnparsableBody)?;
    dispatch(rpc_client, &settings, &body).await
}
