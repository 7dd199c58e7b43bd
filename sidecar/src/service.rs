use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::{Value, json};
use shared::http::empty_response;
use shared::{counter, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::body::CachedBody;
use crate::config::Config;
use crate::dispatch::{RpcClient, dispatch};
use crate::errors::{Result, SidecarError};
use crate::metrics_defs::{RPC_DISPATCH_DURATION, RPC_REQUESTS};
use crate::proxy::ProxyClient;
use crate::settings::resolve_settings;

/// Front controller for the sidecar listener. Stateless across requests;
/// all shared pieces are behind `Arc` so one instance serves every
/// connection.
#[derive(Clone)]
pub struct SidecarService {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<Config>,
    rpc_client: Arc<dyn RpcClient>,
    proxy: ProxyClient,
}

impl SidecarService {
    pub fn new(config: Arc<Config>, rpc_client: Arc<dyn RpcClient>, proxy: ProxyClient) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                rpc_client,
                proxy,
            }),
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Result<Response<BoxBody<Bytes, SidecarError>>>
    where
        B: hyper::body::Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        if req.method() != Method::POST {
            return Ok(empty_response(StatusCode::NO_CONTENT));
        }

        let Some(rpc_url) = self.request_url(&req) else {
            return Ok(error_envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ));
        };
        let query = rpc_url.query().unwrap_or("").to_string();

        match rpc_url.path() {
            "/" => self.handle_rpc(req, &query).await,
            "/test" => self.handle_test(req, &query).await,
            _ => Ok(empty_response(StatusCode::NOT_FOUND)),
        }
    }

    /// Reassembles the request target against the configured listener
    /// address, mirroring how the request would be addressed externally.
    fn request_url<B>(&self, req: &Request<B>) -> Option<Url> {
        let listener = &self.inner.config.listener;
        let target = format!(
            "http://{}:{}{}",
            listener.host,
            listener.port,
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/"),
        );
        match Url::parse(&target) {
            Ok(url) => Some(url),
            Err(error) => {
                tracing::warn!(%error, target, "unparsable request URL");
                None
            }
        }
    }

    async fn handle_rpc<B>(
        &self,
        req: Request<B>,
        query: &str,
    ) -> Result<Response<BoxBody<Bytes, SidecarError>>>
    where
        B: hyper::body::Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let start = Instant::now();
        let mut body = CachedBody::new(req.into_body());
        let outcome = self.run_pipeline(query, &mut body).await;
        histogram!(RPC_DISPATCH_DURATION).record(start.elapsed().as_secs_f64());

        match outcome {
            Ok(result) => {
                counter!(RPC_REQUESTS, "outcome" => "success").increment(1);
                json_response(StatusCode::OK, &result)
            }
            Err(error) => {
                counter!(RPC_REQUESTS, "outcome" => "error").increment(1);
                // Settings errors fire before the body is touched; pull it in
                // now so the log carries what the client actually sent.
                let _ = body.bytes().await;
                tracing::error!(%error, body = %body.raw_lossy(), "Sending error");
                Ok(error_envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &error.to_string(),
                ))
            }
        }
    }

    /// The primary pipeline, in strict order: resolve settings, read body,
    /// normalize, dispatch.
    async fn run_pipeline<B>(&self, query: &str, body: &mut CachedBody<B>) -> Result<Value>
    where
        B: hyper::body::Body + Unpin,
        B::Error: std::fmt::Display,
    {
        let settings = resolve_settings(query, &self.inner.config)?;
        let parsed = body.json().await?;
        dispatch(self.inner.rpc_client.as_ref(), &settings, parsed).await
    }

    async fn handle_test<B>(
        &self,
        req: Request<B>,
        query: &str,
    ) -> Result<Response<BoxBody<Bytes, SidecarError>>>
    where
        B: hyper::body::Body + Send + Unpin + 'static,
        B::Data: Send,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let mut cached = CachedBody::new(body);

        // One read serves both concurrent paths: the shadow dispatch parses
        // these bytes, the relay forwards them untouched.
        let raw = match cached.bytes().await {
            Ok(raw) => raw.clone(),
            Err(error) => {
                tracing::error!(%error, "failed to read body for shadow proxy");
                return Ok(error_envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &error.to_string(),
                ));
            }
        };

        self.inner
            .proxy
            .shadow_and_proxy(
                parts.method,
                parts.headers,
                raw,
                query,
                &self.inner.config,
                &self.inner.rpc_client,
            )
            .await
    }
}

impl Service<Request<Incoming>> for SidecarService {
    type Response = Response<BoxBody<Bytes, SidecarError>>;
    type Error = SidecarError;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { service.handle(req).await })
    }
}

fn render_error(message: &str) -> Value {
    json!({"jsonrpc": "2.0", "error": message})
}

pub(crate) fn error_envelope(
    status: StatusCode,
    message: &str,
) -> Response<BoxBody<Bytes, SidecarError>> {
    let body = render_error(message).to_string();
    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn json_response(
    status: StatusCode,
    value: &Value,
) -> Result<Response<BoxBody<Bytes, SidecarError>>> {
    let body = serde_json::to_string(value)?;
    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}
