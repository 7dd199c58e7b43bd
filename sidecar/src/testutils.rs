use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use crate::errors::{Result, SidecarError};
use crate::rpc::RpcCall;
use crate::settings::ProviderSettings;

/// Scripted aggregator client that records every invocation.
pub struct MockRpcClient {
    response: std::result::Result<Value, String>,
    single: Mutex<Vec<RpcCall>>,
    multi: Mutex<Vec<Vec<RpcCall>>>,
}

impl MockRpcClient {
    pub fn returning(value: Value) -> Self {
        Self {
            response: Ok(value),
            single: Mutex::new(Vec::new()),
            multi: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            single: Mutex::new(Vec::new()),
            multi: Mutex::new(Vec::new()),
        }
    }

    pub fn single_invocations(&self) -> Vec<RpcCall> {
        self.single.lock().unwrap().clone()
    }

    pub fn multi_invocations(&self) -> Vec<Vec<RpcCall>> {
        self.multi.lock().unwrap().clone()
    }

    fn respond(&self) -> Result<Value> {
        self.response
            .clone()
            .map_err(SidecarError::Upstream)
    }
}

#[async_trait]
impl crate::dispatch::RpcClient for MockRpcClient {
    async fn call(&self, _settings: &ProviderSettings, call: &RpcCall) -> Result<Value> {
        self.single.lock().unwrap().push(call.clone());
        self.respond()
    }

    async fn call_multi(&self, _settings: &ProviderSettings, calls: &[RpcCall]) -> Result<Value> {
        self.multi.lock().unwrap().push(calls.to_vec());
        self.respond()
    }
}

/// Request snapshot captured by the test servers below.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub method: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

async fn serve_connections<F>(listener: TcpListener, respond: F)
where
    F: Fn(CapturedRequest) -> Response<Full<Bytes>> + Clone + Send + Sync + 'static,
{
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => break,
        };
        let io = TokioIo::new(stream);
        let respond = respond.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let respond = respond.clone();
                async move {
                    let (parts, body) = req.into_parts();
                    let bytes = body
                        .collect()
                        .await
                        .map(|collected| collected.to_bytes())
                        .unwrap_or_else(|_| Bytes::new());
                    let captured = CapturedRequest {
                        method: parts.method.to_string(),
                        headers: parts.headers,
                        body: bytes,
                    };
                    Ok::<_, Infallible>(respond(captured))
                }
            });
            let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await;
        });
    }
}

/// Ephemeral server replying with a fixed JSON value; the last request body
/// (parsed as JSON) is captured for assertions.
pub async fn start_json_server(reply: Value) -> (SocketAddr, Arc<Mutex<Option<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let captured: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let captured_writer = captured.clone();
    tokio::spawn(serve_connections(listener, move |req: CapturedRequest| {
        if let Ok(parsed) = serde_json::from_slice::<Value>(&req.body) {
            *captured_writer.lock().unwrap() = Some(parsed);
        }
        Response::new(Full::new(Bytes::from(reply.to_string())))
    }));

    (addr, captured)
}

/// Ephemeral stand-in for the legacy provider endpoint: replies with a fixed
/// status and body, and captures the full inbound request.
pub async fn start_legacy_server(
    status: u16,
    reply: &'static str,
) -> (SocketAddr, Arc<Mutex<Option<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let captured: Arc<Mutex<Option<CapturedRequest>>> = Arc::new(Mutex::new(None));
    let captured_writer = captured.clone();
    tokio::spawn(serve_connections(listener, move |req: CapturedRequest| {
        *captured_writer.lock().unwrap() = Some(req);
        let mut response = Response::new(Full::new(Bytes::from_static(reply.as_bytes())));
        *response.status_mut() = hyper::StatusCode::from_u16(status).unwrap();
        response
            .headers_mut()
            .insert("x-legacy", hyper::header::HeaderValue::from_static("1"));
        response
    }));

    (addr, captured)
}

/// Polls until `check` passes or the deadline expires. Used to observe
/// fire-and-forget shadow work from tests.
pub async fn wait_until<F>(check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}
