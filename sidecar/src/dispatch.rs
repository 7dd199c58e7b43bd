use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use crate::errors::{Result, SidecarError};
use crate::rpc::{RpcCall, normalize_calls};
use crate::settings::ProviderSettings;

/// The external RPC aggregation client. Provider selection, quorum voting,
/// fallback, signature checks, and timeout enforcement all live behind this
/// seam; the sidecar only resolves settings and hands the calls over.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Executes a single call and returns its bare result.
    async fn call(&self, settings: &ProviderSettings, call: &RpcCall) -> Result<Value>;

    /// Executes a batch. The result ordering matches the input ordering per
    /// the aggregator contract.
    async fn call_multi(&self, settings: &ProviderSettings, calls: &[RpcCall]) -> Result<Value>;
}

/// Normalizes the body and invokes the matching client capability: batch
/// for an array body, single-call (first descriptor, unwrapped result)
/// otherwise. Client failures propagate unchanged; retries are the
/// client's business, not ours.
pub async fn dispatch(
    client: &dyn RpcClient,
    settings: &ProviderSettings,
    body: &Value,
) -> Result<Value> {
    let calls = normalize_calls(body)?;
    if body.is_array() {
        client.call_multi(settings, &calls).await
    } else {
        // Normalizing a non-array body always yields exactly one descriptor.
        let call = calls.first().ok_or(SidecarError::Internal)?;
        client.call(settings, call).await
    }
}

/// HTTP adapter for the aggregation service: posts the resolved settings
/// and calls as JSON and returns the aggregator's JSON result as-is.
pub struct HttpApi {
    client: reqwest::Client,
}

impl HttpApi {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client })
    }

    async fn post(&self, settings: &ProviderSettings, rpc: Value) -> Result<Value> {
        let response = self
            .client
            .post(settings.url.clone())
            .timeout(Duration::from_millis(settings.timeout))
            .header("drpc-key", &settings.dkey)
            .json(&json!({
                "settings": settings,
                "rpc": rpc,
            }))
            .send()
            .await
            .map_err(|e| SidecarError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SidecarError::Upstream(format!(
                "aggregator returned {status}: {text}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SidecarError::Upstream(e.to_string()))
    }
}

#[async_trait]
impl RpcClient for HttpApi {
    async fn call(&self, settings: &ProviderSettings, call: &RpcCall) -> Result<Value> {
        self.post(settings, serde_json::to_value(call)?).await
    }

    async fn call_multi(&self, settings: &ProviderSettings, calls: &[RpcCall]) -> Result<Value> {
        self.post(settings, serde_json::to_value(calls)?).await
    }
}
