use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::Value;
use std::borrow::Cow;

use crate::errors::{Result, SidecarError};

enum ParseState {
    Ok(Value),
    Failed,
}

/// Lazily-read, per-request body cache.
///
/// The underlying stream is consumed at most once; both the raw bytes and
/// the parsed JSON are cached so later reads within the same request (for
/// example error logging after a failed dispatch, or the shadow path
/// re-using the bytes the proxy relays) observe the identical value. The
/// cache lives and dies with the request's handling scope, so nothing leaks
/// across requests.
pub struct CachedBody<B> {
    body: Option<B>,
    raw: Option<Bytes>,
    read_error: Option<String>,
    parsed: Option<ParseState>,
}

impl<B> CachedBody<B>
where
    B: hyper::body::Body + Unpin,
    B::Error: std::fmt::Display,
{
    pub fn new(body: B) -> Self {
        Self {
            body: Some(body),
            raw: None,
            read_error: None,
            parsed: None,
        }
    }

    /// Collects the full byte stream, once. Subsequent calls return the
    /// cached bytes or the cached failure.
    pub async fn bytes(&mut self) -> Result<&Bytes> {
        if let Some(message) = &self.read_error {
            return Err(SidecarError::RequestBodyError(message.clone()));
        }
        if self.raw.is_none() {
            let body = self.body.take().ok_or(SidecarError::Internal)?;
            match body.collect().await {
                Ok(collected) => self.raw = Some(collected.to_bytes()),
                Err(e) => {
                    let message = e.to_string();
                    self.read_error = Some(message.clone());
                    return Err(SidecarError::RequestBodyError(message));
                }
            }
        }
        self.raw.as_ref().ok_or(SidecarError::Internal)
    }

    /// Parses the body as JSON, idempotently. A parse failure is cached too:
    /// the second call reports the same error without touching the stream.
    pub async fn json(&mut self) -> Result<&Value> {
        if self.parsed.is_none() {
            self.bytes().await?;
            let raw = self.raw.as_ref().ok_or(SidecarError::Internal)?;
            match serde_json::from_slice::<Value>(raw) {
                Ok(value) => self.parsed = Some(ParseState::Ok(value)),
                Err(_) => {
                    tracing::error!(
                        body = %String::from_utf8_lossy(raw),
                        "Unable to parse request body"
                    );
                    self.parsed = Some(ParseState::Failed);
                }
            }
        }
        match self.parsed.as_ref() {
            Some(ParseState::Ok(value)) => Ok(value),
            Some(ParseState::Failed) => Err(SidecarError::UnparsableBody),
            None => Err(SidecarError::Internal),
        }
    }

    /// Best-effort rendering of whatever was read, for error logs.
    pub fn raw_lossy(&self) -> Cow<'_, str> {
        match &self.raw {
            Some(raw) => String::from_utf8_lossy(raw),
            None => Cow::Borrowed("<unread>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde_json::json;

    fn body_of(s: &str) -> CachedBody<Full<Bytes>> {
        CachedBody::new(Full::new(Bytes::from(s.to_string())))
    }

    #[tokio::test]
    async fn parses_json_once_and_caches() {
        let mut body = body_of(r#"{"method":"eth_blockNumber","id":1}"#);
        let first = body.json().await.unwrap().clone();
        assert_eq!(first, json!({"method": "eth_blockNumber", "id": 1}));

        // The stream is already consumed; the cached value is returned.
        let second = body.json().await.unwrap();
        assert_eq!(*second, first);
    }

    #[tokio::test]
    async fn parse_failure_is_stable_across_reads() {
        let mut body = body_of("not json {");
        for _ in 0..2 {
            let err = body.json().await.unwrap_err();
            assert_eq!(err.to_string(), "Unable to parse request body");
        }
        assert_eq!(body.raw_lossy(), "not json {");
    }

    #[tokio::test]
    async fn bytes_then_json_reads_the_stream_once() {
        let mut body = body_of(r#"[{"a":1}]"#);
        let raw = body.bytes().await.unwrap().clone();
        assert_eq!(raw.as_ref(), br#"[{"a":1}]"#);
        assert_eq!(*body.json().await.unwrap(), json!([{"a": 1}]));
    }

    #[tokio::test]
    async fn unread_body_renders_placeholder() {
        let body = body_of("{}");
        assert_eq!(body.raw_lossy(), "<unread>");
    }
}
