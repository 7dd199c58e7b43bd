use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::http::empty_response;
use shared::metrics_defs::MetricType;
use std::future::Future;
use std::pin::Pin;

use crate::errors::SidecarError;
use crate::metrics_defs::ALL_METRICS;

/// Installs the process-wide Prometheus recorder and registers metric
/// descriptions. Called once at startup, and only when the metrics
/// listener is enabled; without a recorder the `metrics` macros are no-ops.
pub fn install_recorder() -> Result<PrometheusHandle, SidecarError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| SidecarError::Metrics(e.to_string()))?;
    describe_metrics();
    Ok(handle)
}

pub fn describe_metrics() {
    for def in ALL_METRICS {
        match def.metric_type {
            MetricType::Counter => metrics::describe_counter!(def.name, def.description),
            MetricType::Histogram => metrics::describe_histogram!(def.name, def.description),
        }
    }
}

/// Serves the Prometheus text exposition on `GET /metrics`; every other
/// request gets a 404.
#[derive(Clone)]
pub struct MetricsService {
    handle: PrometheusHandle,
}

impl MetricsService {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    fn respond(&self, method: &Method, path: &str) -> Response<BoxBody<Bytes, SidecarError>> {
        if method == Method::GET && path == "/metrics" {
            let mut response = Response::new(
                Full::new(Bytes::from(self.handle.render()))
                    .map_err(|never| match never {})
                    .boxed(),
            );
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        } else {
            empty_response(StatusCode::NOT_FOUND)
        }
    }
}

impl Service<Request<Incoming>> for MetricsService {
    type Response = Response<BoxBody<Bytes, SidecarError>>;
    type Error = SidecarError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let response = self.respond(req.method(), req.uri().path());
        Box::pin(async move { Ok(response) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> MetricsService {
        // A local (non-installed) recorder keeps tests independent of the
        // process-wide recorder slot.
        let recorder = PrometheusBuilder::new().build_recorder();
        MetricsService::new(recorder.handle())
    }

    #[test]
    fn metrics_path_renders_exposition() {
        let service = test_service();
        let response = service.respond(&Method::GET, "/metrics");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain; version=0.0.4"))
        );
    }

    #[test]
    fn other_paths_are_not_found() {
        let service = test_service();
        assert_eq!(
            service.respond(&Method::GET, "/").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            service.respond(&Method::POST, "/metrics").status(),
            StatusCode::NOT_FOUND
        );
    }
}
