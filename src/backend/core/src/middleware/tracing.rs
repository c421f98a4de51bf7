//! Per-request logging and metrics.
//!
//! Each request runs inside an `http_request` span carrying a request id,
//! taken from `X-Request-ID` or generated, and echoed on the response.
//! Header logging goes through the global redactor so session tokens never
//! reach the logs.

use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{HeaderName, HeaderValue},
    response::Response,
};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::telemetry::{RequestDurationHistogram, SensitiveFieldRedactor};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request logging configuration, read from `server.request_logging`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestLoggingConfig {
    /// Log (redacted) request headers at debug level
    pub log_request_headers: bool,

    /// Path prefixes that skip logging and metrics
    pub excluded_paths: Vec<String>,
}

impl Default for RequestLoggingConfig {
    fn default() -> Self {
        Self {
            log_request_headers: false,
            excluded_paths: vec!["/health".to_string(), "/metrics".to_string()],
        }
    }
}

/// Request id attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

#[derive(Clone, Default)]
pub struct RequestLoggingLayer {
    config: Arc<RequestLoggingConfig>,
}

impl RequestLoggingLayer {
    pub fn new(config: RequestLoggingConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for RequestLoggingLayer {
    type Service = RequestLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggingService {
            inner,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLoggingService<S> {
    inner: S,
    config: Arc<RequestLoggingConfig>,
}

impl<S> Service<Request<Body>> for RequestLoggingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let config = self.config.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = request.uri().path().to_string();
            if config.excluded_paths.iter().any(|p| path.starts_with(p.as_str())) {
                return inner.call(request).await;
            }

            let request_id = request
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let method = request.method().to_string();
            let route = request
                .extensions()
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| path.clone());

            let span = info_span!(
                "http_request",
                request_id = %request_id,
                method = %method,
                route = %route,
            );

            if config.log_request_headers {
                let headers = SensitiveFieldRedactor::global().redact_headers(request.headers());
                debug!(parent: &span, request_headers = ?headers, "Request headers");
            }

            request.extensions_mut().insert(RequestId(request_id.clone()));

            let timer = RequestDurationHistogram::start(&method, &route);
            let mut response = inner.call(request).instrument(span.clone()).await?;
            let status = response.status().as_u16();
            timer.finish(status);

            if status >= 500 {
                error!(parent: &span, status, "Server error");
            } else if status >= 400 {
                warn!(parent: &span, status, "Client error");
            } else {
                info!(parent: &span, status, "Request completed");
            }

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            Ok(response)
        })
    }
}
