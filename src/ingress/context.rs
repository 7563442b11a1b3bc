use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use std::net::IpAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request context that flows through the handler — carries request
/// metadata and the single exit point for error responses and metrics.
pub struct RequestContext {
    pub route_name: String,
    pub method: String,
    pub client_ip: IpAddr,
    pub start: Instant,
}

impl RequestContext {
    pub fn new(route_name: String, method: String, client_ip: IpAddr) -> Self {
        Self {
            route_name,
            method,
            client_ip,
            start: Instant::now(),
        }
    }

    /// Build a `{"detail": msg}` JSON error response and record metrics in
    /// one place — the single exit point for all error paths.
    pub fn error_response(&self, status: StatusCode, detail: &str) -> hyper::Response<BoxBody> {
        self.error_response_with_retry_after(status, detail, None)
    }

    /// Same as `error_response`, plus an optional `Retry-After` header —
    /// the single place that escapes `detail` into the JSON body, so no
    /// caller can hand-roll an unescaped `{"detail": ...}` string.
    pub fn error_response_with_retry_after(
        &self,
        status: StatusCode,
        detail: &str,
        retry_after_secs: Option<u64>,
    ) -> hyper::Response<BoxBody> {
        self.finalize_metrics(status.as_u16());
        let mut builder = hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json");
        if let Some(secs) = retry_after_secs {
            builder = builder.header("Retry-After", secs.to_string());
        }
        builder
            .body(full_body(format!(r#"{{"detail":"{}"}}"#, escape(detail))))
            .unwrap()
    }

    /// Map a `GatewayError` to its status/body per §7 in one place.
    pub fn error_from(&self, err: &crate::error::GatewayError) -> hyper::Response<BoxBody> {
        self.error_response(err.status(), &err.detail())
    }

    /// Same as `error_from`, plus a `Retry-After` header — used for the
    /// admission-rejection path, where every reject is advisory-retryable.
    pub fn error_from_with_retry_after(
        &self,
        err: &crate::error::GatewayError,
        retry_after_secs: u64,
    ) -> hyper::Response<BoxBody> {
        self.error_response_with_retry_after(err.status(), &err.detail(), Some(retry_after_secs))
    }

    /// Record final request metrics and the structured access log line.
    pub fn finalize_metrics(&self, status_code: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status_code);

        metrics::counter!(
            "gateway_http_requests_total",
            "route" => self.route_name.clone(),
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "route" => self.route_name.clone(),
        )
        .record(self.start.elapsed().as_secs_f64());

        tracing::info!(
            client_ip = %self.client_ip,
            method = %self.method,
            route = %self.route_name,
            status = status_code,
            latency_ms = %self.start.elapsed().as_millis(),
            "access"
        );
    }
}

/// Minimal JSON string escaping for error details built with `format!`.
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
