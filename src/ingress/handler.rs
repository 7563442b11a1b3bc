use super::context::{full_body, BoxBody, RequestContext};
use crate::completion::ChatCompletionRequest;
use crate::error::GatewayError;
use crate::estimator;
use crate::server::GatewayState;
use bytes::Bytes;
use http::header::AUTHORIZATION;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Method, Request, Response};
use std::net::SocketAddr;
use std::time::Duration;

const SERVICE_NAME: &str = "llm-ratelimit-gateway";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
const STREAM_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// HTTP entry point (C6). Parses credential and body, drives the Token
/// Estimator → Admission Controller → Completion Generator pipeline, and
/// serializes the response — the single `hyper` service function for the
/// gateway listener.
pub async fn handle_request(
    req: Request<Incoming>,
    state: GatewayState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = client_ip(&req, peer_addr);

    let route_name = route_label(&method, &path);
    let ctx = RequestContext::new(route_name, method.as_str().to_string(), client_ip);

    let resp = match (&method, path.as_str()) {
        (&Method::GET, "/") => handle_root(&ctx, &state),
        (&Method::GET, "/health") => handle_health(&ctx, &state),
        (&Method::GET, "/v1/models") => handle_models(&ctx),
        (&Method::POST, "/v1/chat/completions") => handle_chat_completions(req, &ctx, &state).await,
        (&Method::GET, p) if p.starts_with("/v1/usage/") => {
            let credential = &p["/v1/usage/".len()..];
            handle_usage(&ctx, &state, credential).await
        }
        _ => Ok(ctx.error_response(StatusCode::NOT_FOUND, "Not found")),
    };

    resp
}

fn route_label(method: &Method, path: &str) -> String {
    if path.starts_with("/v1/usage/") {
        return "/v1/usage/{credential}".to_string();
    }
    format!("{method} {path}")
}

fn client_ip(req: &Request<Incoming>, peer_addr: SocketAddr) -> std::net::IpAddr {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok())
        .unwrap_or_else(|| peer_addr.ip())
}

fn json_response(ctx: &RequestContext, status: StatusCode, body: Bytes) -> Response<BoxBody> {
    ctx.finalize_metrics(status.as_u16());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

fn handle_root(ctx: &RequestContext, state: &GatewayState) -> Result<Response<BoxBody>, hyper::Error> {
    let body = serde_json::json!({
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "status": "running",
        "port": state.port,
    });
    Ok(json_response(
        ctx,
        StatusCode::OK,
        Bytes::from(body.to_string()),
    ))
}

fn handle_health(ctx: &RequestContext, state: &GatewayState) -> Result<Response<BoxBody>, hyper::Error> {
    let count = state.record_request();
    let body = serde_json::json!({
        "status": "healthy",
        "timestamp": crate::admission::store::unix_now_secs(),
        "request_count": count,
    });
    Ok(json_response(
        ctx,
        StatusCode::OK,
        Bytes::from(body.to_string()),
    ))
}

fn handle_models(ctx: &RequestContext) -> Result<Response<BoxBody>, hyper::Error> {
    let body = serde_json::json!({
        "data": [
            {"id": "gpt-3.5-turbo", "object": "model", "owned_by": "mock"},
            {"id": "gpt-4", "object": "model", "owned_by": "mock"},
        ],
        "object": "list",
    });
    Ok(json_response(
        ctx,
        StatusCode::OK,
        Bytes::from(body.to_string()),
    ))
}

/// Extract and validate the bearer credential from `Authorization`.
/// Returns `None` for a missing or malformed header — §4.6 step 1.
fn extract_credential(req: &Request<Incoming>) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let credential = value.strip_prefix("Bearer ")?.trim();
    if credential.is_empty() {
        return None;
    }
    Some(credential.to_string())
}

async fn handle_chat_completions(
    req: Request<Incoming>,
    ctx: &RequestContext,
    state: &GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let credential = match extract_credential(&req) {
        Some(c) => c,
        None => return Ok(ctx.error_from(&GatewayError::MissingCredential)),
    };

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!("ingress: failed to read request body, error={}", e);
            return Ok(ctx.error_response(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    let request: ChatCompletionRequest = match serde_json::from_slice(&body_bytes) {
        Ok(r) => r,
        Err(e) => {
            return Ok(ctx.error_from(&GatewayError::SchemaInvalid(format!(
                "invalid request body: {e}"
            ))))
        }
    };

    if let Err(reason) = request.validate() {
        return Ok(ctx.error_from(&GatewayError::SchemaInvalid(reason)));
    }

    let input_tokens = estimator::estimate_input(&request.messages);
    let output_tokens = estimator::derive_output(request.max_tokens);

    let decision = state
        .admission
        .check(&credential, input_tokens, output_tokens)
        .await;

    if !decision.admitted {
        let reason = decision.reason.unwrap_or_else(|| "Rate limited".to_string());
        metrics::counter!(
            "gateway_rate_limit_rejected_total",
            "reason" => reason.clone(),
        )
        .increment(1);

        let err = if reason == "Invalid API key" {
            GatewayError::InvalidCredential
        } else if let Some(cause) = reason.strip_prefix("Rate limit check failed: ") {
            metrics::counter!("gateway_admission_store_errors_total").increment(1);
            GatewayError::StoreUnavailable(cause.to_string())
        } else {
            GatewayError::BudgetExceeded(reason)
        };

        return Ok(ctx.error_from_with_retry_after(&err, 1));
    }

    metrics::counter!("gateway_rate_limit_allowed_total").increment(1);

    // `check` already validated the credential, so a budget always resolves here.
    let budget = state
        .admission
        .budget_for(&credential)
        .expect("admitted credential must resolve a budget");
    let request_id = format!("req_{}", uuid::Uuid::new_v4());

    let is_streaming = request.stream.unwrap_or(false);

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(
            "X-RateLimit-InputTPM-Limit",
            HeaderValue::from(budget.input_tpm),
        )
        .header(
            "X-RateLimit-OutputTPM-Limit",
            HeaderValue::from(budget.output_tpm),
        )
        .header("X-RateLimit-RPM-Limit", HeaderValue::from(budget.rpm))
        .header(
            "X-Request-ID",
            HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
        );

    ctx.finalize_metrics(StatusCode::OK.as_u16());

    if is_streaming {
        builder = builder.header("content-type", "text/event-stream");
        let events = state.generator.generate_stream(&request, output_tokens);
        let stream_body = stream_sse(events);
        Ok(builder.body(stream_body).unwrap())
    } else {
        builder = builder.header("content-type", "application/json");
        let response = state.generator.generate(&request, output_tokens);
        let body = serde_json::to_vec(&response).unwrap_or_default();
        Ok(builder.body(full_body(body)).unwrap())
    }
}

/// Serialize SSE events with the `~10ms`-per-chunk suspension point the
/// spec permits and tests for (§5 Suspension points (c)), terminated with
/// the literal `data: [DONE]\n\n` sentinel.
fn stream_sse(events: Vec<crate::completion::ChatCompletionChunk>) -> BoxBody {
    let stream = futures_util::stream::unfold(events.into_iter().fuse(), |mut events| async move {
        tokio::time::sleep(STREAM_CHUNK_DELAY).await;
        match events.next() {
            Some(event) => {
                let json = serde_json::to_string(&event).unwrap_or_default();
                let frame: Result<Frame<Bytes>, hyper::Error> =
                    Ok(Frame::data(Bytes::from(format!("data: {json}\n\n"))));
                Some((frame, events))
            }
            None => None,
        }
    })
    .chain(futures_util::stream::once(async {
        let frame: Result<Frame<Bytes>, hyper::Error> =
            Ok(Frame::data(Bytes::from_static(b"data: [DONE]\n\n")));
        frame
    }));

    BodyExt::boxed(StreamBody::new(stream))
}

async fn handle_usage(
    ctx: &RequestContext,
    state: &GatewayState,
    credential: &str,
) -> Result<Response<BoxBody>, hyper::Error> {
    let Some(budget) = state.admission.budget_for(credential) else {
        return Ok(ctx.error_response(StatusCode::NOT_FOUND, "Invalid API key"));
    };

    let usage = match state.admission.usage(credential).await {
        Ok(u) => u,
        Err(e) => {
            tracing::error!("ingress: usage query failed, error={}", e);
            return Ok(ctx.error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
    };

    let body = serde_json::json!({
        "input_tokens_used": usage.input_used,
        "input_tokens_limit": budget.input_tpm,
        "output_tokens_used": usage.output_used,
        "output_tokens_limit": budget.output_tpm,
        "requests_used": usage.requests_used,
        "requests_limit": budget.rpm,
        "window_size_seconds": 60,
    });

    Ok(json_response(
        ctx,
        StatusCode::OK,
        Bytes::from(body.to_string()),
    ))
}
