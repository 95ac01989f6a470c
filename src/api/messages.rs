use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::billing::UsageReport;
use crate::error::AppError;
use crate::meter::{MeteredStream, UsageTokens};
use crate::AppState;

/// Inbound headers copied verbatim to the upstream request when present.
const FORWARDED_REQUEST_HEADERS: [&str; 3] =
    ["anthropic-version", "anthropic-beta", "content-type"];

/// Inbound request body. Only `model` is inspected (as a billing fallback);
/// every other key passes through to the upstream untouched.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// POST /v1/messages
///
/// The gating state machine: authenticate the caller's bearer credential,
/// confirm spendable balance, forward to the Anthropic API with the shared
/// key, stream the response back untouched, and report observed usage to
/// billing after the response completes.
pub async fn create_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request_id = Uuid::new_v4().to_string();

    // -- AUTH_CHECK --
    let credential = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::MissingApiKey)?
        .to_string();

    let claims = state
        .verifier
        .verify(&credential)
        .map_err(AppError::InvalidToken)?;

    // -- BALANCE_CHECK --
    let balance = state.balance.check(&claims.user_id, &credential).await;
    if !balance.ok {
        if balance.service_unavailable {
            return Err(AppError::BillingUnavailable);
        }
        return Err(AppError::InsufficientBalance);
    }

    // -- FORWARD --
    // Best-effort model extraction; an unparseable body is forwarded as-is.
    let (request_model, forward_body) = match serde_json::from_slice::<MessagesRequest>(&body) {
        Ok(parsed) => {
            let reserialized = serde_json::to_vec(&parsed).unwrap_or_else(|_| body.to_vec());
            (parsed.model, reserialized)
        }
        Err(_) => (None, body.to_vec()),
    };

    tracing::info!(
        request_id = %request_id,
        user_id = %claims.user_id,
        model = request_model.as_deref().unwrap_or("-"),
        "Forwarding messages request"
    );

    let upstream = state
        .http
        .post(format!("{}/v1/messages", state.config.anthropic_api_url))
        .headers(upstream_headers(&state, &headers))
        .body(forward_body)
        .send()
        .await
        .map_err(|err| {
            tracing::error!(request_id = %request_id, error = %err, "Upstream request failed");
            AppError::UpstreamUnreachable(err)
        })?;

    let status = upstream.status();
    let response_headers = passthrough_headers(upstream.headers());
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    // -- BRANCH --
    let mut response = if content_type.contains("text/event-stream") {
        // STREAM_PATH: pipe bytes through, meter when the stream completes.
        let reporter = Arc::clone(&state.reporter);
        let pricing = Arc::clone(&state.pricing);
        let user_id = claims.user_id.clone();
        let credential = credential.clone();

        let metered = MeteredStream::new(upstream.bytes_stream(), move |usage, stream_model| {
            if !usage.is_billable() {
                return;
            }
            let model = stream_model.or(request_model).unwrap_or_default();
            let cost = pricing.cost_usd(&model, &usage);
            reporter.report(
                &credential,
                UsageReport {
                    user_id,
                    model,
                    usage,
                    cost,
                },
            );
        });

        Response::new(Body::from_stream(metered))
    } else {
        // JSON_PATH: buffer, deliver, then meter out-of-band.
        let body_bytes = upstream
            .bytes()
            .await
            .map_err(AppError::UpstreamUnreachable)?;

        if status.is_success() && content_type.contains("application/json") {
            meter_json_response(
                &state,
                &credential,
                &claims.user_id,
                request_model.as_deref(),
                &body_bytes,
            );
        }

        Response::new(Body::from(body_bytes))
    };

    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Headers sent upstream: the shared key and JSON content type, plus the
/// forwardable inbound headers (inbound `content-type` overrides the
/// default).
fn upstream_headers(state: &AppState, inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(key) = HeaderValue::from_str(&state.config.anthropic_api_key) {
        headers.insert(HeaderName::from_static("x-api-key"), key);
    }
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for name in FORWARDED_REQUEST_HEADERS {
        if let Some(value) = inbound.get(name) {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }

    headers
}

/// Response headers copied back to the client: `content-type`,
/// `request-id`, and the `x-ratelimit*` family.
fn passthrough_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        let lowered = name.as_str();
        if lowered == "content-type" || lowered == "request-id" || lowered.starts_with("x-ratelimit")
        {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Extract usage from a buffered JSON response and report it. Parse
/// failures are logged and never affect the already-delivered response.
fn meter_json_response(
    state: &AppState,
    credential: &str,
    user_id: &str,
    request_model: Option<&str>,
    body: &[u8],
) {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(error = %err, "Unparseable JSON from upstream, skipping metering");
            return;
        }
    };

    let usage = value.get("usage");
    let count = |field: &str| -> u64 {
        usage
            .and_then(|u| u.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let tokens = UsageTokens {
        input_tokens: count("input_tokens"),
        output_tokens: count("output_tokens"),
        cache_read_tokens: count("cache_read_input_tokens"),
        cache_creation_tokens: count("cache_creation_input_tokens"),
    };
    if !tokens.is_billable() {
        return;
    }

    // Prefer the upstream-reported model: it resolves aliases.
    let model = value
        .get("model")
        .and_then(Value::as_str)
        .or(request_model)
        .unwrap_or_default()
        .to_string();
    let cost = state.pricing.cost_usd(&model, &tokens);

    state.reporter.report(
        credential,
        UsageReport {
            user_id: user_id.to_string(),
            model,
            usage: tokens,
            cost,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_request_roundtrip_preserves_unknown_keys() {
        let raw = serde_json::json!({
            "model": "claude-sonnet-4-6",
            "messages": [{ "role": "user", "content": "hi" }],
            "max_tokens": 64,
            "some_future_field": { "nested": true },
        });
        let parsed: MessagesRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.model.as_deref(), Some("claude-sonnet-4-6"));

        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(reserialized, raw);
    }

    #[test]
    fn test_messages_request_without_model() {
        let parsed: MessagesRequest =
            serde_json::from_value(serde_json::json!({ "messages": [] })).unwrap();
        assert!(parsed.model.is_none());

        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert!(reserialized.get("model").is_none());
    }

    #[test]
    fn test_passthrough_headers_filter() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-type", HeaderValue::from_static("application/json"));
        upstream.insert("request-id", HeaderValue::from_static("req_123"));
        upstream.insert(
            "x-ratelimit-requests-remaining",
            HeaderValue::from_static("99"),
        );
        upstream.insert("x-ratelimit-tokens-limit", HeaderValue::from_static("1000"));
        upstream.insert("server", HeaderValue::from_static("envoy"));
        upstream.insert("set-cookie", HeaderValue::from_static("session=abc"));

        let filtered = passthrough_headers(&upstream);
        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered.get("request-id").unwrap(), "req_123");
        assert!(filtered.get("server").is_none());
        assert!(filtered.get("set-cookie").is_none());
    }
}
