use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

/// Per-call timeout for billing requests. Balance checks sit on the request
/// path, so a hung billing service must not hang the proxy.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("billing request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("billing responded with status {0}")]
    Status(reqwest::StatusCode),
}

/// Balance response body. Every field is optional on the wire and defaults
/// to zero.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BalanceBody {
    pub balance: f64,
    pub free_tokens: f64,
    pub total_available: f64,
    pub daily_free_tokens: f64,
    pub subscription_tokens: f64,
    pub claude_balance: f64,
}

/// HTTP client for the billing service.
///
/// The caller's bearer credential is forwarded unchanged on every call; the
/// proxy never mints or downgrades it.
#[derive(Clone)]
pub struct BillingClient {
    http: reqwest::Client,
    base_url: String,
}

impl BillingClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// GET `/api/billing/balance`.
    pub async fn fetch_balance(&self, credential: &str) -> Result<BalanceBody, BillingError> {
        let response = self
            .http
            .get(format!("{}/api/billing/balance", self.base_url))
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::Status(response.status()));
        }

        Ok(response.json().await?)
    }

    /// POST `/api/billing/usage`.
    pub async fn post_usage(
        &self,
        credential: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BillingError> {
        let response = self
            .http
            .post(format!("{}/api/billing/usage", self.base_url))
            .bearer_auth(credential)
            .json(payload)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BillingError::Status(response.status()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BillingClient {
        BillingClient::new(reqwest::Client::new(), server.uri())
    }

    #[tokio::test]
    async fn test_fetch_balance_parses_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/billing/balance"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "balance": 5.0,
                "freeTokens": 100.0,
                "claudeBalance": 2.5,
            })))
            .mount(&server)
            .await;

        let body = client(&server).fetch_balance("tok-1").await.unwrap();
        assert_eq!(body.balance, 5.0);
        assert_eq!(body.free_tokens, 100.0);
        assert_eq!(body.claude_balance, 2.5);
        // Absent fields default to zero.
        assert_eq!(body.total_available, 0.0);
        assert_eq!(body.subscription_tokens, 0.0);
    }

    #[tokio::test]
    async fn test_fetch_balance_empty_body_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/billing/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let body = client(&server).fetch_balance("tok-1").await.unwrap();
        assert_eq!(body.balance, 0.0);
        assert_eq!(body.free_tokens, 0.0);
        assert_eq!(body.claude_balance, 0.0);
    }

    #[tokio::test]
    async fn test_fetch_balance_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/billing/balance"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).fetch_balance("tok-1").await.unwrap_err();
        assert!(matches!(err, BillingError::Status(status) if status.as_u16() == 500));
    }

    #[tokio::test]
    async fn test_post_usage_forwards_payload_and_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/billing/usage"))
            .and(header("authorization", "Bearer tok-2"))
            .and(body_partial_json(json!({
                "provider": "anthropic",
                "currency": "USD",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let payload = json!({
            "model": "claude-sonnet-4-6",
            "provider": "anthropic",
            "inputTokens": 1,
            "outputTokens": 2,
            "cost": 0.0001,
            "currency": "USD",
        });
        client(&server).post_usage("tok-2", &payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_post_usage_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/billing/usage"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .post_usage("tok-2", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Status(_)));
    }

    #[tokio::test]
    async fn test_unreachable_billing_is_http_error() {
        // Nothing listens on this port.
        let client = BillingClient::new(reqwest::Client::new(), "http://127.0.0.1:1");
        let err = client.fetch_balance("tok").await.unwrap_err();
        assert!(matches!(err, BillingError::Http(_)));
    }
}
