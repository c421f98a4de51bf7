//! HTTP client for communicating with the Gatehouse API server.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Response envelope used by every API endpoint.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub success: bool,
    #[allow(dead_code)]
    pub error: bool,
    #[serde(default)]
    pub message: String,
    #[allow(dead_code)]
    pub status: u16,
}

/// A failure reported by the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message} (HTTP {status})")]
    Server { status: StatusCode, message: String },

    #[error("not signed in: pass --token, set GATEHOUSE_SESSION_TOKEN or `gatehouse config set session-token <token>` ({0})")]
    Unauthenticated(String),

    #[error("API returned success but no data")]
    MissingData,
}

/// HTTP client for the Gatehouse API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET and return the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send::<(), T>(Method::GET, path, None).await?;
        resp.data.ok_or_else(|| ApiError::MissingData.into())
    }

    /// POST a JSON body and return the response data.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self.send::<B, T>(Method::POST, path, Some(body)).await?;
        resp.data.ok_or_else(|| ApiError::MissingData.into())
    }

    /// DELETE and return the server's message.
    pub async fn delete(&self, path: &str) -> Result<String> {
        let resp = self
            .send::<(), serde_json::Value>(Method::DELETE, path, None)
            .await?;
        Ok(resp.message)
    }

    /// GET a non-enveloped JSON document (the health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        // The health endpoint reports an unhealthy body with 503.
        if !resp.status().is_success() && resp.status() != StatusCode::SERVICE_UNAVAILABLE {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<ApiResponse<T>> {
        let url = self.url(path);
        let mut request = self.authorize(self.client.request(method.clone(), &url));
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status, &text).into());
        }

        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;

        if !envelope.success {
            return Err(ApiError::Server {
                status,
                message: envelope.message,
            }
            .into());
        }
        Ok(envelope)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Build an error from a non-2xx body, preferring the envelope's message.
fn error_from_body(status: StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
        .map(|envelope| envelope.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::UNAUTHORIZED {
        ApiError::Unauthenticated(message)
    } else {
        ApiError::Server { status, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_uses_envelope_message() {
        let body = r#"{"data":null,"success":false,"error":true,"message":"Action with ID listSites not found for role with ID r1","status":404,"code":"RECORD_NOT_FOUND"}"#;
        let err = error_from_body(StatusCode::NOT_FOUND, body);
        assert_eq!(
            err.to_string(),
            "Action with ID listSites not found for role with ID r1 (HTTP 404 Not Found)"
        );
    }

    #[test]
    fn test_error_falls_back_to_raw_body() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert!(matches!(err, ApiError::Server { ref message, .. } if message == "upstream down"));
    }

    #[test]
    fn test_unauthorized_hints_at_token() {
        let err = error_from_body(StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(err, ApiError::Unauthenticated(_)));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = ApiClient::new("http://localhost:3000/", Some(" ".into())).unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
        assert!(client.token.is_none());
    }
}
