//! Transport boundary between the poller and the agent server.

use std::time::Duration;

use async_trait::async_trait;
use shared_types::{PollRequest, PollResponse, SendMessageRequest, SendMessageResponse};

pub const POLL_PATH: &str = "/poll";
pub const SEND_MESSAGE_PATH: &str = "/message_async";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("HTTP error: {status} ({message})")]
    Status { status: u16, message: String },

    #[error("Failed to parse JSON: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LogTransport: Send + Sync {
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse, TransportError>;

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError>;
}

/// JSON-over-HTTP transport using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, TransportError>
    where
        Req: serde::Serialize + Sync,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(describe_http_error(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LogTransport for HttpTransport {
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse, TransportError> {
        self.post_json(POLL_PATH, request).await
    }

    async fn send_message(
        &self,
        request: &SendMessageRequest,
    ) -> Result<SendMessageResponse, TransportError> {
        self.post_json(SEND_MESSAGE_PATH, request).await
    }
}

/// Turn a non-OK response into an error carrying the server's own message when it sent one.
async fn describe_http_error(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status {
        status,
        message: error_message(&body),
    }
}

fn error_message(body: &str) -> String {
    if body.trim().is_empty() {
        return "empty body".to_string();
    }
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(error) = json.get("error").and_then(|v| v.as_str()) {
            return error.to_string();
        }
        if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    body.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"error":"no such context"}"#), "no such context");
        assert_eq!(error_message(r#"{"message":"busy"}"#), "busy");
        assert_eq!(error_message("plain failure\n"), "plain failure");
        assert_eq!(error_message("  "), "empty body");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let transport = HttpTransport::with_client(reqwest::Client::new(), "http://localhost:5000/");
        assert_eq!(transport.base_url(), "http://localhost:5000");
    }
}
