//! HTTP plumbing shared by the provider adapters.

use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use shuttle_core::config::ProviderSettings;
use shuttle_core::{ProviderError, ProviderErrorKind};
use std::time::Duration;

/// Longest response excerpt carried in an error message.
const ERROR_BODY_LIMIT: usize = 200;

/// Base URL, credential and timeout for one provider.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub api_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            api_url: settings.api_url.trim().trim_end_matches('/').to_string(),
            api_key: settings.api_key.trim().to_string(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
        }
    }

    pub fn validate(&self, provider: &str) -> Result<(), ProviderError> {
        if self.api_url.is_empty() {
            return Err(ProviderError::configuration(provider, "API URL is not configured"));
        }
        if self.api_key.is_empty() {
            return Err(ProviderError::configuration(provider, "API key is not configured"));
        }
        Ok(())
    }

    /// `api_url` joined with `path`.
    pub fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.api_url.clone()
        } else {
            format!("{}/{}", self.api_url, path.trim_start_matches('/'))
        }
    }

    pub fn client(&self, provider: &str) -> Result<reqwest::Client, ProviderError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ProviderError::configuration(provider, format!("HTTP client: {e}")))
    }
}

/// A successful provider response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub headers: HeaderMap,
    /// Parsed JSON, a JSON string for non-JSON bodies, or null when empty.
    pub body: serde_json::Value,
}

impl HttpReply {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

pub fn transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    let kind = if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Network
    };
    ProviderError::new(provider, kind, err.to_string())
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

/// Send `request` and classify the outcome.
pub async fn execute(provider: &str, request: RequestBuilder) -> Result<HttpReply, ProviderError> {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = transport_error(provider, &e);
            tracing::warn!(provider = %provider, kind = %err.kind, error = %e, "provider request failed");
            metrics::counter!(
                "provider.requests",
                "provider" => provider.to_string(),
                "outcome" => err.kind.as_str()
            )
            .increment(1);
            return Err(err);
        }
    };

    let status = response.status();
    let headers = response.headers().clone();
    let text = response
        .text()
        .await
        .map_err(|e| transport_error(provider, &e))?;

    if !status.is_success() {
        let err = ProviderError::from_status(provider, status.as_u16(), excerpt(&text));
        tracing::warn!(
            provider = %provider,
            status = status.as_u16(),
            kind = %err.kind,
            "provider rejected request"
        );
        metrics::counter!(
            "provider.requests",
            "provider" => provider.to_string(),
            "outcome" => err.kind.as_str()
        )
        .increment(1);
        return Err(err);
    }

    metrics::counter!(
        "provider.requests",
        "provider" => provider.to_string(),
        "outcome" => "ok"
    )
    .increment(1);

    let body = if text.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
    };

    Ok(HttpReply {
        status: status.as_u16(),
        headers,
        body,
    })
}

/// String field at `pointer` in a JSON body, e.g. `/messages/0/id`.
pub fn json_str(body: &serde_json::Value, pointer: &str) -> Option<String> {
    match body.pointer(pointer)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Like [`json_str`], but a missing field is a `MalformedResponse`.
pub fn require_str(provider: &str, body: &serde_json::Value, pointer: &str) -> Result<String, ProviderError> {
    json_str(body, pointer).ok_or_else(|| {
        ProviderError::new(
            provider,
            ProviderErrorKind::MalformedResponse,
            format!("response has no '{pointer}' field"),
        )
    })
}
