//! JSON-over-HTTPS transport shared by the remote agents.

use querent_core::agent::AgentError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// One provider endpoint: a URL, fixed headers and a bounded client.
#[derive(Clone)]
pub(crate) struct JsonEndpoint {
    provider: &'static str,
    url: String,
    headers: HeaderMap,
    client: Client,
}

impl JsonEndpoint {
    pub(crate) fn new(provider: &'static str, url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AgentError::ExecutionFailed(format!("cannot build {provider} client: {err}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            provider,
            url: url.into(),
            headers,
            client,
        })
    }

    pub(crate) fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Adds a header whose value is redacted from debug output.
    pub(crate) fn with_secret_header(mut self, name: &'static str, value: &str) -> Result<Self, AgentError> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|_| AgentError::ExecutionFailed(format!("{} key contains invalid characters", self.provider)))?;
        value.set_sensitive(true);
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub(crate) fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers
            .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        self
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// POSTs `body` and decodes a 2xx reply as `R`.
    pub(crate) async fn post<B, R>(&self, body: &B) -> Result<R, AgentError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await
            .map_err(|err| transport_error(self.provider, err))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text, retry_after));
        }

        response
            .json()
            .await
            .map_err(|err| AgentError::MalformedResponse(format!("{} reply is not the expected JSON: {err}", self.provider)))
    }
}

fn transport_error(provider: &str, err: reqwest::Error) -> AgentError {
    AgentError::ProcessError {
        status_code: None,
        message: format!("{provider} unreachable: {err}"),
        is_retryable: err.is_connect() || err.is_timeout(),
        retry_after: None,
    }
}

/// Both providers wrap failures as `{"error": {"message": ...}}`.
fn provider_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(|message| message.as_str())
        .map(str::to_string)
}

/// 429 and the 5xx gateway family are worth another attempt.
fn status_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> AgentError {
    let is_retryable = status == StatusCode::TOO_MANY_REQUESTS
        || matches!(status.as_u16(), 500 | 502 | 503 | 504);
    let message = provider_message(body).unwrap_or_else(|| format!("HTTP {status}"));

    match retry_after {
        Some(delay) => AgentError::process_error_with_retry_after(status.as_u16(), message, is_retryable, delay),
        None => AgentError::ProcessError {
            status_code: Some(status.as_u16()),
            message,
            is_retryable,
            retry_after: None,
        },
    }
}

/// Delta-seconds form only; HTTP-date values are ignored.
fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    header?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
