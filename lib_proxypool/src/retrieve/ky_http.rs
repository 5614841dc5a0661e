//! # HTTP Retrieval Utilities
//!
//! Asynchronous API client wrapper around `reqwest` with exponential backoff retries
//! on transient failures and a per-request timeout.

use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

/// Transport knobs for [`ApiClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(10), max_retries: 2 }
    }
}

/// Raw response of a request: status, content type and the body as text.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub success: bool,
    pub content_type: Option<String>,
    pub body: String,
}

impl ApiResponse {
    /// True when the server labelled the body JSON or it looks like a JSON object.
    pub fn looks_like_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
            || self.body.trim_start().starts_with('{')
    }
}

/// HTTP client bound to a base URL.
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Builds a client for `base_url`, which must be absolute.
    pub fn new(base_url: &str, auth_token: Option<String>, options: ClientOptions) -> anyhow::Result<Self> {
        let url = Url::parse(base_url.trim()).with_context(|| format!("invalid base url: {base_url}"))?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(options.max_retries);
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("failed to build http client")?;
        let client = ClientBuilder::new(http)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { inner: client, base_url: url, auth_token })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Sends a request to `path` joined onto the base URL (empty path hits the base URL
    /// itself, query string included) and returns the body as text.
    pub async fn request(&self, method: Method, path: &str, headers: Option<HeaderMap>) -> anyhow::Result<ApiResponse> {
        let full_url = if path.is_empty() { self.base_url.clone() } else { self.base_url.join(path)? };
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(ApiResponse { status: status.as_u16(), success: status.is_success(), content_type, body })
    }

    /// GET on the base URL.
    pub async fn get(&self) -> anyhow::Result<ApiResponse> {
        self.request(Method::GET, "", None).await
    }
}
