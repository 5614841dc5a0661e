//! # Proxy Vendor Fetchers
//!
//! The pool only needs one capability from the upstream vendor: hand over up to N
//! candidate addresses. `HailiangFetcher` talks to the hailiang JSON API,
//! `MockFetcher` fabricates addresses for development, and `VendorFetcher` picks one of
//! the two per call from the pool's live config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::configs::pool_config::PoolConfig;
use crate::retrieve::ky_http::{ApiClient, ClientOptions};

/// Body fragment the vendor sends when it refuses to hand out more IPs.
const RATE_LIMIT_MARKER: &str = "未使用的IP太多";

/// Vendor call failures. Rate limiting is not one of them; it yields an empty batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VendorError {
    #[error("vendor url is not configured")]
    MissingUrl,
    #[error("invalid vendor url: {0}")]
    InvalidUrl(String),
    #[error("vendor request failed: {0}")]
    Transport(String),
    #[error("vendor answered with http status {0}")]
    Status(u16),
    #[error("vendor rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("vendor response could not be parsed: {0}")]
    Malformed(String),
}

/// "Fetch a batch of N candidates" for a given pool.
#[async_trait]
pub trait ProxyFetcher: Send + Sync {
    /// Returns at most `count` addresses. An empty batch is a valid answer.
    async fn fetch(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError>;
}

#[derive(Debug, Deserialize)]
struct HailiangEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<HailiangItem>>,
}

#[derive(Debug, Deserialize)]
struct HailiangItem {
    ip: Option<String>,
    port: Option<serde_json::Value>,
}

/// Turns a hailiang response body into `ip:port` strings.
pub fn parse_hailiang_body(body: &str) -> Result<Vec<String>, VendorError> {
    let trimmed = body.trim();
    if !trimmed.starts_with('{') {
        if trimmed.contains(RATE_LIMIT_MARKER) {
            return Ok(Vec::new());
        }
        return Err(VendorError::Malformed(snippet(trimmed)));
    }

    let envelope: HailiangEnvelope = match serde_json::from_str(trimmed) {
        Ok(env) => env,
        Err(_) if trimmed.contains(RATE_LIMIT_MARKER) => return Ok(Vec::new()),
        Err(e) => return Err(VendorError::Malformed(e.to_string())),
    };

    if envelope.code != 0 {
        let message = envelope.msg.unwrap_or_default();
        if message.contains(RATE_LIMIT_MARKER) {
            return Ok(Vec::new());
        }
        return Err(VendorError::Rejected { code: envelope.code, message });
    }

    let items = envelope
        .data
        .ok_or_else(|| VendorError::Malformed("missing data array".to_string()))?;
    Ok(items
        .into_iter()
        .filter_map(|item| {
            let ip = item.ip?;
            let port = match item.port? {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s,
                _ => return None,
            };
            Some(format!("{ip}:{port}"))
        })
        .collect())
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

/// Hailiang HTTP fetcher. Clients are cached per vendor URL.
pub struct HailiangFetcher {
    options: ClientOptions,
    clients: Mutex<HashMap<String, Arc<ApiClient>>>,
}

impl Default for HailiangFetcher {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HailiangFetcher {
    pub fn new(options: ClientOptions) -> Self {
        Self { options, clients: Mutex::new(HashMap::new()) }
    }

    fn client_for(&self, url: &str) -> Result<Arc<ApiClient>, VendorError> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(url) {
            return Ok(client.clone());
        }
        let client = ApiClient::new(url, None, self.options)
            .map(Arc::new)
            .map_err(|e| VendorError::InvalidUrl(e.to_string()))?;
        clients.insert(url.to_string(), client.clone());
        Ok(client)
    }

    /// Single GET against `url`, regardless of any pool config.
    pub async fn fetch_url(&self, url: &str) -> Result<Vec<String>, VendorError> {
        // Pasted URLs tend to carry stray whitespace.
        let clean: String = url.chars().filter(|c| !c.is_whitespace()).collect();
        if clean.is_empty() {
            return Err(VendorError::MissingUrl);
        }
        let client = self.client_for(&clean)?;
        let response = client.get().await.map_err(|e| VendorError::Transport(e.to_string()))?;
        if !response.success {
            debug!(status = response.status, body = %snippet(&response.body), "hailiang non-success status");
            return Err(VendorError::Status(response.status));
        }
        let proxies = parse_hailiang_body(&response.body)?;
        if proxies.is_empty() {
            warn!("hailiang returned an empty batch (rate limited or exhausted)");
        }
        Ok(proxies)
    }
}

#[async_trait]
impl ProxyFetcher for HailiangFetcher {
    async fn fetch(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError> {
        let mut proxies = self.fetch_url(&config.hailiang_api_url).await?;
        proxies.truncate(count);
        Ok(proxies)
    }
}

/// Generates `http://{market}-proxy-{n}.example.com:{port}` addresses.
#[derive(Debug, Default)]
pub struct MockFetcher {
    counter: AtomicU64,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProxyFetcher for MockFetcher {
    async fn fetch(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError> {
        let market = config.market.as_str();
        let mut rng = rand::rng();
        Ok((0..count)
            .map(|_| {
                let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
                let port: u16 = rng.random_range(9000..=9999);
                format!("http://{market}-proxy-{n}.example.com:{port}")
            })
            .collect())
    }
}

/// Hailiang when the config enables it with a URL, mock otherwise.
#[derive(Default)]
pub struct VendorFetcher {
    hailiang: HailiangFetcher,
    mock: MockFetcher,
}

impl VendorFetcher {
    pub fn new(options: ClientOptions) -> Self {
        Self { hailiang: HailiangFetcher::new(options), mock: MockFetcher::new() }
    }

    pub fn hailiang(&self) -> &HailiangFetcher {
        &self.hailiang
    }
}

#[async_trait]
impl ProxyFetcher for VendorFetcher {
    async fn fetch(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError> {
        if config.uses_hailiang() {
            self.hailiang.fetch(config, count).await
        } else {
            self.mock.fetch(config, count).await
        }
    }
}
