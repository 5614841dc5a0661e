//! # Proxy Health Checks
//!
//! Sends one request through a pooled proxy to an IP-echo endpoint. A 2xx answer
//! within the timeout counts as healthy; anything else (refused connection, timeout,
//! non-2xx status) counts as a failed check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Proxy, Url};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default IP-echo endpoint.
pub const DEFAULT_CHECK_URL: &str = "http://httpbin.org/ip";

/// Result of checking one address.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub address: String,
    pub healthy: bool,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// "Is this proxy still usable?"
#[async_trait]
pub trait ProxyChecker: Send + Sync {
    async fn check(&self, address: &str) -> CheckOutcome;
}

/// Checks proxies with a real HTTP request routed through them.
pub struct HttpProxyChecker {
    endpoint: Url,
    timeout: Duration,
}

impl HttpProxyChecker {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint.trim()).with_context(|| format!("invalid health check url: {endpoint}"))?;
        Ok(Self { endpoint, timeout })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn request_through(&self, address: &str) -> anyhow::Result<()> {
        let proxy_url = if address.contains("://") { address.to_string() } else { format!("http://{address}") };
        let client = reqwest::Client::builder()
            .proxy(Proxy::all(&proxy_url).with_context(|| format!("invalid proxy address: {address}"))?)
            .timeout(self.timeout)
            .build()
            .context("failed to build http client")?;
        let response = client.get(self.endpoint.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {}", status.as_u16());
        }
        Ok(())
    }
}

#[async_trait]
impl ProxyChecker for HttpProxyChecker {
    async fn check(&self, address: &str) -> CheckOutcome {
        let started = Instant::now();
        let result = self.request_through(address).await;
        let elapsed = started.elapsed();
        match result {
            Ok(()) => CheckOutcome { address: address.to_string(), healthy: true, elapsed, error: None },
            Err(err) => {
                debug!(address, error = %err, "proxy health check failed");
                CheckOutcome { address: address.to_string(), healthy: false, elapsed, error: Some(err.to_string()) }
            }
        }
    }
}

/// Checks every address with at most `max_concurrent` requests in flight.
/// Outcomes come back in completion order.
pub async fn check_all(checker: Arc<dyn ProxyChecker>, addresses: Vec<String>, max_concurrent: usize) -> Vec<CheckOutcome> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    for address in addresses {
        let checker = Arc::clone(&checker);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            checker.check(&address).await
        });
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => warn!(error = %err, "health check task aborted"),
        }
    }
    outcomes
}
