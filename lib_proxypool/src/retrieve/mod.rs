//! # Data Retrieval Module
//!
//! HTTP plumbing and the proxy vendor seam.
//!
//! - **`ky_http`**: a generic `ApiClient` built on `reqwest` and `reqwest-middleware`
//!   with transient-error retries and exponential backoff.
//! - **`fetcher`**: the `ProxyFetcher` capability ("fetch a batch of N candidates") with
//!   the hailiang HTTP implementation, a mock generator and the selector between them.
//! - **`health_check`**: per-proxy reachability checks through an IP-echo endpoint.

#![forbid(unsafe_code)]

/// Generic HTTP API client with retry middleware.
pub mod ky_http;

/// Proxy vendor fetchers.
pub mod fetcher;

/// Proxy reachability checks.
pub mod health_check;

pub use health_check::{check_all, CheckOutcome, HttpProxyChecker, ProxyChecker, DEFAULT_CHECK_URL};
pub use fetcher::{HailiangFetcher, MockFetcher, ProxyFetcher, VendorError, VendorFetcher};
