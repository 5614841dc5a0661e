//! # lib_proxypool
//!
//! Engine library for the proxy pool service. Each top-level module sits behind a
//! cargo feature of the same name; `full` turns everything on.
//!
//! - **`markets`**: market codes, timezones and the trading calendar resolver.
//! - **`configs`**: per (market, mode) pool configuration and its stores.
//! - **`connections`**: the PostgreSQL configuration store.
//! - **`retrieve`**: the retrying HTTP client and the proxy vendor fetchers.
//! - **`core`**: dual A/B proxy pools, the pool manager, the market scheduler and
//!   health monitoring.
//! - **`loggers`**: tracing bootstrap.
//! - **`utils`**: small time and formatting helpers.

#![forbid(unsafe_code)]

#[cfg(feature = "configs")]
pub mod configs;
#[cfg(feature = "connections")]
pub mod connections;
#[cfg(feature = "core")]
pub mod core;
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "markets")]
pub mod markets;
#[cfg(feature = "retrieve")]
pub mod retrieve;
#[cfg(feature = "utils")]
pub mod utils;

#[cfg(feature = "core")]
pub use crate::core::errors::{PoolError, PoolResult};
#[cfg(feature = "markets")]
pub use crate::markets::market::{Market, Mode};
