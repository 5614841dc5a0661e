//! # Core Engine Module
//!
//! The proxy pool engine and what drives it.
//!
//! ## Core Components:
//!
//! - **`pool`**: the dual A/B `ProxyPool` with background replenishment, rotation,
//!   expiry sweep and optional proxy health checks.
//! - **`proxy`**: a single pooled proxy and the slot designator.
//! - **`manager`**: `PoolManager`, the (market, mode) registry of pools.
//! - **`scheduler`**: `MarketScheduler`, which starts and stops live pools around
//!   trading hours and runs the backfill window.
//! - **`monitor`**: the alert log and the periodic health checks.
//! - **`errors`**: `PoolError` and its stable error codes.

#![forbid(unsafe_code)]

/// Engine error taxonomy.
pub mod errors;
/// Pool registry.
pub mod manager;
/// Alerts and health checks.
pub mod monitor;
/// Dual A/B proxy pool.
pub mod pool;
/// Pooled proxy record.
pub mod proxy;
/// Trading-hours scheduler.
pub mod scheduler;

// --- Public API Re-exports ---
pub use errors::{PoolError, PoolResult};
pub use manager::PoolManager;
pub use monitor::{Alert, AlertLevel, AlertManager, AlertSummary, HealthMonitor, HealthThresholds};
pub use pool::{FailureReport, FinalStats, HealthCheck, PoolStats, PoolTuning, ProxyLease, ProxyPool};
pub use proxy::{PoolSlot, Proxy, ProxyStatus};
pub use scheduler::{Decision, ForceOutcome, MarketScheduler, SchedulerStatus, SessionPreview};
