//! # Configuration Modules
//!
//! Per (market, mode) pool configuration: the record itself, partial updates with
//! field-level validation, the `ConfigStore` persistence seam and the
//! `ConfigRegistry` that creates default records on first access.

/// Pool configuration record, proxy type and partial updates.
pub mod pool_config;

/// Persistence seam, in-memory store and the registry on top of it.
pub mod store;

pub use pool_config::{ConfigValidationError, FieldError, PoolConfig, PoolConfigUpdate, ProxyType};
pub use store::{ConfigRegistry, ConfigStore, ConfigStoreError, ConfigUpdateError, MemoryConfigStore};
