//! # Connections Module
//!
//! Persistent connections to external services. Currently the PostgreSQL-backed
//! configuration store.

/// PostgreSQL connection pooling and the `proxy_pool_config` table store.
pub mod db_postgres;
