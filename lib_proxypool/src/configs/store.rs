//! # Configuration Stores
//!
//! `ConfigStore` is the persistence capability for pool configs. The in-memory store
//! is the default; a PostgreSQL store lives in `connections::db_postgres`.
//! `ConfigRegistry` sits on top and owns the "create with defaults on first access"
//! and "validate, merge, persist" flows.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::configs::pool_config::{ConfigValidationError, PoolConfig, PoolConfigUpdate};
use crate::markets::market::{Market, Mode};

/// Persistence failures.
#[derive(Debug, Clone, Error)]
pub enum ConfigStoreError {
    #[error("config store backend error: {0}")]
    Backend(String),
    #[error("config record could not be (de)serialized: {0}")]
    Serialization(String),
}

/// Failure of a config update: either the delta was rejected or the store failed.
#[derive(Debug, Clone, Error)]
pub enum ConfigUpdateError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error(transparent)]
    Store(#[from] ConfigStoreError),
}

/// Load/save capability for (market, mode) config records.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Short backend label for status output.
    fn backend(&self) -> &'static str;
    async fn load(&self, market: Market, mode: Mode) -> Result<Option<PoolConfig>, ConfigStoreError>;
    async fn save(&self, config: &PoolConfig) -> Result<(), ConfigStoreError>;
    async fn list(&self) -> Result<Vec<PoolConfig>, ConfigStoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    records: RwLock<BTreeMap<(Market, Mode), PoolConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, market: Market, mode: Mode) -> Result<Option<PoolConfig>, ConfigStoreError> {
        Ok(self.records.read().await.get(&(market, mode)).cloned())
    }

    async fn save(&self, config: &PoolConfig) -> Result<(), ConfigStoreError> {
        self.records
            .write()
            .await
            .insert((config.market, config.mode), config.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<PoolConfig>, ConfigStoreError> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

/// Entry point for reading and changing pool configs.
pub struct ConfigRegistry {
    store: Arc<dyn ConfigStore>,
    default_hailiang_url: Option<String>,
    // Serializes read-modify-write cycles so concurrent updates do not drop fields.
    write_lock: Mutex<()>,
}

impl ConfigRegistry {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store, default_hailiang_url: None, write_lock: Mutex::new(()) }
    }

    /// Seeds newly created records with a vendor URL (left disabled).
    pub fn with_default_hailiang_url(mut self, url: Option<String>) -> Self {
        self.default_hailiang_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Returns the record for (market, mode), creating and persisting defaults if absent.
    pub async fn get(&self, market: Market, mode: Mode) -> Result<PoolConfig, ConfigStoreError> {
        if let Some(existing) = self.store.load(market, mode).await? {
            return Ok(existing);
        }
        let _guard = self.write_lock.lock().await;
        // Another caller may have created it while we waited.
        if let Some(existing) = self.store.load(market, mode).await? {
            return Ok(existing);
        }
        let mut config = PoolConfig::defaults(market, mode, Utc::now());
        if let Some(url) = &self.default_hailiang_url {
            config.hailiang_api_url = url.clone();
        }
        self.store.save(&config).await?;
        info!(market = %market, mode = %mode, backend = self.store.backend(), "created default pool config");
        Ok(config)
    }

    /// Validates and persists a partial update, returning the merged record.
    pub async fn update(
        &self,
        market: Market,
        mode: Mode,
        update: &PoolConfigUpdate,
    ) -> Result<PoolConfig, ConfigUpdateError> {
        let current = self.get(market, mode).await?;
        let _guard = self.write_lock.lock().await;
        let current = self.store.load(market, mode).await?.unwrap_or(current);
        let merged = update.apply(&current, Utc::now())?;
        if merged != current {
            self.store.save(&merged).await?;
            info!(market = %market, mode = %mode, "pool config updated");
        }
        Ok(merged)
    }

    /// Active records of a mode, one per market in `markets`.
    pub async fn active_for(&self, markets: &[Market], mode: Mode) -> Result<Vec<PoolConfig>, ConfigStoreError> {
        let mut out = Vec::with_capacity(markets.len());
        for market in markets {
            let config = self.get(*market, mode).await?;
            if config.is_active {
                out.push(config);
            }
        }
        Ok(out)
    }

    /// Every stored record.
    pub async fn list(&self) -> Result<Vec<PoolConfig>, ConfigStoreError> {
        self.store.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ConfigRegistry {
        ConfigRegistry::new(Arc::new(MemoryConfigStore::new()))
    }

    #[tokio::test]
    async fn first_access_creates_defaults() {
        let reg = registry().with_default_hailiang_url(Some("http://vendor.example.com/get".into()));
        let cfg = reg.get(Market::Hk, Mode::Live).await.unwrap();
        assert_eq!(cfg.target_size, 200);
        assert_eq!(cfg.hailiang_api_url, "http://vendor.example.com/get");
        assert!(!cfg.hailiang_enabled);
        assert_eq!(reg.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_then_get_round_trips() {
        let reg = registry();
        let before = reg.get(Market::Cn, Mode::Live).await.unwrap();
        let delta = PoolConfigUpdate::from_json(&json!({"low_watermark": 10, "target_size": 50})).unwrap();
        reg.update(Market::Cn, Mode::Live, &delta).await.unwrap();

        let after = reg.get(Market::Cn, Mode::Live).await.unwrap();
        assert_eq!(after.low_watermark, 10);
        assert_eq!(after.target_size, 50);
        assert_eq!(after.batch_size, before.batch_size);
        assert_eq!(after.rotation_interval_minutes, before.rotation_interval_minutes);
        assert_eq!(after.auto_start_enabled, before.auto_start_enabled);

        // Other (market, mode) records are untouched.
        let backfill = reg.get(Market::Cn, Mode::Backfill).await.unwrap();
        assert_eq!(backfill.target_size, 200);
    }

    #[tokio::test]
    async fn rejected_update_leaves_record_unchanged() {
        let reg = registry();
        let delta = PoolConfigUpdate::from_json(&json!({"low_watermark": 500})).unwrap();
        let err = reg.update(Market::Us, Mode::Live, &delta).await.unwrap_err();
        assert!(matches!(err, ConfigUpdateError::Validation(_)));
        assert_eq!(reg.get(Market::Us, Mode::Live).await.unwrap().low_watermark, 50);
    }

    #[tokio::test]
    async fn inactive_configs_are_filtered() {
        let reg = registry();
        let delta = PoolConfigUpdate::from_json(&json!({"is_active": false})).unwrap();
        reg.update(Market::Hk, Mode::Live, &delta).await.unwrap();
        let active = reg.active_for(&Market::ALL, Mode::Live).await.unwrap();
        let markets: Vec<_> = active.iter().map(|c| c.market).collect();
        assert_eq!(markets, vec![Market::Cn, Market::Us]);
    }
}
