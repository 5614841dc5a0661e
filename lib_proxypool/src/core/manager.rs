//! Registry of proxy pools keyed by (market, mode).
//!
//! Pools are created lazily on first lookup and live for the whole process. The map
//! lock is held only for the lookup; every pool operation runs on the pool itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::configs::pool_config::PoolConfig;
use crate::core::errors::PoolResult;
use crate::core::pool::{FinalStats, HealthCheck, PoolTuning, ProxyPool};
use crate::markets::market::{Market, Mode};
use crate::retrieve::fetcher::ProxyFetcher;

pub struct PoolManager {
    pools: RwLock<HashMap<(Market, Mode), Arc<ProxyPool>>>,
    fetcher: Arc<dyn ProxyFetcher>,
    tuning: PoolTuning,
    health: Option<HealthCheck>,
}

impl PoolManager {
    pub fn new(fetcher: Arc<dyn ProxyFetcher>, tuning: PoolTuning) -> Self {
        Self { pools: RwLock::new(HashMap::new()), fetcher, tuning, health: None }
    }

    /// Every pool created from now on runs periodic proxy health checks.
    pub fn with_health_check(mut self, health: Option<HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn fetcher(&self) -> Arc<dyn ProxyFetcher> {
        Arc::clone(&self.fetcher)
    }

    /// Returns the pool for (market, mode), creating it on first use.
    pub async fn pool(&self, market: Market, mode: Mode) -> Arc<ProxyPool> {
        if let Some(pool) = self.pools.read().await.get(&(market, mode)) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write().await;
        Arc::clone(pools.entry((market, mode)).or_insert_with(|| {
            let pool = ProxyPool::new(market, mode, Arc::clone(&self.fetcher), self.tuning);
            Arc::new(match &self.health {
                Some(health) => pool.with_health_check(health.clone()),
                None => pool,
            })
        }))
    }

    pub async fn start(&self, config: PoolConfig) -> PoolResult<DateTime<Utc>> {
        self.pool(config.market, config.mode).await.start(config).await
    }

    pub async fn stop(&self, market: Market, mode: Mode) -> PoolResult<FinalStats> {
        self.pool(market, mode).await.stop().await
    }

    /// Pushes a changed config record into its pool, if that pool exists.
    pub async fn apply_config(&self, config: &PoolConfig) {
        let pool = self.pools.read().await.get(&(config.market, config.mode)).cloned();
        if let Some(pool) = pool {
            pool.update_config(config.clone()).await;
        }
    }

    /// Every pool created so far, ordered by (market, mode).
    pub async fn pools(&self) -> Vec<Arc<ProxyPool>> {
        let mut pools: Vec<_> = self.pools.read().await.values().cloned().collect();
        pools.sort_by_key(|p| (p.market(), p.mode()));
        pools
    }

    pub async fn running_pools(&self) -> Vec<Arc<ProxyPool>> {
        let mut out = Vec::new();
        for pool in self.pools().await {
            if pool.is_running().await {
                out.push(pool);
            }
        }
        out
    }

    /// Stops every running pool; used on shutdown.
    pub async fn stop_all(&self) -> Vec<(Market, Mode, FinalStats)> {
        let mut stopped = Vec::new();
        for pool in self.running_pools().await {
            match pool.stop().await {
                Ok(stats) => {
                    info!(
                        market = %pool.market(),
                        mode = %pool.mode(),
                        requests = stats.total_requests_served,
                        success_rate = stats.final_success_rate,
                        "pool stopped on shutdown"
                    );
                    stopped.push((pool.market(), pool.mode(), stats));
                }
                Err(err) => warn!(market = %pool.market(), mode = %pool.mode(), error = %err, "pool stop on shutdown failed"),
            }
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::tests::{fast_tuning, TestFetcher};

    #[tokio::test]
    async fn pools_are_isolated_per_market_and_mode() {
        let manager = PoolManager::new(TestFetcher::unlimited(), fast_tuning());
        let mut cfg = PoolConfig::defaults(Market::Hk, Mode::Live, Utc::now());
        cfg.target_size = 20;
        cfg.low_watermark = 5;
        manager.start(cfg).await.unwrap();

        assert!(manager.pool(Market::Hk, Mode::Live).await.is_running().await);
        assert!(!manager.pool(Market::Hk, Mode::Backfill).await.is_running().await);
        assert!(!manager.pool(Market::Cn, Mode::Live).await.is_running().await);
        assert_eq!(manager.running_pools().await.len(), 1);
        assert_eq!(manager.pools().await.len(), 3);

        let stopped = manager.stop_all().await;
        assert_eq!(stopped.len(), 1);
        assert_eq!((stopped[0].0, stopped[0].1), (Market::Hk, Mode::Live));
        assert!(manager.running_pools().await.is_empty());
    }

    #[tokio::test]
    async fn same_pool_is_returned() {
        let manager = PoolManager::new(TestFetcher::unlimited(), fast_tuning());
        let a = manager.pool(Market::Us, Mode::Live).await;
        let b = manager.pool(Market::Us, Mode::Live).await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
