use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lib_proxypool::configs::{ConfigRegistry, ConfigStore, MemoryConfigStore};
use lib_proxypool::connections::db_postgres::PostgresConfigStore;
use lib_proxypool::core::{
    AlertManager, HealthCheck, HealthMonitor, HealthThresholds, MarketScheduler, PoolManager, PoolTuning,
};
use lib_proxypool::markets::{Clock, StaticCalendar, SystemClock, TradingCalendar};
use lib_proxypool::retrieve::{DEFAULT_CHECK_URL, HailiangFetcher, HttpProxyChecker, ProxyFetcher, VendorFetcher};
use lib_proxypool::Market;
use tracing::info;

use crate::proxypool_logic::config::Config;

/// Shared handles for every route.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<PoolManager>,
    pub registry: Arc<ConfigRegistry>,
    pub calendar: TradingCalendar,
    pub scheduler: Arc<MarketScheduler>,
    pub alerts: Arc<AlertManager>,
    pub monitor: Arc<HealthMonitor>,
    pub hailiang: Arc<HailiangFetcher>,
    pub clock: Arc<dyn Clock>,
}

/// Everything `AppState::assemble` needs; lets tests swap the vendor, store and clock.
pub struct StateParts {
    pub fetcher: Arc<dyn ProxyFetcher>,
    pub store: Arc<dyn ConfigStore>,
    pub calendar: TradingCalendar,
    pub clock: Arc<dyn Clock>,
    pub markets: Vec<Market>,
    pub tuning: PoolTuning,
    pub health_check: Option<HealthCheck>,
    pub default_hailiang_url: Option<String>,
}

impl AppState {
    pub fn assemble(parts: StateParts) -> Self {
        let manager = Arc::new(PoolManager::new(parts.fetcher, parts.tuning).with_health_check(parts.health_check));
        let registry = Arc::new(
            ConfigRegistry::new(parts.store).with_default_hailiang_url(parts.default_hailiang_url),
        );
        let alerts = Arc::new(AlertManager::new());
        let scheduler = Arc::new(MarketScheduler::new(
            parts.markets,
            manager.clone(),
            registry.clone(),
            parts.calendar.clone(),
            parts.clock.clone(),
            alerts.clone(),
        ));
        let monitor = Arc::new(HealthMonitor::new(manager.clone(), alerts.clone(), HealthThresholds::default()));
        Self {
            manager,
            registry,
            calendar: parts.calendar,
            scheduler,
            alerts,
            monitor,
            hailiang: Arc::new(HailiangFetcher::default()),
            clock: parts.clock,
        }
    }

    /// Production wiring from the resolved server config.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let markets = Market::parse_list(config.markets.as_deref().unwrap_or("cn,hk,us"))
            .context("invalid markets setting")?;

        let source = match &config.calendar_path {
            Some(path) => StaticCalendar::from_file(path).context("failed to load trading calendar")?,
            None => StaticCalendar::builtin(),
        };
        let calendar = TradingCalendar::new(Arc::new(source), config.calendar_fail_open.unwrap_or(false));

        let store: Arc<dyn ConfigStore> = match config.database_url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Arc::new(
                PostgresConfigStore::connect(url, 8)
                    .await
                    .context("failed to open PostgreSQL config store")?,
            ),
            None => Arc::new(MemoryConfigStore::new()),
        };
        info!(backend = store.backend(), markets = ?markets, "config store ready");

        let tuning = PoolTuning {
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds.unwrap_or(30).max(1)),
            ..PoolTuning::default()
        };

        let health_check = if config.health_check_enabled.unwrap_or(true) {
            let url = config.health_check_url.as_deref().unwrap_or(DEFAULT_CHECK_URL);
            let checker = HttpProxyChecker::new(url, Duration::from_secs(10)).context("invalid health check url")?;
            info!(url = %checker.endpoint(), "proxy health checks enabled");
            Some(HealthCheck {
                interval: Duration::from_secs(config.health_check_interval_seconds.unwrap_or(300).max(1)),
                ..HealthCheck::new(Arc::new(checker))
            })
        } else {
            None
        };

        Ok(Self::assemble(StateParts {
            fetcher: Arc::new(VendorFetcher::default()),
            store,
            calendar,
            clock: Arc::new(SystemClock),
            markets,
            tuning,
            health_check,
            default_hailiang_url: config.default_hailiang_url.clone(),
        }))
    }
}
