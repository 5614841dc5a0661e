//! # Health Monitoring
//!
//! `AlertManager` is a bounded in-memory alert log shared by the scheduler, the
//! health monitor and the HTTP layer. `HealthMonitor` periodically inspects every
//! running pool and raises alerts for low success rates, thin pools, high failure
//! rates and vendor outages.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::manager::PoolManager;
use crate::core::pool::PoolStats;
use crate::markets::market::{Market, Mode};

pub const MAX_ALERTS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: u64,
    pub level: AlertLevel,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<Market>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total_alerts: usize,
    pub by_level: BTreeMap<&'static str, usize>,
    /// Error and critical alerts per component, over the process lifetime.
    pub error_stats: BTreeMap<String, u64>,
    pub last_alert_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct AlertLog {
    alerts: VecDeque<Alert>,
    error_stats: BTreeMap<String, u64>,
}

/// Bounded alert log. Oldest alerts are dropped past `MAX_ALERTS`.
#[derive(Default)]
pub struct AlertManager {
    log: Mutex<AlertLog>,
    next_id: AtomicU64,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, level: AlertLevel, component: &str, market: Option<Market>, message: impl Into<String>) -> Alert {
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            level,
            component: component.to_string(),
            market,
            message: message.into(),
            timestamp: Utc::now(),
        };
        match level {
            AlertLevel::Info => info!(component, market = ?market, "{}", alert.message),
            AlertLevel::Warning => warn!(component, market = ?market, "{}", alert.message),
            AlertLevel::Error | AlertLevel::Critical => {
                error!(component, market = ?market, level = level.as_str(), "{}", alert.message)
            }
        }

        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if level >= AlertLevel::Error {
            *log.error_stats.entry(component.to_string()).or_insert(0) += 1;
        }
        log.alerts.push_back(alert.clone());
        while log.alerts.len() > MAX_ALERTS {
            log.alerts.pop_front();
        }
        alert
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn summary(&self) -> AlertSummary {
        let log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let mut by_level: BTreeMap<&'static str, usize> = [
            AlertLevel::Info,
            AlertLevel::Warning,
            AlertLevel::Error,
            AlertLevel::Critical,
        ]
        .into_iter()
        .map(|l| (l.as_str(), 0))
        .collect();
        for alert in &log.alerts {
            *by_level.entry(alert.level.as_str()).or_insert(0) += 1;
        }
        AlertSummary {
            total_alerts: log.alerts.len(),
            by_level,
            error_stats: log.error_stats.clone(),
            last_alert_at: log.alerts.back().map(|a| a.timestamp),
        }
    }
}

/// Alerting thresholds, percentages on a 0-100 scale.
#[derive(Debug, Clone, Copy)]
pub struct HealthThresholds {
    pub success_rate_warning: f64,
    pub success_rate_critical: f64,
    pub pool_size_warning: usize,
    pub failure_rate_error: f64,
    pub failure_rate_min_requests: u64,
    pub vendor_failure_streak: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            success_rate_warning: 80.0,
            success_rate_critical: 60.0,
            pool_size_warning: 10,
            failure_rate_error: 40.0,
            failure_rate_min_requests: 100,
            vendor_failure_streak: 5,
        }
    }
}

/// One problem found in a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthIssue {
    pub level: AlertLevel,
    pub check: &'static str,
    pub message: String,
}

/// Evaluates a stats snapshot against the thresholds.
pub fn assess(stats: &PoolStats, thresholds: &HealthThresholds) -> Vec<HealthIssue> {
    let mut issues = Vec::new();
    if stats.total_requests > 0 {
        if stats.success_rate < thresholds.success_rate_critical {
            issues.push(HealthIssue {
                level: AlertLevel::Critical,
                check: "success_rate",
                message: format!("success rate {:.2}% below {}%", stats.success_rate, thresholds.success_rate_critical),
            });
        } else if stats.success_rate < thresholds.success_rate_warning {
            issues.push(HealthIssue {
                level: AlertLevel::Warning,
                check: "success_rate",
                message: format!("success rate {:.2}% below {}%", stats.success_rate, thresholds.success_rate_warning),
            });
        }
    }
    if stats.total_proxies < thresholds.pool_size_warning {
        issues.push(HealthIssue {
            level: AlertLevel::Warning,
            check: "pool_size",
            message: format!("only {} proxies pooled", stats.total_proxies),
        });
    }
    if stats.total_requests > thresholds.failure_rate_min_requests {
        let failure_rate = stats.failure_count as f64 / stats.total_requests as f64 * 100.0;
        if failure_rate > thresholds.failure_rate_error {
            issues.push(HealthIssue {
                level: AlertLevel::Error,
                check: "failure_rate",
                message: format!("failure rate {:.2}% over {} requests", failure_rate, stats.total_requests),
            });
        }
    }
    if stats.consecutive_vendor_failures >= thresholds.vendor_failure_streak {
        issues.push(HealthIssue {
            level: AlertLevel::Error,
            check: "vendor",
            message: format!("{} consecutive vendor failures", stats.consecutive_vendor_failures),
        });
    }
    issues
}

pub struct HealthMonitor {
    manager: Arc<PoolManager>,
    alerts: Arc<AlertManager>,
    thresholds: HealthThresholds,
    // Vendor outage alerts fire once per streak.
    vendor_alerted: Mutex<HashMap<(Market, Mode), bool>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<PoolManager>, alerts: Arc<AlertManager>, thresholds: HealthThresholds) -> Self {
        Self { manager, alerts, thresholds, vendor_alerted: Mutex::new(HashMap::new()) }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Checks every running pool once and returns the number of alerts raised.
    pub async fn check_once(&self) -> usize {
        let mut raised = 0;
        for pool in self.manager.running_pools().await {
            let stats = pool.stats().await;
            let key = (pool.market(), pool.mode());
            for issue in assess(&stats, &self.thresholds) {
                if issue.check == "vendor" && !self.first_in_streak(key) {
                    continue;
                }
                let message = format!("{}/{}: {}", pool.market(), pool.mode(), issue.message);
                self.alerts.raise(issue.level, "health_monitor", Some(pool.market()), message);
                raised += 1;
            }
            if stats.consecutive_vendor_failures < self.thresholds.vendor_failure_streak {
                self.reset_streak(key);
            }
        }
        debug!(raised, "health check done");
        raised
    }

    fn first_in_streak(&self, key: (Market, Mode)) -> bool {
        let mut alerted = self.vendor_alerted.lock().unwrap_or_else(|e| e.into_inner());
        let flag = alerted.entry(key).or_insert(false);
        !std::mem::replace(flag, true)
    }

    fn reset_streak(&self, key: (Market, Mode)) {
        let mut alerted = self.vendor_alerted.lock().unwrap_or_else(|e| e.into_inner());
        alerted.remove(&key);
    }

    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "health monitor started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_once().await;
                }
            }
        }
        info!("health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::pool_config::PoolConfig;
    use crate::core::pool::tests::{fast_tuning, TestFetcher};

    fn stats(total: u64, success: u64, failure: u64, proxies: usize, vendor: u32) -> PoolStats {
        PoolStats {
            running: true,
            pool_a_size: proxies,
            pool_b_size: 0,
            active_pool: None,
            total_proxies: proxies,
            success_rate: crate::utils::percent(success, total),
            total_requests: total,
            success_count: success,
            failure_count: failure,
            total_rotations: 0,
            last_rotation_at: None,
            started_at: None,
            uptime_seconds: 0.0,
            pool_status: "running".into(),
            rotation_pending: false,
            last_fetch_time: None,
            last_fetch_count: 0,
            consecutive_vendor_failures: vendor,
            last_health_check_at: None,
            unhealthy_removed: 0,
        }
    }

    #[test]
    fn alert_log_is_bounded() {
        let alerts = AlertManager::new();
        for i in 0..(MAX_ALERTS + 5) {
            alerts.raise(AlertLevel::Info, "test", None, format!("alert {i}"));
        }
        let summary = alerts.summary();
        assert_eq!(summary.total_alerts, MAX_ALERTS);
        assert_eq!(alerts.recent(1)[0].message, format!("alert {}", MAX_ALERTS + 4));
    }

    #[test]
    fn summary_counts_levels_and_errors() {
        let alerts = AlertManager::new();
        alerts.raise(AlertLevel::Warning, "scheduler", Some(Market::Hk), "w");
        alerts.raise(AlertLevel::Error, "scheduler", Some(Market::Hk), "e");
        alerts.raise(AlertLevel::Critical, "health_monitor", None, "c");
        let summary = alerts.summary();
        assert_eq!(summary.by_level["warning"], 1);
        assert_eq!(summary.by_level["info"], 0);
        assert_eq!(summary.error_stats["scheduler"], 1);
        assert_eq!(summary.error_stats["health_monitor"], 1);
    }

    #[test]
    fn thresholds_classify_stats() {
        let t = HealthThresholds::default();
        assert!(assess(&stats(0, 0, 0, 50, 0), &t).is_empty());

        let warn = assess(&stats(10, 7, 3, 50, 0), &t);
        assert_eq!(warn.len(), 1);
        assert_eq!((warn[0].check, warn[0].level), ("success_rate", AlertLevel::Warning));

        let bad = assess(&stats(200, 100, 100, 5, 5), &t);
        let checks: Vec<_> = bad.iter().map(|i| (i.check, i.level)).collect();
        assert_eq!(
            checks,
            vec![
                ("success_rate", AlertLevel::Critical),
                ("pool_size", AlertLevel::Warning),
                ("failure_rate", AlertLevel::Error),
                ("vendor", AlertLevel::Error),
            ]
        );
    }

    #[tokio::test]
    async fn monitor_alerts_on_thin_running_pools() {
        let manager = Arc::new(PoolManager::new(TestFetcher::unlimited(), fast_tuning()));
        let mut cfg = PoolConfig::defaults(Market::Us, Mode::Live, Utc::now());
        cfg.target_size = 2;
        cfg.low_watermark = 1;
        manager.start(cfg).await.unwrap();

        let alerts = Arc::new(AlertManager::new());
        let monitor = HealthMonitor::new(manager.clone(), alerts.clone(), HealthThresholds::default());
        assert_eq!(monitor.check_once().await, 1);
        assert_eq!(alerts.recent(10)[0].market, Some(Market::Us));
        manager.stop_all().await;
        assert_eq!(monitor.check_once().await, 0);
    }
}
