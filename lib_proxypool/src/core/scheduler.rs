//! # Market Scheduler
//!
//! Drives the live pool of each configured market around its trading hours. Every
//! tick resolves the market's local "today", decides whether the pool should start
//! or stop and goes through the same idempotent pool entry points as the HTTP
//! layer. A lunch break never stops a pool; only the end of the session (plus the
//! post-market margin) or a non-trading day does.
//!
//! When a live pool is stopped and the market's live config has backfill enabled,
//! the backfill pool runs for `backfill_duration_hours` afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::configs::pool_config::PoolConfig;
use crate::configs::store::ConfigRegistry;
use crate::core::errors::{PoolError, PoolResult};
use crate::core::manager::PoolManager;
use crate::core::monitor::{AlertLevel, AlertManager};
use crate::markets::calendar::{
    TradingCalendar, TradingDayDescriptor, TradingDayType, TradingHours, TradingSessionType,
};
use crate::markets::clock::Clock;
use crate::markets::market::{Market, Mode};

/// Outcome of one start/stop evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub should_start: bool,
    pub should_stop: bool,
}

/// Start/stop rule for one market at local minute-of-day `now_minutes`.
pub fn decide(descriptor: &TradingDayDescriptor, config: &PoolConfig, running: bool, now_minutes: i64) -> Decision {
    let hours = match (&descriptor.trading_hours, descriptor.is_trading_day) {
        (Some(hours), true) => hours,
        _ => return Decision { should_start: false, should_stop: running },
    };
    let window_start = hours.start_minutes() - i64::from(config.pre_market_start_minutes);
    let window_end = hours.end_minutes();
    let stop_at = window_end + i64::from(config.post_market_stop_minutes);
    Decision {
        should_start: config.auto_start_enabled && !running && window_start <= now_minutes && now_minutes <= window_end,
        should_stop: running && now_minutes >= stop_at,
    }
}

fn local_minutes(market: Market, at: DateTime<Utc>) -> i64 {
    let local = market.local_time(at);
    i64::from(local.hour()) * 60 + i64::from(local.minute())
}

/// `{status, message, trading_info?}` for forced operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForceOutcome {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_info: Option<TradingDayDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSchedulerStatus {
    pub running: bool,
    pub auto_start_enabled: bool,
    pub pre_market_minutes: u32,
    pub post_market_minutes: u32,
    pub should_start: bool,
    pub should_stop: bool,
    pub trading_day_type: Option<TradingDayType>,
    pub session_type: Option<TradingSessionType>,
    pub is_trading_day: Option<bool>,
    pub trading_hours: Option<TradingHours>,
    pub status_description: Option<String>,
    pub market_status: String,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backfill_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub scheduler_running: bool,
    pub enhanced_features: bool,
    pub markets: BTreeMap<String, MarketSchedulerStatus>,
}

/// Live view of a market for the trading-day status endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPreview {
    pub descriptor: TradingDayDescriptor,
    pub local_time: String,
    pub is_market_open: bool,
    pub decision: Decision,
}

#[derive(Debug, Default, Clone)]
struct MarketEntry {
    decision: Decision,
    descriptor: Option<TradingDayDescriptor>,
    last_check: Option<DateTime<Utc>>,
    backfill_until: Option<DateTime<Utc>>,
}

pub struct MarketScheduler {
    markets: Vec<Market>,
    manager: Arc<PoolManager>,
    registry: Arc<ConfigRegistry>,
    calendar: TradingCalendar,
    clock: Arc<dyn Clock>,
    alerts: Arc<AlertManager>,
    entries: Mutex<HashMap<Market, MarketEntry>>,
    running: AtomicBool,
}

impl MarketScheduler {
    pub fn new(
        markets: Vec<Market>,
        manager: Arc<PoolManager>,
        registry: Arc<ConfigRegistry>,
        calendar: TradingCalendar,
        clock: Arc<dyn Clock>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            markets,
            manager,
            registry,
            calendar,
            clock,
            alerts,
            entries: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Periodic loop; returns when `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        self.running.store(true, Ordering::SeqCst);
        info!(markets = ?self.markets, interval_secs = interval.as_secs(), "market scheduler started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("market scheduler stopped");
    }

    /// Evaluates every configured market once.
    pub async fn tick(&self) {
        let now = self.clock.now();
        for market in self.markets.clone() {
            self.evaluate(market, now).await;
        }
    }

    async fn evaluate(&self, market: Market, now: DateTime<Utc>) {
        let config = match self.registry.get(market, Mode::Live).await {
            Ok(config) => config,
            Err(err) => {
                self.alerts.raise(AlertLevel::Error, "scheduler", Some(market), format!("config unavailable: {err}"));
                return;
            }
        };
        if !config.is_active {
            debug!(market = %market, "market inactive, skipped");
            return;
        }

        self.expire_backfill(market, now).await;

        let descriptor = match self.calendar.today(market, now) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                self.alerts.raise(AlertLevel::Error, "scheduler", Some(market), format!("{err}; market skipped"));
                let mut entries = self.entries.lock().await;
                let entry = entries.entry(market).or_default();
                entry.descriptor = None;
                entry.last_check = Some(now);
                return;
            }
        };

        let pool = self.manager.pool(market, Mode::Live).await;
        let running = pool.is_running().await;
        let decision = decide(&descriptor, &config, running, local_minutes(market, now));
        debug!(market = %market, running, should_start = decision.should_start, should_stop = decision.should_stop, "scheduler evaluated");

        if decision.should_start {
            match pool.start(config.clone()).await {
                Ok(_) => info!(market = %market, day = %descriptor.status_description, "scheduler started live pool"),
                Err(PoolError::AlreadyRunning { .. }) => {}
                Err(err) => {
                    self.alerts.raise(AlertLevel::Error, "scheduler", Some(market), format!("start failed: {err}"));
                }
            }
        }
        if decision.should_stop {
            match pool.stop().await {
                Ok(stats) => {
                    info!(market = %market, requests = stats.total_requests_served, "scheduler stopped live pool");
                    self.trigger_backfill(market, &config, now).await;
                }
                Err(PoolError::AlreadyStopped { .. }) => {}
                Err(err) => warn!(market = %market, error = %err, "scheduler stop failed"),
            }
        }

        let mut entries = self.entries.lock().await;
        let entry = entries.entry(market).or_default();
        entry.decision = decision;
        entry.descriptor = Some(descriptor);
        entry.last_check = Some(now);
    }

    async fn trigger_backfill(&self, market: Market, live: &PoolConfig, now: DateTime<Utc>) {
        if !live.backfill_enabled {
            return;
        }
        let config = match self.registry.get(market, Mode::Backfill).await {
            Ok(config) => config,
            Err(err) => {
                warn!(market = %market, error = %err, "backfill config unavailable");
                return;
            }
        };
        match self.manager.start(config).await {
            Ok(_) | Err(PoolError::AlreadyRunning { .. }) => {
                let until = now + live.backfill_duration();
                self.entries.lock().await.entry(market).or_default().backfill_until = Some(until);
                info!(market = %market, %until, "backfill pool started");
            }
            Err(err) => {
                self.alerts.raise(AlertLevel::Warning, "scheduler", Some(market), format!("backfill start failed: {err}"));
            }
        }
    }

    async fn expire_backfill(&self, market: Market, now: DateTime<Utc>) {
        let due = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(market).or_default();
            match entry.backfill_until {
                Some(until) if now >= until => {
                    entry.backfill_until = None;
                    true
                }
                _ => false,
            }
        };
        if due {
            match self.manager.stop(market, Mode::Backfill).await {
                Ok(_) => info!(market = %market, "backfill window over, pool stopped"),
                Err(PoolError::AlreadyStopped { .. }) => {}
                Err(err) => warn!(market = %market, error = %err, "backfill stop failed"),
            }
        }
    }

    /// Starts the live pool regardless of calendar gating.
    pub async fn force_start(&self, market: Market) -> PoolResult<ForceOutcome> {
        let config = self.registry.get(market, Mode::Live).await?;
        let trading_info = self.calendar.today(market, self.clock.now()).ok();
        let (status, message) = match self.manager.start(config).await {
            Ok(_) => {
                info!(market = %market, "live pool force-started");
                ("started", format!("{market} live pool force-started"))
            }
            Err(PoolError::AlreadyRunning { .. }) => ("already_running", format!("{market} live pool is already running")),
            Err(err) => ("error", err.to_string()),
        };
        Ok(ForceOutcome { status: status.to_string(), message, trading_info })
    }

    /// Stops the live pool regardless of calendar gating.
    pub async fn force_stop(&self, market: Market) -> PoolResult<ForceOutcome> {
        let trading_info = self.calendar.today(market, self.clock.now()).ok();
        let (status, message) = match self.manager.stop(market, Mode::Live).await {
            Ok(stats) => {
                info!(market = %market, requests = stats.total_requests_served, "live pool force-stopped");
                ("stopped", format!("{market} live pool force-stopped"))
            }
            Err(PoolError::AlreadyStopped { .. }) => ("already_stopped", format!("{market} live pool is already stopped")),
            Err(err) => ("error", err.to_string()),
        };
        Ok(ForceOutcome { status: status.to_string(), message, trading_info })
    }

    /// Current descriptor, clock state and start/stop flags for `market`.
    pub async fn preview(&self, market: Market) -> PoolResult<SessionPreview> {
        let now = self.clock.now();
        let descriptor = self.calendar.today(market, now)?;
        let config = self.registry.get(market, Mode::Live).await?;
        let running = self.manager.pool(market, Mode::Live).await.is_running().await;
        let local = market.local_time(now);
        let is_market_open = descriptor.is_trading_day
            && descriptor.trading_hours.map(|h| h.is_open_at(local.time())).unwrap_or(false);
        Ok(SessionPreview {
            decision: decide(&descriptor, &config, running, local_minutes(market, now)),
            local_time: local.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            is_market_open,
            descriptor,
        })
    }

    pub async fn status(&self) -> PoolResult<SchedulerStatus> {
        let now = self.clock.now();
        let entries = self.entries.lock().await.clone();
        let mut markets = BTreeMap::new();
        for market in &self.markets {
            let config = self.registry.get(*market, Mode::Live).await?;
            let running = self.manager.pool(*market, Mode::Live).await.is_running().await;
            let entry = entries.get(market).cloned().unwrap_or_default();
            let today = self.calendar.today(*market, now).ok();
            let market_status = today
                .as_ref()
                .map(|d| format!("{} - {}", d.clock_state(market.local_time(now).time()), d.status_description))
                .unwrap_or_else(|| "unknown".to_string());
            markets.insert(
                market.as_str().to_string(),
                MarketSchedulerStatus {
                    running,
                    auto_start_enabled: config.auto_start_enabled,
                    pre_market_minutes: config.pre_market_start_minutes,
                    post_market_minutes: config.post_market_stop_minutes,
                    should_start: entry.decision.should_start,
                    should_stop: entry.decision.should_stop,
                    trading_day_type: today.as_ref().map(|d| d.day_type),
                    session_type: today.as_ref().map(|d| d.session_type),
                    is_trading_day: today.as_ref().map(|d| d.is_trading_day),
                    trading_hours: today.as_ref().and_then(|d| d.trading_hours),
                    status_description: today.as_ref().map(|d| d.status_description.clone()),
                    market_status,
                    last_check: entry.last_check,
                    backfill_until: entry.backfill_until,
                },
            );
        }
        Ok(SchedulerStatus { scheduler_running: self.is_running(), enhanced_features: true, markets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::pool_config::PoolConfigUpdate;
    use crate::configs::store::MemoryConfigStore;
    use crate::core::pool::tests::{fast_tuning, TestFetcher};
    use crate::markets::calendar::StaticCalendar;
    use crate::markets::clock::ManualClock;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;

    struct Harness {
        scheduler: Arc<MarketScheduler>,
        manager: Arc<PoolManager>,
        registry: Arc<ConfigRegistry>,
        clock: Arc<ManualClock>,
        alerts: Arc<AlertManager>,
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn harness(calendar: StaticCalendar, fail_open: bool, start: DateTime<Utc>) -> Harness {
        let manager = Arc::new(PoolManager::new(TestFetcher::unlimited(), fast_tuning()));
        let registry = Arc::new(ConfigRegistry::new(Arc::new(MemoryConfigStore::new())));
        let clock = Arc::new(ManualClock::new(start));
        let alerts = Arc::new(AlertManager::new());
        let scheduler = Arc::new(MarketScheduler::new(
            vec![Market::Cn],
            manager.clone(),
            registry.clone(),
            TradingCalendar::new(Arc::new(calendar), fail_open),
            clock.clone(),
            alerts.clone(),
        ));
        Harness { scheduler, manager, registry, clock, alerts }
    }

    async fn shrink(registry: &ConfigRegistry, market: Market, mode: Mode, extra: serde_json::Value) {
        let mut body = json!({"target_size": 20, "low_watermark": 5});
        if let (Some(obj), Some(more)) = (body.as_object_mut(), extra.as_object()) {
            obj.extend(more.clone());
        }
        let delta = PoolConfigUpdate::from_json(&body).unwrap();
        registry.update(market, mode, &delta).await.unwrap();
    }

    fn descriptor(calendar: &StaticCalendar, date: NaiveDate) -> TradingDayDescriptor {
        TradingCalendar::new(Arc::new(calendar.clone()), false).resolve(Market::Cn, date).unwrap()
    }

    #[test]
    fn start_window_boundary() {
        let cal = StaticCalendar::builtin();
        let d = descriptor(&cal, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        let cfg = PoolConfig::defaults(Market::Cn, Mode::Live, Utc::now());
        // 09:30 open, 30 minutes pre-market: window opens at 09:00.
        assert!(!decide(&d, &cfg, false, 8 * 60 + 59).should_start);
        assert!(decide(&d, &cfg, false, 9 * 60).should_start);
        assert!(decide(&d, &cfg, false, 15 * 60).should_start);
        assert!(!decide(&d, &cfg, false, 15 * 60 + 1).should_start);
        assert!(!decide(&d, &cfg, true, 9 * 60).should_start);
    }

    #[test]
    fn stop_rules() {
        let cal = StaticCalendar::builtin();
        let d = descriptor(&cal, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        let cfg = PoolConfig::defaults(Market::Cn, Mode::Live, Utc::now());
        // lunch break keeps the pool running
        assert!(!decide(&d, &cfg, true, 12 * 60).should_stop);
        assert!(!decide(&d, &cfg, true, 15 * 60 + 29).should_stop);
        assert!(decide(&d, &cfg, true, 15 * 60 + 30).should_stop);
        assert!(!decide(&d, &cfg, false, 15 * 60 + 30).should_stop);

        let weekend = descriptor(&cal, NaiveDate::from_ymd_opt(2026, 1, 3).unwrap());
        assert_eq!(decide(&weekend, &cfg, true, 10 * 60), Decision { should_start: false, should_stop: true });
        assert_eq!(decide(&weekend, &cfg, false, 10 * 60), Decision::default());
    }

    #[test]
    fn auto_start_disabled_never_starts() {
        let cal = StaticCalendar::builtin();
        let d = descriptor(&cal, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        let mut cfg = PoolConfig::defaults(Market::Cn, Mode::Live, Utc::now());
        cfg.auto_start_enabled = false;
        assert!(!decide(&d, &cfg, false, 10 * 60).should_start);
    }

    #[tokio::test]
    async fn tick_starts_at_window_and_stops_after_close() {
        // 2026-10-15 08:59 Shanghai = 00:59 UTC
        let h = harness(StaticCalendar::builtin(), false, utc(2026, 10, 15, 0, 59));
        shrink(&h.registry, Market::Cn, Mode::Live, json!({})).await;
        let pool = h.manager.pool(Market::Cn, Mode::Live).await;

        h.scheduler.tick().await;
        assert!(!pool.is_running().await);

        h.clock.set(utc(2026, 10, 15, 1, 0));
        h.scheduler.tick().await;
        assert!(pool.is_running().await);

        // 12:00 local, lunch
        h.clock.set(utc(2026, 10, 15, 4, 0));
        h.scheduler.tick().await;
        assert!(pool.is_running().await);

        // 15:30 local
        h.clock.set(utc(2026, 10, 15, 7, 30));
        h.scheduler.tick().await;
        assert!(!pool.is_running().await);

        let status = h.scheduler.status().await.unwrap();
        let cn = &status.markets["cn"];
        assert!(cn.should_stop);
        assert!(!cn.running);
        assert_eq!(cn.trading_day_type, Some(TradingDayType::Normal));
    }

    #[tokio::test]
    async fn unavailable_calendar_skips_and_alerts() {
        let cal = StaticCalendar::builtin().with_covered_years([2025]);
        let h = harness(cal, false, utc(2026, 10, 15, 2, 0));
        h.scheduler.tick().await;
        assert!(!h.manager.pool(Market::Cn, Mode::Live).await.is_running().await);
        let alerts = h.alerts.recent(5);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Error);

        let status = h.scheduler.status().await.unwrap();
        assert_eq!(status.markets["cn"].market_status, "unknown");
        assert_eq!(status.markets["cn"].trading_day_type, None);
    }

    #[tokio::test]
    async fn fail_open_calendar_still_schedules() {
        let cal = StaticCalendar::builtin().with_covered_years([2025]);
        let h = harness(cal, true, utc(2026, 10, 15, 2, 0));
        shrink(&h.registry, Market::Cn, Mode::Live, json!({})).await;
        h.scheduler.tick().await;
        assert!(h.manager.pool(Market::Cn, Mode::Live).await.is_running().await);
        h.manager.stop_all().await;
    }

    #[tokio::test]
    async fn inactive_market_is_ignored() {
        let h = harness(StaticCalendar::builtin(), false, utc(2026, 10, 15, 2, 0));
        shrink(&h.registry, Market::Cn, Mode::Live, json!({"is_active": false})).await;
        h.scheduler.tick().await;
        assert!(!h.manager.pool(Market::Cn, Mode::Live).await.is_running().await);
    }

    #[tokio::test]
    async fn force_operations_bypass_the_calendar() {
        // Saturday
        let h = harness(StaticCalendar::builtin(), false, utc(2026, 1, 3, 3, 0));
        shrink(&h.registry, Market::Cn, Mode::Live, json!({})).await;

        let started = h.scheduler.force_start(Market::Cn).await.unwrap();
        assert_eq!(started.status, "started");
        assert_eq!(started.trading_info.as_ref().map(|d| d.day_type), Some(TradingDayType::Weekend));

        let again = h.scheduler.force_start(Market::Cn).await.unwrap();
        assert_eq!(again.status, "already_running");

        let stopped = h.scheduler.force_stop(Market::Cn).await.unwrap();
        assert_eq!(stopped.status, "stopped");
        let again = h.scheduler.force_stop(Market::Cn).await.unwrap();
        assert_eq!(again.status, "already_stopped");
    }

    #[tokio::test]
    async fn backfill_runs_after_live_stop() {
        let h = harness(StaticCalendar::builtin(), false, utc(2026, 10, 15, 2, 0));
        shrink(&h.registry, Market::Cn, Mode::Live, json!({"backfill_enabled": true, "backfill_duration_hours": 1})).await;
        shrink(&h.registry, Market::Cn, Mode::Backfill, json!({})).await;
        h.scheduler.tick().await;

        h.clock.set(utc(2026, 10, 15, 7, 30));
        h.scheduler.tick().await;
        let backfill = h.manager.pool(Market::Cn, Mode::Backfill).await;
        assert!(backfill.is_running().await);
        assert!(h.scheduler.status().await.unwrap().markets["cn"].backfill_until.is_some());

        h.clock.set(utc(2026, 10, 15, 8, 31));
        h.scheduler.tick().await;
        assert!(!backfill.is_running().await);
    }
}
