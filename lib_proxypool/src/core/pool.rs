//! # Dual A/B Proxy Pool
//!
//! One `ProxyPool` per (market, mode). Two proxy sets live side by side: the active
//! slot serves callers while the standby slot is filled from the vendor. Rotation
//! flips the active index under the membership lock, so a concurrent `get` sees
//! either the old or the new active slot, never a half-filled one.
//!
//! Locking:
//! - `state` (membership, counters, config) is held only for short, non-awaiting
//!   critical sections. Vendor calls happen with it released.
//! - `control` serializes start/stop and owns the maintenance task handle.
//!
//! The maintenance task wakes on the sweep interval or when a caller drains the
//! active slot below the low watermark. Each pass drops expired proxies, attempts a
//! due rotation and tops up whichever slot needs it. Watermarks count eligible
//! entries only: configured proxy type, healthy, not expired.
//!
//! With a [`HealthCheck`] attached, the same task also checks every pooled proxy on
//! its own interval and drops the ones that failed too many checks in a row.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::configs::pool_config::{PoolConfig, ProxyType};
use crate::core::errors::{PoolError, PoolResult};
use crate::core::proxy::{PoolSlot, Proxy, ProxyStatus};
use crate::markets::market::{Market, Mode};
use crate::retrieve::fetcher::{ProxyFetcher, VendorError};
use crate::retrieve::health_check::{check_all, ProxyChecker};
use crate::utils::{format_duration, percent, round2};

/// Timing knobs that are not part of the per-pool config record.
#[derive(Debug, Clone, Copy)]
pub struct PoolTuning {
    pub sweep_interval: Duration,
    /// Extra attempts after the first failed vendor call.
    pub fetch_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            fetch_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
        }
    }
}

impl PoolTuning {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Periodic reachability checks of every pooled proxy.
#[derive(Clone)]
pub struct HealthCheck {
    pub checker: Arc<dyn ProxyChecker>,
    pub interval: Duration,
    /// Consecutive failed checks before a proxy is dropped.
    pub failure_threshold: u32,
    pub max_concurrent: usize,
}

impl HealthCheck {
    pub fn new(checker: Arc<dyn ProxyChecker>) -> Self {
        Self { checker, interval: Duration::from_secs(300), failure_threshold: 3, max_concurrent: 8 }
    }
}

/// A proxy handed to a caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyLease {
    pub address: String,
    pub active_pool: PoolSlot,
    pub pool_size: usize,
    pub proxy_age_seconds: f64,
}

/// Outcome of a failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// `A`, `B`, or `both` when the address was in neither slot.
    pub affected_pool: String,
    /// `marked_failed` or `removed`.
    pub action_taken: String,
    pub remaining_size: usize,
}

/// Returned by `stop`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalStats {
    pub total_runtime_seconds: f64,
    pub total_requests_served: u64,
    pub final_success_rate: f64,
    pub total_rotations: u64,
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub pool_a_size: usize,
    pub pool_b_size: usize,
    pub active_pool: Option<PoolSlot>,
    pub total_proxies: usize,
    pub success_rate: f64,
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_rotations: u64,
    pub last_rotation_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
    /// `running`, `degraded` (rotation pending or nothing to serve) or `stopped`.
    pub pool_status: String,
    pub rotation_pending: bool,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub last_fetch_count: usize,
    pub consecutive_vendor_failures: u32,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub unhealthy_removed: u64,
}

struct PoolState {
    slots: [Vec<Proxy>; 2],
    active: Option<PoolSlot>,
    running: bool,
    config: PoolConfig,
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    total_rotations: u64,
    last_rotation_at: Option<DateTime<Utc>>,
    last_rotation_instant: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    last_fetch_time: Option<DateTime<Utc>>,
    last_fetch_count: usize,
    rotation_pending: bool,
    vendor_failures: u32,
    last_health_check_at: Option<DateTime<Utc>>,
    unhealthy_removed: u64,
}

impl PoolState {
    fn new(config: PoolConfig) -> Self {
        Self {
            slots: [Vec::new(), Vec::new()],
            active: None,
            running: false,
            config,
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            total_rotations: 0,
            last_rotation_at: None,
            last_rotation_instant: None,
            started_at: None,
            last_fetch_time: None,
            last_fetch_count: 0,
            rotation_pending: false,
            vendor_failures: 0,
            last_health_check_at: None,
            unhealthy_removed: 0,
        }
    }

    fn active_len(&self) -> usize {
        self.active.map(|s| self.slots[s.index()].len()).unwrap_or(0)
    }

    /// Entries of `slot` that `get` could hand out for the configured proxy type.
    fn eligible_len(&self, slot: PoolSlot, now: Instant) -> usize {
        let threshold = self.config.failure_threshold;
        let lifetime = to_std(self.config.proxy_lifetime());
        let proxy_type = self.config.proxy_type;
        self.slots[slot.index()]
            .iter()
            .filter(|p| p.proxy_type == proxy_type && p.is_healthy(threshold) && !p.is_expired(lifetime, now))
            .count()
    }

    fn clear(&mut self) {
        self.slots = [Vec::new(), Vec::new()];
        self.active = None;
        self.running = false;
        self.rotation_pending = false;
    }

    fn contains(&self, address: &str) -> bool {
        self.slots.iter().flatten().any(|p| p.address == address)
    }
}

struct Maintenance {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Proxy pool for one (market, mode).
pub struct ProxyPool {
    market: Market,
    mode: Mode,
    state: Mutex<PoolState>,
    control: Mutex<Option<Maintenance>>,
    refill: Notify,
    fetcher: Arc<dyn ProxyFetcher>,
    tuning: PoolTuning,
    health: Option<HealthCheck>,
}

impl ProxyPool {
    pub fn new(market: Market, mode: Mode, fetcher: Arc<dyn ProxyFetcher>, tuning: PoolTuning) -> Self {
        Self {
            market,
            mode,
            state: Mutex::new(PoolState::new(PoolConfig::defaults(market, mode, Utc::now()))),
            control: Mutex::new(None),
            refill: Notify::new(),
            fetcher,
            tuning,
            health: None,
        }
    }

    pub fn with_health_check(mut self, health: HealthCheck) -> Self {
        self.health = Some(health);
        self
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    pub async fn config(&self) -> PoolConfig {
        self.state.lock().await.config.clone()
    }

    /// Starts the pool: both slots empty, A active, one replenishment cycle inline,
    /// then background maintenance.
    ///
    /// # Errors
    /// `AlreadyRunning` if started, `VendorUnavailable` if the first cycle got
    /// nothing because the vendor kept failing. The pool stays stopped in that case.
    pub async fn start(self: &Arc<Self>, config: PoolConfig) -> PoolResult<DateTime<Utc>> {
        let mut control = self.control.lock().await;
        if control.is_some() {
            return Err(PoolError::AlreadyRunning { market: self.market, mode: self.mode });
        }

        {
            let mut state = self.state.lock().await;
            *state = PoolState::new(config);
            state.active = Some(PoolSlot::A);
        }

        match self.replenish().await {
            Err(err) => {
                self.state.lock().await.clear();
                warn!(market = %self.market, mode = %self.mode, error = %err, "pool start failed, vendor unavailable");
                return Err(PoolError::VendorUnavailable(err));
            }
            Ok(added) => debug!(market = %self.market, mode = %self.mode, added, "initial replenishment done"),
        }

        let started_at = Utc::now();
        let (pool_size, target) = {
            let mut state = self.state.lock().await;
            state.running = true;
            state.started_at = Some(started_at);
            state.last_rotation_instant = Some(Instant::now());
            (state.active_len(), state.config.target_size)
        };

        let cancel = CancellationToken::new();
        let pool = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { pool.maintain(token).await });
        *control = Some(Maintenance { cancel, handle });

        info!(market = %self.market, mode = %self.mode, pool_size, target, "proxy pool started");
        Ok(started_at)
    }

    /// Stops maintenance, clears both slots and returns the run's final statistics.
    pub async fn stop(&self) -> PoolResult<FinalStats> {
        let mut control = self.control.lock().await;
        let Some(maintenance) = control.take() else {
            return Err(PoolError::AlreadyStopped { market: self.market, mode: self.mode });
        };
        maintenance.cancel.cancel();
        if let Err(err) = maintenance.handle.await {
            warn!(market = %self.market, mode = %self.mode, error = %err, "maintenance task ended abnormally");
        }

        let mut state = self.state.lock().await;
        let runtime = state
            .started_at
            .map(|at| Utc::now() - at)
            .unwrap_or_else(chrono::Duration::zero);
        let stats = FinalStats {
            total_runtime_seconds: round2(runtime.num_milliseconds().max(0) as f64 / 1000.0),
            total_requests_served: state.total_requests,
            final_success_rate: percent(state.success_count, state.total_requests),
            total_rotations: state.total_rotations,
        };
        state.clear();
        state.started_at = None;

        info!(
            market = %self.market,
            mode = %self.mode,
            runtime = %format_duration(runtime),
            requests = stats.total_requests_served,
            success_rate = stats.final_success_rate,
            rotations = stats.total_rotations,
            "proxy pool stopped"
        );
        Ok(stats)
    }

    /// Applies a new config record to the pool; a running pool picks it up on its
    /// next maintenance pass. A proxy type change drops every entry of the old type.
    pub async fn update_config(&self, config: PoolConfig) {
        let running = {
            let mut state = self.state.lock().await;
            let proxy_type = config.proxy_type;
            let type_changed = state.config.proxy_type != proxy_type;
            state.config = config;
            if type_changed {
                let before = state.slots[0].len() + state.slots[1].len();
                for slot in state.slots.iter_mut() {
                    slot.retain(|p| p.proxy_type == proxy_type);
                }
                let purged = before - (state.slots[0].len() + state.slots[1].len());
                info!(market = %self.market, mode = %self.mode, proxy_type = ?proxy_type, purged, "proxy type changed");
            }
            state.running
        };
        if running {
            self.refill.notify_one();
        }
    }

    /// Serves the least-recently-served healthy proxy of `proxy_type` from the
    /// active slot.
    pub async fn get(&self, proxy_type: ProxyType) -> PoolResult<ProxyLease> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(active) = state.active.filter(|_| state.running) else {
            return Err(PoolError::PoolEmpty { market: self.market, mode: self.mode });
        };
        state.total_requests += 1;

        let threshold = state.config.failure_threshold;
        let lifetime = to_std(state.config.proxy_lifetime());
        let watermark = state.config.low_watermark as usize;
        let slot = &mut state.slots[active.index()];
        let pick = slot
            .iter_mut()
            .filter(|p| p.proxy_type == proxy_type && p.is_healthy(threshold) && !p.is_expired(lifetime, now))
            .min_by_key(|p| (p.status == ProxyStatus::Failed, p.last_served()));

        let lease = match pick {
            Some(proxy) => {
                proxy.mark_served(now);
                let address = proxy.address.clone();
                let age = proxy.age(now).as_secs_f64();
                Some((address, age))
            }
            None => None,
        };
        let pool_size = slot.len();
        let eligible = state.eligible_len(active, now);

        let result = match lease {
            Some((address, age)) => {
                state.success_count += 1;
                Ok(ProxyLease { address, active_pool: active, pool_size, proxy_age_seconds: round2(age) })
            }
            None => {
                state.failure_count += 1;
                Err(PoolError::PoolEmpty { market: self.market, mode: self.mode })
            }
        };
        drop(state);

        if eligible < watermark {
            self.refill.notify_one();
        }
        result
    }

    /// Records a failure for `address`.
    pub async fn report_failure(&self, address: &str) -> FailureReport {
        let mut state = self.state.lock().await;
        state.failure_count += 1;
        let threshold = state.config.failure_threshold;
        let watermark = state.config.low_watermark as usize;

        let Some(active) = state.active else {
            return FailureReport {
                affected_pool: "both".to_string(),
                action_taken: "removed".to_string(),
                remaining_size: 0,
            };
        };

        let (affected, action) = {
            let active_slot = &mut state.slots[active.index()];
            if let Some(pos) = active_slot.iter().position(|p| p.address == address) {
                let proxy = &mut active_slot[pos];
                proxy.failure_count += 1;
                if proxy.failure_count >= threshold {
                    active_slot.remove(pos);
                    (active.as_str(), "removed")
                } else {
                    proxy.status = ProxyStatus::Failed;
                    (active.as_str(), "marked_failed")
                }
            } else {
                let standby = active.other();
                let standby_slot = &mut state.slots[standby.index()];
                let before = standby_slot.len();
                standby_slot.retain(|p| p.address != address);
                if standby_slot.len() < before {
                    (standby.as_str(), "removed")
                } else {
                    ("both", "removed")
                }
            }
        };

        let remaining_size = state.active_len();
        let eligible = state.eligible_len(active, Instant::now());
        let running = state.running;
        drop(state);

        debug!(market = %self.market, mode = %self.mode, address, affected, action, remaining_size, "failure reported");
        if running && eligible < watermark {
            self.refill.notify_one();
        }
        FailureReport {
            affected_pool: affected.to_string(),
            action_taken: action.to_string(),
            remaining_size,
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let uptime = state
            .started_at
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        let pool_status = if !state.running {
            "stopped"
        } else if state.rotation_pending || state.active_len() == 0 {
            "degraded"
        } else {
            "running"
        };
        PoolStats {
            running: state.running,
            pool_a_size: state.slots[0].len(),
            pool_b_size: state.slots[1].len(),
            active_pool: state.active.filter(|_| state.running),
            total_proxies: state.slots[0].len() + state.slots[1].len(),
            success_rate: percent(state.success_count, state.total_requests),
            total_requests: state.total_requests,
            success_count: state.success_count,
            failure_count: state.failure_count,
            total_rotations: state.total_rotations,
            last_rotation_at: state.last_rotation_at,
            started_at: state.started_at,
            uptime_seconds: round2(uptime),
            pool_status: pool_status.to_string(),
            rotation_pending: state.rotation_pending,
            last_fetch_time: state.last_fetch_time,
            last_fetch_count: state.last_fetch_count,
            consecutive_vendor_failures: state.vendor_failures,
            last_health_check_at: state.last_health_check_at,
            unhealthy_removed: state.unhealthy_removed,
        }
    }

    async fn maintain(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.tuning.sweep_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut health_ticker = self.health.as_ref().map(|h| {
            let mut t = tokio::time::interval_at(Instant::now() + h.interval, h.interval);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        loop {
            let mut check_health = false;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.refill.notified() => {}
                _ = next_tick(&mut health_ticker) => check_health = true,
            }
            let pass = async {
                if check_health {
                    self.health_pass().await;
                }
                self.maintenance_pass().await;
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = pass => {}
            }
        }
        debug!(market = %self.market, mode = %self.mode, "maintenance task exited");
    }

    async fn maintenance_pass(&self) {
        self.sweep_expired().await;
        self.try_rotate().await;
        if let Err(err) = self.replenish().await {
            warn!(market = %self.market, mode = %self.mode, error = %err, "replenishment failed");
        }
    }

    /// Checks every pooled proxy with the membership lock released, then drops the
    /// ones whose failure streak reached the threshold. Entries added while the
    /// checks ran are kept unchecked.
    async fn health_pass(&self) {
        let Some(health) = &self.health else {
            return;
        };
        let addresses: Vec<String> = {
            let state = self.state.lock().await;
            state.slots.iter().flatten().map(|p| p.address.clone()).collect()
        };
        if addresses.is_empty() {
            return;
        }
        let checked = addresses.len();
        let outcomes = check_all(Arc::clone(&health.checker), addresses, health.max_concurrent).await;
        let healthy = outcomes.iter().filter(|o| o.healthy).count();

        let mut state = self.state.lock().await;
        for outcome in &outcomes {
            if let Some(proxy) = state.slots.iter_mut().flatten().find(|p| p.address == outcome.address) {
                proxy.record_check(outcome.healthy);
            }
        }
        let mut removed = 0usize;
        for (index, slot) in state.slots.iter_mut().enumerate() {
            let before = slot.len();
            slot.retain(|p| p.check_failures < health.failure_threshold);
            let dropped = before - slot.len();
            if dropped > 0 {
                debug!(market = %self.market, mode = %self.mode, slot = index, dropped, "unhealthy proxies dropped");
            }
            removed += dropped;
        }
        state.unhealthy_removed += removed as u64;
        state.last_health_check_at = Some(Utc::now());
        drop(state);

        info!(market = %self.market, mode = %self.mode, checked, healthy, removed, "proxy health check done");
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let lifetime = to_std(state.config.proxy_lifetime());
        let before = state.slots[0].len() + state.slots[1].len();
        for slot in state.slots.iter_mut() {
            slot.retain(|p| !p.is_expired(lifetime, now));
        }
        let removed = before - (state.slots[0].len() + state.slots[1].len());
        if removed > 0 {
            debug!(market = %self.market, mode = %self.mode, removed, "expired proxies swept");
        }
    }

    async fn try_rotate(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let Some(active) = state.active else {
            return;
        };
        let interval = to_std(state.config.rotation_interval());
        let due = state
            .last_rotation_instant
            .map(|last| now.saturating_duration_since(last) >= interval)
            .unwrap_or(false);
        if !due {
            return;
        }

        let standby = active.other();
        let standby_len = state.eligible_len(standby, now);
        let target = state.config.target_size as usize;
        if standby_len < target {
            if !state.rotation_pending {
                warn!(
                    market = %self.market,
                    mode = %self.mode,
                    standby = %standby,
                    standby_len,
                    target,
                    "rotation deferred, standby pool below target (degraded)"
                );
            }
            state.rotation_pending = true;
            return;
        }

        state.active = Some(standby);
        state.slots[active.index()].clear();
        state.total_rotations += 1;
        state.last_rotation_at = Some(Utc::now());
        state.last_rotation_instant = Some(now);
        state.rotation_pending = false;
        info!(
            market = %self.market,
            mode = %self.mode,
            active = %standby,
            size = standby_len,
            rotations = state.total_rotations,
            "pool rotated"
        );
    }

    /// Tops up the active slot while it is under the low watermark, otherwise the
    /// standby slot, until the target size is reached or the vendor runs dry.
    /// Returns how many proxies were added. Errors only when nothing was added.
    async fn replenish(&self) -> Result<usize, VendorError> {
        let mut added = 0usize;
        loop {
            let (slot, config, count) = {
                let state = self.state.lock().await;
                let Some(active) = state.active else {
                    return Ok(added);
                };
                let now = Instant::now();
                let target = state.config.target_size as usize;
                let slot = if state.eligible_len(active, now) < state.config.low_watermark as usize {
                    active
                } else {
                    active.other()
                };
                let need = target.saturating_sub(state.eligible_len(slot, now));
                if need == 0 {
                    return Ok(added);
                }
                (slot, state.config.clone(), need.min(state.config.batch_size as usize))
            };

            let batch = match self.fetch_with_retry(&config, count).await {
                Ok(batch) => batch,
                Err(err) if added == 0 => return Err(err),
                Err(_) => return Ok(added),
            };

            let mut state = self.state.lock().await;
            if state.active.is_none() {
                return Ok(added);
            }
            let fetched = batch.len();
            let mut seen = HashSet::new();
            let fresh: Vec<Proxy> = batch
                .into_iter()
                .filter(|addr| !state.contains(addr) && seen.insert(addr.clone()))
                .map(|addr| Proxy::new(addr, slot, config.proxy_type))
                .collect();
            let inserted = fresh.len();
            state.slots[slot.index()].extend(fresh);
            state.last_fetch_time = Some(Utc::now());
            state.last_fetch_count = fetched;
            added += inserted;
            debug!(market = %self.market, mode = %self.mode, slot = %slot, fetched, inserted, "pool replenished");

            if inserted == 0 {
                return Ok(added);
            }
        }
    }

    async fn fetch_with_retry(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError> {
        let mut attempt = 0u32;
        loop {
            match self.fetcher.fetch(config, count).await {
                Ok(batch) => {
                    self.state.lock().await.vendor_failures = 0;
                    return Ok(batch);
                }
                Err(err) if attempt < self.tuning.fetch_retries => {
                    let delay = self.tuning.backoff(attempt);
                    debug!(market = %self.market, mode = %self.mode, attempt, ?delay, error = %err, "vendor fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    let streak = {
                        let mut state = self.state.lock().await;
                        state.vendor_failures += 1;
                        state.vendor_failures
                    };
                    warn!(market = %self.market, mode = %self.mode, attempts = attempt + 1, streak, error = %err, "vendor fetch gave up");
                    return Err(err);
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn to_std(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::ZERO)
}
