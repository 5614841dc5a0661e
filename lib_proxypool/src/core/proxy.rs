//! A single pooled proxy and the A/B slot designator.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::configs::pool_config::ProxyType;

/// One of the two proxy sets of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PoolSlot {
    A,
    B,
}

impl PoolSlot {
    pub fn index(self) -> usize {
        match self {
            PoolSlot::A => 0,
            PoolSlot::B => 1,
        }
    }

    pub fn other(self) -> PoolSlot {
        match self {
            PoolSlot::A => PoolSlot::B,
            PoolSlot::B => PoolSlot::A,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PoolSlot::A => "A",
            PoolSlot::B => "B",
        }
    }
}

impl fmt::Display for PoolSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Active,
    /// Reported at least once; served only when no active entry is left.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Proxy {
    pub address: String,
    pub slot: PoolSlot,
    pub proxy_type: ProxyType,
    pub created_at: DateTime<Utc>,
    pub failure_count: u32,
    pub status: ProxyStatus,
    /// Health-check streaks; one of them is always zero.
    pub check_failures: u32,
    pub check_successes: u32,
    born: Instant,
    last_served: Option<Instant>,
}

impl Proxy {
    pub fn new(address: String, slot: PoolSlot, proxy_type: ProxyType) -> Self {
        Self {
            address,
            slot,
            proxy_type,
            created_at: Utc::now(),
            failure_count: 0,
            status: ProxyStatus::Active,
            check_failures: 0,
            check_successes: 0,
            born: Instant::now(),
            last_served: None,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.born)
    }

    pub fn is_expired(&self, lifetime: Duration, now: Instant) -> bool {
        self.age(now) > lifetime
    }

    pub fn is_healthy(&self, failure_threshold: u32) -> bool {
        self.failure_count < failure_threshold
    }

    pub fn last_served(&self) -> Option<Instant> {
        self.last_served
    }

    pub(crate) fn mark_served(&mut self, now: Instant) {
        self.last_served = Some(now);
    }

    pub(crate) fn record_check(&mut self, healthy: bool) {
        if healthy {
            self.check_successes += 1;
            self.check_failures = 0;
        } else {
            self.check_failures += 1;
            self.check_successes = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_flip() {
        assert_eq!(PoolSlot::A.other(), PoolSlot::B);
        assert_eq!(PoolSlot::B.other().index(), 0);
        assert_eq!(serde_json::to_string(&PoolSlot::B).unwrap(), "\"B\"");
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_follows_age() {
        let proxy = Proxy::new("1.1.1.1:80".into(), PoolSlot::A, ProxyType::Short);
        let lifetime = Duration::from_secs(60);
        assert!(!proxy.is_expired(lifetime, Instant::now()));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(proxy.is_expired(lifetime, Instant::now()));
        assert!(proxy.is_healthy(1));
    }

    #[test]
    fn check_streaks_reset_each_other() {
        let mut proxy = Proxy::new("1.1.1.1:80".into(), PoolSlot::B, ProxyType::Long);
        proxy.record_check(false);
        proxy.record_check(false);
        assert_eq!((proxy.check_failures, proxy.check_successes), (2, 0));
        proxy.record_check(true);
        assert_eq!((proxy.check_failures, proxy.check_successes), (0, 1));
    }
}
