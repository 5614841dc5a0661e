//! # Pool Configuration
//!
//! One `PoolConfig` record exists per (market, mode). Records are created with
//! defaults on first access and only change through a `PoolConfigUpdate`, a partial
//! delta whose fields are validated one by one. Unknown fields are ignored.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::markets::market::{Market, Mode};

/// Vendor product a pool stocks. `get` only serves entries of the requested type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProxyType {
    #[default]
    Short,
    Long,
}

impl ProxyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyType::Short => "short",
            ProxyType::Long => "long",
        }
    }
}

impl FromStr for ProxyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(ProxyType::Short),
            "long" => Ok(ProxyType::Long),
            other => Err(format!("unsupported proxy_type '{other}', expected short or long")),
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProxyType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProxyType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Configuration record of one (market, mode) pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub market: Market,
    pub mode: Mode,
    pub hailiang_api_url: String,
    pub hailiang_enabled: bool,
    pub proxy_type: ProxyType,
    pub batch_size: u32,
    pub proxy_lifetime_minutes: u32,
    pub rotation_interval_minutes: u32,
    pub low_watermark: u32,
    pub target_size: u32,
    pub failure_threshold: u32,
    pub auto_start_enabled: bool,
    pub pre_market_start_minutes: u32,
    pub post_market_stop_minutes: u32,
    pub backfill_enabled: bool,
    pub backfill_duration_hours: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolConfig {
    pub fn defaults(market: Market, mode: Mode, now: DateTime<Utc>) -> Self {
        Self {
            market,
            mode,
            hailiang_api_url: String::new(),
            hailiang_enabled: false,
            proxy_type: ProxyType::Short,
            batch_size: 400,
            proxy_lifetime_minutes: 10,
            rotation_interval_minutes: 7,
            low_watermark: 50,
            target_size: 200,
            failure_threshold: 3,
            auto_start_enabled: true,
            pre_market_start_minutes: 30,
            post_market_stop_minutes: 30,
            backfill_enabled: false,
            backfill_duration_hours: 2,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn proxy_lifetime(&self) -> Duration {
        Duration::minutes(i64::from(self.proxy_lifetime_minutes))
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::minutes(i64::from(self.rotation_interval_minutes))
    }

    pub fn backfill_duration(&self) -> Duration {
        Duration::hours(i64::from(self.backfill_duration_hours))
    }

    /// True when the hailiang vendor should be used instead of the mock generator.
    pub fn uses_hailiang(&self) -> bool {
        self.hailiang_enabled && !self.hailiang_api_url.trim().is_empty()
    }
}

/// One rejected field of a config update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field errors of a rejected config update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", summarize(.errors))]
pub struct ConfigValidationError {
    pub errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ConfigValidationError {
    fn single(field: &str, message: impl Into<String>) -> Self {
        Self { errors: vec![FieldError { field: field.to_string(), message: message.into() }] }
    }
}

/// A partial configuration delta. `None` means "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolConfigUpdate {
    pub hailiang_api_url: Option<String>,
    pub hailiang_enabled: Option<bool>,
    pub proxy_type: Option<ProxyType>,
    pub batch_size: Option<u32>,
    pub proxy_lifetime_minutes: Option<u32>,
    pub rotation_interval_minutes: Option<u32>,
    pub low_watermark: Option<u32>,
    pub target_size: Option<u32>,
    pub failure_threshold: Option<u32>,
    pub auto_start_enabled: Option<bool>,
    pub pre_market_start_minutes: Option<u32>,
    pub post_market_stop_minutes: Option<u32>,
    pub backfill_enabled: Option<bool>,
    pub backfill_duration_hours: Option<u32>,
    pub is_active: Option<bool>,
}

struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> FieldReader<'a> {
    fn reject(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError { field: field.to_string(), message: message.into() });
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.map.get(field).filter(|v| !v.is_null())
    }

    fn bounded(&mut self, field: &str, min: u32, max: u32) -> Option<u32> {
        let value = self.present(field)?;
        match value.as_u64() {
            Some(n) if n >= u64::from(min) && n <= u64::from(max) => Some(n as u32),
            Some(n) => {
                self.reject(field, format!("{n} is out of range {min}..={max}"));
                None
            }
            None => {
                self.reject(field, "expected a non-negative integer");
                None
            }
        }
    }

    fn flag(&mut self, field: &str) -> Option<bool> {
        let value = self.present(field)?;
        match value.as_bool() {
            Some(b) => Some(b),
            None => {
                self.reject(field, "expected a boolean");
                None
            }
        }
    }

    fn url(&mut self, field: &str) -> Option<String> {
        let value = self.present(field)?;
        let Some(raw) = value.as_str() else {
            self.reject(field, "expected a string");
            return None;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(String::new());
        }
        match url::Url::parse(trimmed) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Some(trimmed.to_string()),
            Ok(parsed) => {
                self.reject(field, format!("unsupported scheme '{}'", parsed.scheme()));
                None
            }
            Err(e) => {
                self.reject(field, format!("not an absolute URL: {e}"));
                None
            }
        }
    }

    fn proxy_type(&mut self, field: &str) -> Option<ProxyType> {
        let value = self.present(field)?;
        match value.as_str().map(str::parse::<ProxyType>) {
            Some(Ok(t)) => Some(t),
            Some(Err(message)) => {
                self.reject(field, message);
                None
            }
            None => {
                self.reject(field, "expected a string");
                None
            }
        }
    }
}

impl PoolConfigUpdate {
    /// Reads a delta from a JSON object, checking every known field on its own.
    /// Unknown keys and explicit nulls are ignored.
    pub fn from_json(value: &Value) -> Result<Self, ConfigValidationError> {
        let Some(map) = value.as_object() else {
            return Err(ConfigValidationError::single("body", "expected a JSON object"));
        };
        let mut r = FieldReader { map, errors: Vec::new() };

        let update = Self {
            hailiang_api_url: r.url("hailiang_api_url"),
            hailiang_enabled: r.flag("hailiang_enabled"),
            proxy_type: r.proxy_type("proxy_type"),
            batch_size: r.bounded("batch_size", 1, 2000),
            proxy_lifetime_minutes: r.bounded("proxy_lifetime_minutes", 1, 1440),
            rotation_interval_minutes: r.bounded("rotation_interval_minutes", 1, 1440),
            low_watermark: r.bounded("low_watermark", 0, 10_000),
            target_size: r.bounded("target_size", 1, 10_000),
            failure_threshold: r.bounded("failure_threshold", 1, 100),
            auto_start_enabled: r.flag("auto_start_enabled"),
            pre_market_start_minutes: r.bounded("pre_market_start_minutes", 0, 720),
            post_market_stop_minutes: r.bounded("post_market_stop_minutes", 0, 720),
            backfill_enabled: r.flag("backfill_enabled"),
            backfill_duration_hours: r.bounded("backfill_duration_hours", 1, 72),
            is_active: r.flag("is_active"),
        };

        if r.errors.is_empty() {
            Ok(update)
        } else {
            Err(ConfigValidationError { errors: r.errors })
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merges the delta over `base` and checks the cross-field constraints of the result.
    pub fn apply(&self, base: &PoolConfig, now: DateTime<Utc>) -> Result<PoolConfig, ConfigValidationError> {
        let mut merged = base.clone();
        if let Some(v) = &self.hailiang_api_url {
            merged.hailiang_api_url = v.clone();
        }
        merged.hailiang_enabled = self.hailiang_enabled.unwrap_or(merged.hailiang_enabled);
        merged.proxy_type = self.proxy_type.unwrap_or(merged.proxy_type);
        merged.batch_size = self.batch_size.unwrap_or(merged.batch_size);
        merged.proxy_lifetime_minutes = self.proxy_lifetime_minutes.unwrap_or(merged.proxy_lifetime_minutes);
        merged.rotation_interval_minutes = self.rotation_interval_minutes.unwrap_or(merged.rotation_interval_minutes);
        merged.low_watermark = self.low_watermark.unwrap_or(merged.low_watermark);
        merged.target_size = self.target_size.unwrap_or(merged.target_size);
        merged.failure_threshold = self.failure_threshold.unwrap_or(merged.failure_threshold);
        merged.auto_start_enabled = self.auto_start_enabled.unwrap_or(merged.auto_start_enabled);
        merged.pre_market_start_minutes = self.pre_market_start_minutes.unwrap_or(merged.pre_market_start_minutes);
        merged.post_market_stop_minutes = self.post_market_stop_minutes.unwrap_or(merged.post_market_stop_minutes);
        merged.backfill_enabled = self.backfill_enabled.unwrap_or(merged.backfill_enabled);
        merged.backfill_duration_hours = self.backfill_duration_hours.unwrap_or(merged.backfill_duration_hours);
        merged.is_active = self.is_active.unwrap_or(merged.is_active);

        if merged.low_watermark >= merged.target_size {
            return Err(ConfigValidationError::single(
                "low_watermark",
                format!(
                    "low_watermark ({}) must be below target_size ({})",
                    merged.low_watermark, merged.target_size
                ),
            ));
        }
        if merged.hailiang_enabled && merged.hailiang_api_url.is_empty() {
            return Err(ConfigValidationError::single(
                "hailiang_api_url",
                "required when hailiang_enabled is true",
            ));
        }

        if merged != *base {
            merged.updated_at = now;
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> PoolConfig {
        PoolConfig::defaults(Market::Cn, Mode::Live, Utc::now())
    }

    #[test]
    fn partial_update_changes_only_named_fields() {
        let cfg = base();
        let update = PoolConfigUpdate::from_json(&json!({"target_size": 120, "auto_start_enabled": false})).unwrap();
        let merged = update.apply(&cfg, Utc::now()).unwrap();

        assert_eq!(merged.target_size, 120);
        assert!(!merged.auto_start_enabled);
        assert_eq!(merged.batch_size, cfg.batch_size);
        assert_eq!(merged.low_watermark, cfg.low_watermark);
        assert_eq!(merged.created_at, cfg.created_at);
        assert!(merged.updated_at >= cfg.updated_at);
    }

    #[test]
    fn unknown_fields_and_nulls_are_ignored() {
        let update = PoolConfigUpdate::from_json(&json!({"colour": "red", "batch_size": null})).unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn each_bad_field_is_reported() {
        let err = PoolConfigUpdate::from_json(&json!({
            "batch_size": 0,
            "auto_start_enabled": "yes",
            "proxy_type": "medium",
            "hailiang_api_url": "ftp://vendor.example.com",
            "target_size": 150
        }))
        .unwrap_err();
        let fields: Vec<_> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["hailiang_api_url", "proxy_type", "batch_size", "auto_start_enabled"]);
    }

    #[test]
    fn watermark_must_stay_below_target() {
        let update = PoolConfigUpdate::from_json(&json!({"low_watermark": 300})).unwrap();
        let err = update.apply(&base(), Utc::now()).unwrap_err();
        assert_eq!(err.errors[0].field, "low_watermark");
    }

    #[test]
    fn enabling_hailiang_needs_a_url() {
        let update = PoolConfigUpdate::from_json(&json!({"hailiang_enabled": true})).unwrap();
        assert!(update.apply(&base(), Utc::now()).is_err());

        let update = PoolConfigUpdate::from_json(&json!({
            "hailiang_enabled": true,
            "hailiang_api_url": "http://api.hailiangip.com/get?num=200"
        }))
        .unwrap();
        let merged = update.apply(&base(), Utc::now()).unwrap();
        assert!(merged.uses_hailiang());
    }
}
