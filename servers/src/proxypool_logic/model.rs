//! Request parameters and response bodies of the HTTP surface.
//!
//! Market and mode strings are canonicalized here, once, before anything reaches
//! the engine.

use std::collections::BTreeMap;

use axum::body::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use lib_proxypool::configs::{PoolConfig, ProxyType};
use lib_proxypool::core::{FinalStats, PoolSlot, PoolStats};
use lib_proxypool::{Market, Mode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::proxypool_logic::error::{ApiError, ApiResult};

pub const DEFAULT_MARKET: Market = Market::Hk;

pub fn parse_market(raw: &str) -> ApiResult<Market> {
    raw.parse::<Market>().map_err(|e| ApiError::validation(e.to_string()))
}

pub fn parse_mode(raw: Option<&str>) -> ApiResult<Mode> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<Mode>().map_err(|e| ApiError::validation(e.to_string())),
        None => Ok(Mode::default()),
    }
}

pub fn parse_proxy_type(raw: Option<&str>) -> ApiResult<Option<ProxyType>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<ProxyType>().map(Some).map_err(ApiError::validation),
        None => Ok(None),
    }
}

/// `YYYY-MM-DD`, or the market's local today when absent.
pub fn parse_date(raw: Option<&str>, market: Market, now: DateTime<Utc>) -> ApiResult<NaiveDate> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::validation(format!("invalid date '{raw}', expected YYYY-MM-DD"))),
        None => Ok(market.local_time(now).date_naive()),
    }
}

/// JSON body parsing with the shared error shape. An empty body reads as `{}`.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) { b"{}" } else { &body[..] };
    serde_json::from_slice(raw).map_err(|e| ApiError::validation(format!("invalid request body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
pub struct MarketModeQuery {
    pub market: Option<String>,
    pub mode: Option<String>,
}

impl MarketModeQuery {
    pub fn resolve(&self) -> ApiResult<(Market, Mode)> {
        let market = match self.market.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => parse_market(raw)?,
            None => DEFAULT_MARKET,
        };
        Ok((market, parse_mode(self.mode.as_deref())?))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub event: String,
    pub proxy_type: Option<String>,
    pub proxy_addr: Option<String>,
    pub market: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub markets: Vec<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HailiangConfigRequest {
    pub api_url: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HailiangTestRequest {
    pub api_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `running` or `stopped`.
    pub status: &'static str,
    pub running: bool,
    pub market: Market,
    pub mode: Mode,
    pub market_status: String,
    pub stats: PoolStats,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub status: &'static str,
    pub market: Market,
    pub mode: Mode,
    pub started_at: Option<DateTime<Utc>>,
    pub config: PoolConfig,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
    pub market: Market,
    pub mode: Mode,
    pub final_stats: Option<FinalStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct PoolInfo {
    pub active_pool: Option<PoolSlot>,
    pub pool_size: usize,
    pub proxy_age_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MarketInfo {
    pub market: Market,
    pub is_trading_time: bool,
    pub market_status: String,
}

#[derive(Debug, Serialize)]
pub struct GetProxyResponse {
    pub status: &'static str,
    pub proxy: Option<String>,
    pub pool_info: PoolInfo,
    pub market_info: MarketInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PoolImpact {
    pub affected_pool: String,
    pub remaining_size: usize,
}

#[derive(Debug, Serialize)]
pub struct ReportFailureResponse {
    pub status: &'static str,
    pub message: String,
    pub proxy_addr: String,
    pub action_taken: String,
    pub pool_impact: PoolImpact,
}

#[derive(Debug, Serialize)]
pub struct RpcStatusResponse {
    pub status: &'static str,
    pub stats: PoolStats,
    pub market_status: String,
    pub service_mode: Mode,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub market: Market,
    pub mode: Mode,
    pub market_status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub mode: Mode,
    pub results: BTreeMap<String, BatchItem>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub market: Market,
    pub mode: Mode,
    pub config: PoolConfig,
}

#[derive(Debug, Serialize)]
pub struct HailiangConfigResponse {
    pub api_url: String,
    pub enabled: bool,
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HailiangTestResponse {
    pub status: &'static str,
    pub message: String,
    pub proxy_count: usize,
    pub sample_proxies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn market_mode_defaults_and_canonicalization() {
        let q = MarketModeQuery::default();
        assert_eq!(q.resolve().unwrap(), (Market::Hk, Mode::Live));

        let q = MarketModeQuery { market: Some("Us".into()), mode: Some("BACKFILL".into()) };
        assert_eq!(q.resolve().unwrap(), (Market::Us, Mode::Backfill));

        let q = MarketModeQuery { market: Some("jp".into()), mode: None };
        assert_eq!(q.resolve().unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dates_default_to_market_today() {
        // 2026-10-15 23:30 UTC is already the 16th in Hong Kong.
        let now = DateTime::parse_from_rfc3339("2026-10-15T23:30:00Z").unwrap().with_timezone(&Utc);
        assert_eq!(parse_date(None, Market::Hk, now).unwrap(), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        assert_eq!(parse_date(None, Market::Us, now).unwrap(), NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert!(parse_date(Some("15/10/2026"), Market::Us, now).is_err());
    }

    #[test]
    fn empty_body_reads_as_empty_object() {
        let req: HailiangTestRequest = parse_body(&Bytes::from_static(b"  ")).unwrap();
        assert!(req.api_url.is_none());
        assert!(parse_body::<RpcRequest>(&Bytes::from_static(b"{\"nope\":1}")).is_err());
    }
}
