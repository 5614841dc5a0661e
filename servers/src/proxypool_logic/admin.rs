//! Batch, configuration, vendor and observability routes.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use lib_proxypool::configs::{PoolConfig, PoolConfigUpdate};
use lib_proxypool::core::monitor::{HealthIssue, MAX_ALERTS, assess};
use lib_proxypool::core::{Alert, AlertSummary, PoolStats};
use lib_proxypool::retrieve::VendorError;
use lib_proxypool::{Market, Mode, PoolError};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::proxypool_logic::error::{ApiError, ApiResult};
use crate::proxypool_logic::model::{
    BatchItem, BatchRequest, BatchResponse, ConfigResponse, HailiangConfigRequest, HailiangConfigResponse,
    HailiangTestRequest, HailiangTestResponse, LimitQuery, MarketModeQuery, parse_body, parse_market, parse_mode,
};
use crate::proxypool_logic::routes::{start_pool, stop_pool};
use crate::proxypool_logic::state::AppState;

const DEFAULT_ALERT_LIMIT: usize = 50;
const SAMPLE_PROXIES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOp {
    Start,
    Stop,
}

pub async fn batch_start(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<BatchResponse>> {
    run_batch(state, &body, BatchOp::Start).await.map(Json)
}

pub async fn batch_stop(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<BatchResponse>> {
    run_batch(state, &body, BatchOp::Stop).await.map(Json)
}

/// Fans out one start/stop per market. A failing market never fails its siblings.
async fn run_batch(state: AppState, body: &Bytes, op: BatchOp) -> ApiResult<BatchResponse> {
    let req: BatchRequest = parse_body(body)?;
    let mode = parse_mode(req.mode.as_deref())?;
    let raw: Vec<String> =
        req.markets.iter().map(|m| m.trim().to_string()).filter(|m| !m.is_empty()).collect();
    if raw.is_empty() {
        return Err(ApiError::validation("markets must not be empty"));
    }

    let mut results = BTreeMap::new();
    let mut tasks = JoinSet::new();
    for name in raw {
        let market = match parse_market(&name) {
            Ok(market) => market,
            Err(err) => {
                results.insert(name.to_uppercase(), BatchItem { status: "error".into(), message: err.detail });
                continue;
            }
        };
        let state = state.clone();
        tasks.spawn(async move {
            let item = match op {
                BatchOp::Start => match start_pool(&state, market, mode).await {
                    Ok(resp) => BatchItem { status: resp.status.to_string(), message: resp.message },
                    Err(err) => BatchItem { status: "error".into(), message: err.detail },
                },
                BatchOp::Stop => {
                    let resp = stop_pool(&state, market, mode).await;
                    BatchItem { status: resp.status.to_string(), message: resp.message }
                }
            };
            (market.code().to_string(), item)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((code, item)) => {
                results.insert(code, item);
            }
            Err(err) => warn!(error = %err, "batch task aborted"),
        }
    }
    info!(op = ?op, mode = %mode, markets = results.len(), "batch finished");
    Ok(BatchResponse { mode, results })
}

pub async fn get_config(State(state): State<AppState>, Query(q): Query<MarketModeQuery>) -> ApiResult<Json<ConfigResponse>> {
    let (market, mode) = q.resolve()?;
    let config = state.registry.get(market, mode).await?;
    Ok(Json(ConfigResponse { status: None, message: None, market, mode, config }))
}

pub async fn update_config(
    State(state): State<AppState>,
    Query(q): Query<MarketModeQuery>,
    body: Bytes,
) -> ApiResult<Json<ConfigResponse>> {
    let (market, mode) = q.resolve()?;
    let raw: serde_json::Value = parse_body(&body)?;
    let update = PoolConfigUpdate::from_json(&raw).map_err(PoolError::from)?;
    let config = apply_update(&state, market, mode, &update).await?;
    Ok(Json(ConfigResponse {
        status: Some("success"),
        message: Some(format!("{market} {mode} configuration updated")),
        market,
        mode,
        config,
    }))
}

/// Persists the delta, then pushes the merged record into a live pool if one exists.
async fn apply_update(state: &AppState, market: Market, mode: Mode, update: &PoolConfigUpdate) -> ApiResult<PoolConfig> {
    let config = state.registry.update(market, mode, update).await?;
    state.manager.apply_config(&config).await;
    Ok(config)
}

pub async fn get_hailiang_config(
    State(state): State<AppState>,
    Query(q): Query<MarketModeQuery>,
) -> ApiResult<Json<HailiangConfigResponse>> {
    let (market, mode) = q.resolve()?;
    let config = state.registry.get(market, mode).await?;
    Ok(Json(HailiangConfigResponse {
        api_url: config.hailiang_api_url,
        enabled: config.hailiang_enabled,
        status: "success",
        message: format!("hailiang settings for {market} {mode}"),
    }))
}

pub async fn update_hailiang_config(
    State(state): State<AppState>,
    Query(q): Query<MarketModeQuery>,
    body: Bytes,
) -> ApiResult<Json<HailiangConfigResponse>> {
    let (market, mode) = q.resolve()?;
    let req: HailiangConfigRequest = parse_body(&body)?;
    let update = PoolConfigUpdate {
        hailiang_api_url: req.api_url.map(|u| u.trim().to_string()),
        hailiang_enabled: req.enabled,
        ..PoolConfigUpdate::default()
    };
    let config = apply_update(&state, market, mode, &update).await?;
    info!(market = %market, mode = %mode, enabled = config.hailiang_enabled, "hailiang settings updated");
    Ok(Json(HailiangConfigResponse {
        api_url: config.hailiang_api_url,
        enabled: config.hailiang_enabled,
        status: "success",
        message: format!("hailiang settings for {market} {mode} updated"),
    }))
}

/// One live call against the vendor URL. Nothing is stored.
pub async fn test_hailiang(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<HailiangTestResponse>> {
    let req: HailiangTestRequest = parse_body(&body)?;
    let url = req.api_url.unwrap_or_default();
    let proxies = match state.hailiang.fetch_url(&url).await {
        Ok(proxies) => proxies,
        Err(VendorError::MissingUrl) => return Err(ApiError::validation("api_url is required")),
        Err(err) => return Err(PoolError::from(err).into()),
    };
    let message = if proxies.is_empty() {
        "vendor reachable but returned no proxies".to_string()
    } else {
        format!("vendor returned {} proxies", proxies.len())
    };
    Ok(Json(HailiangTestResponse {
        status: "success",
        message,
        proxy_count: proxies.len(),
        sample_proxies: proxies.into_iter().take(SAMPLE_PROXIES).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PoolHealth {
    pub running: bool,
    pub pool_status: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub proxy_pools: BTreeMap<String, PoolHealth>,
    pub total_pools: usize,
    pub running_pools: usize,
}

/// `healthy` when every live pool runs, `partial` when anything runs, `idle` otherwise.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut proxy_pools = BTreeMap::new();
    let mut live_total = 0;
    let mut live_running = 0;
    for market in state.scheduler.markets() {
        for mode in Mode::ALL {
            let stats = state.manager.pool(*market, mode).await.stats().await;
            if mode == Mode::Live {
                live_total += 1;
                live_running += usize::from(stats.running);
            }
            proxy_pools.insert(
                format!("{}_{}", market.as_str(), mode.as_str()),
                PoolHealth { running: stats.running, pool_status: stats.pool_status },
            );
        }
    }
    let running_pools = proxy_pools.values().filter(|p| p.running).count();
    let status = if live_total > 0 && live_running == live_total {
        "healthy"
    } else if running_pools > 0 {
        "partial"
    } else {
        "idle"
    };
    Json(HealthResponse {
        status,
        timestamp: state.clock.now(),
        total_pools: proxy_pools.len(),
        running_pools,
        proxy_pools,
    })
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub market: Market,
    pub mode: Mode,
    pub timestamp: DateTime<Utc>,
    pub stats: PoolStats,
    pub health_issues: Vec<HealthIssue>,
    pub recent_alerts: Vec<Alert>,
}

pub async fn metrics(State(state): State<AppState>, Query(q): Query<MarketModeQuery>) -> ApiResult<Json<MetricsResponse>> {
    let (market, mode) = q.resolve()?;
    let stats = state.manager.pool(market, mode).await.stats().await;
    let health_issues = assess(&stats, state.monitor.thresholds());
    let recent_alerts = state
        .alerts
        .recent(DEFAULT_ALERT_LIMIT)
        .into_iter()
        .filter(|a| a.market.is_none_or(|m| m == market))
        .collect();
    Ok(Json(MetricsResponse { market, mode, timestamp: state.clock.now(), stats, health_issues, recent_alerts }))
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub summary: AlertSummary,
    pub alerts: Vec<Alert>,
}

pub async fn alerts(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> Json<AlertsResponse> {
    let limit = q.limit.unwrap_or(DEFAULT_ALERT_LIMIT).min(MAX_ALERTS);
    Json(AlertsResponse { summary: state.alerts.summary(), alerts: state.alerts.recent(limit) })
}
