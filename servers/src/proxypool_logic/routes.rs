//! Pool lifecycle routes and the RPC dispatcher.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use lib_proxypool::core::{PoolError, PoolSlot, ProxyPool};
use lib_proxypool::{Market, Mode};
use tracing::info;

use crate::proxypool_logic::error::{ApiError, ApiResult};
use crate::proxypool_logic::model::{
    GetProxyResponse, MarketInfo, MarketModeQuery, PingResponse, PoolImpact, PoolInfo, ReportFailureResponse,
    RpcRequest, RpcStatusResponse, StartResponse, StatusResponse, StopResponse, parse_body, parse_proxy_type,
};
use crate::proxypool_logic::state::AppState;

/// Clock state plus day type, or `unknown` when the calendar cannot answer.
pub fn market_status(state: &AppState, market: Market) -> String {
    state
        .calendar
        .market_status(market, state.clock.now())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn pool_label(market: Market, mode: Mode) -> String {
    format!("{market} {mode} proxy pool")
}

pub async fn get_status(
    State(state): State<AppState>,
    Query(q): Query<MarketModeQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let (market, mode) = q.resolve()?;
    let stats = state.manager.pool(market, mode).await.stats().await;
    Ok(Json(StatusResponse {
        status: if stats.running { "running" } else { "stopped" },
        running: stats.running,
        market,
        mode,
        market_status: market_status(&state, market),
        stats,
    }))
}

/// Starts one pool. Vendor failures come back as `status: error`, not an HTTP error.
pub async fn start_pool(state: &AppState, market: Market, mode: Mode) -> ApiResult<StartResponse> {
    let config = state.registry.get(market, mode).await?;
    let label = pool_label(market, mode);
    let response = match state.manager.start(config.clone()).await {
        Ok(started_at) => StartResponse {
            status: "started",
            market,
            mode,
            started_at: Some(started_at),
            config,
            message: format!("{label} started"),
            error_code: None,
        },
        Err(PoolError::AlreadyRunning { .. }) => StartResponse {
            status: "already_running",
            market,
            mode,
            started_at: state.manager.pool(market, mode).await.stats().await.started_at,
            config,
            message: format!("{label} is already running"),
            error_code: None,
        },
        Err(err) => StartResponse {
            status: "error",
            market,
            mode,
            started_at: None,
            config,
            message: format!("failed to start {label}: {err}"),
            error_code: Some(err.error_code()),
        },
    };
    Ok(response)
}

pub async fn stop_pool(state: &AppState, market: Market, mode: Mode) -> StopResponse {
    let label = pool_label(market, mode);
    match state.manager.stop(market, mode).await {
        Ok(final_stats) => StopResponse {
            status: "stopped",
            market,
            mode,
            final_stats: Some(final_stats),
            stopped_at: Some(state.clock.now()),
            message: format!("{label} stopped"),
            error_code: None,
        },
        Err(PoolError::AlreadyStopped { .. }) => StopResponse {
            status: "already_stopped",
            market,
            mode,
            final_stats: None,
            stopped_at: None,
            message: format!("{label} is already stopped"),
            error_code: None,
        },
        Err(err) => StopResponse {
            status: "error",
            market,
            mode,
            final_stats: None,
            stopped_at: None,
            message: format!("failed to stop {label}: {err}"),
            error_code: Some(err.error_code()),
        },
    }
}

pub async fn start(State(state): State<AppState>, Query(q): Query<MarketModeQuery>) -> ApiResult<Json<StartResponse>> {
    let (market, mode) = q.resolve()?;
    let response = start_pool(&state, market, mode).await?;
    info!(market = %market, mode = %mode, status = response.status, "start requested");
    Ok(Json(response))
}

pub async fn stop(State(state): State<AppState>, Query(q): Query<MarketModeQuery>) -> ApiResult<Json<StopResponse>> {
    let (market, mode) = q.resolve()?;
    let response = stop_pool(&state, market, mode).await;
    info!(market = %market, mode = %mode, status = response.status, "stop requested");
    Ok(Json(response))
}

pub async fn rpc(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<serde_json::Value>> {
    let req: RpcRequest = parse_body(&body)?;
    let (market, mode) = MarketModeQuery { market: req.market.clone(), mode: req.mode.clone() }.resolve()?;
    let pool = state.manager.pool(market, mode).await;

    let value = match req.event.trim() {
        "get_proxy" => to_value(get_proxy(&state, &pool, req.proxy_type.as_deref()).await?)?,
        "report_failure" => {
            let addr = req
                .proxy_addr
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .ok_or_else(|| ApiError::validation("proxy_addr is required for report_failure"))?;
            let report = pool.report_failure(addr).await;
            to_value(ReportFailureResponse {
                status: "ok",
                message: format!("failure of {addr} recorded, proxy {}", report.action_taken.replace('_', " ")),
                proxy_addr: addr.to_string(),
                action_taken: report.action_taken,
                pool_impact: PoolImpact { affected_pool: report.affected_pool, remaining_size: report.remaining_size },
            })?
        }
        "get_status" => to_value(RpcStatusResponse {
            status: "ok",
            stats: pool.stats().await,
            market_status: market_status(&state, market),
            service_mode: mode,
        })?,
        "ping" => to_value(PingResponse {
            status: "ok",
            message: "pong",
            market,
            mode,
            market_status: market_status(&state, market),
        })?,
        other => return Err(ApiError::validation(format!("unknown rpc event '{other}'"))),
    };
    Ok(Json(value))
}

async fn get_proxy(state: &AppState, pool: &ProxyPool, proxy_type: Option<&str>) -> ApiResult<GetProxyResponse> {
    let market = pool.market();
    let proxy_type = match parse_proxy_type(proxy_type)? {
        Some(pt) => pt,
        None => pool.config().await.proxy_type,
    };
    let market_info = MarketInfo {
        market,
        is_trading_time: state.calendar.is_market_open(market, state.clock.now()).unwrap_or(false),
        market_status: market_status(state, market),
    };

    let response = match pool.get(proxy_type).await {
        Ok(lease) => GetProxyResponse {
            status: "ok",
            proxy: Some(lease.address),
            pool_info: PoolInfo {
                active_pool: Some(lease.active_pool),
                pool_size: lease.pool_size,
                proxy_age_seconds: Some(lease.proxy_age_seconds),
            },
            market_info,
            error_code: None,
            message: None,
        },
        Err(err @ PoolError::PoolEmpty { .. }) => {
            let stats = pool.stats().await;
            let pool_size = match stats.active_pool {
                Some(PoolSlot::A) => stats.pool_a_size,
                Some(PoolSlot::B) => stats.pool_b_size,
                None => 0,
            };
            GetProxyResponse {
                status: "error",
                proxy: None,
                pool_info: PoolInfo { active_pool: stats.active_pool, pool_size, proxy_age_seconds: None },
                market_info,
                error_code: Some(err.error_code()),
                message: Some(err.to_string()),
            }
        }
        Err(err) => return Err(err.into()),
    };
    Ok(response)
}

fn to_value<T: serde::Serialize>(value: T) -> ApiResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ApiError {
        status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        detail: format!("failed to encode response: {e}"),
        error_code: None,
    })
}
