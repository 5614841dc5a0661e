//! Calendar and scheduler routes under `/enhanced`.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use lib_proxypool::core::{ForceOutcome, SchedulerStatus};
use lib_proxypool::markets::TradingDayDescriptor;
use serde::Serialize;
use tracing::info;

use crate::proxypool_logic::error::ApiResult;
use crate::proxypool_logic::model::{DateQuery, parse_date, parse_market};
use crate::proxypool_logic::state::AppState;

#[derive(Debug, Serialize)]
pub struct TradingDayStatus {
    #[serde(flatten)]
    pub descriptor: TradingDayDescriptor,
    pub current_time: String,
    pub is_market_open: bool,
    pub should_start_session: bool,
    pub should_stop_session: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SummaryEntry {
    Day(TradingDayDescriptor),
    Unavailable { error: String, error_code: &'static str },
}

#[derive(Debug, Serialize)]
pub struct TradingModesSummary {
    pub date: Option<String>,
    pub markets: BTreeMap<String, SummaryEntry>,
}

pub async fn trading_day(
    State(state): State<AppState>,
    Path(market): Path<String>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<TradingDayDescriptor>> {
    let market = parse_market(&market)?;
    let date = parse_date(q.date.as_deref(), market, state.clock.now())?;
    let descriptor = state.calendar.resolve(market, date).map_err(lib_proxypool::PoolError::from)?;
    Ok(Json(descriptor))
}

pub async fn trading_day_status(
    State(state): State<AppState>,
    Path(market): Path<String>,
) -> ApiResult<Json<TradingDayStatus>> {
    let market = parse_market(&market)?;
    let preview = state.scheduler.preview(market).await?;
    Ok(Json(TradingDayStatus {
        descriptor: preview.descriptor,
        current_time: preview.local_time,
        is_market_open: preview.is_market_open,
        should_start_session: preview.decision.should_start,
        should_stop_session: preview.decision.should_stop,
    }))
}

/// One descriptor per configured market. A market the calendar cannot answer gets an
/// error entry instead of failing the whole summary.
pub async fn trading_modes_summary(
    State(state): State<AppState>,
    Query(q): Query<DateQuery>,
) -> ApiResult<Json<TradingModesSummary>> {
    let now = state.clock.now();
    let mut markets = BTreeMap::new();
    for market in state.scheduler.markets() {
        let date = parse_date(q.date.as_deref(), *market, now)?;
        let entry = match state.calendar.resolve(*market, date) {
            Ok(descriptor) => SummaryEntry::Day(descriptor),
            Err(err) => SummaryEntry::Unavailable { error: err.to_string(), error_code: "CALENDAR_UNAVAILABLE" },
        };
        markets.insert(market.as_str().to_string(), entry);
    }
    Ok(Json(TradingModesSummary { date: q.date, markets }))
}

pub async fn scheduler_status(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    Ok(Json(state.scheduler.status().await?))
}

pub async fn force_start(State(state): State<AppState>, Path(market): Path<String>) -> ApiResult<Json<ForceOutcome>> {
    let market = parse_market(&market)?;
    let outcome = state.scheduler.force_start(market).await?;
    info!(market = %market, status = %outcome.status, "force-start requested");
    Ok(Json(outcome))
}

pub async fn force_stop(State(state): State<AppState>, Path(market): Path<String>) -> ApiResult<Json<ForceOutcome>> {
    let market = parse_market(&market)?;
    let outcome = state.scheduler.force_stop(market).await?;
    info!(market = %market, status = %outcome.status, "force-stop requested");
    Ok(Json(outcome))
}
