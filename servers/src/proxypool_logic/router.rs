//! Route table of the proxy pool service.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::proxypool_logic::state::AppState;
use crate::proxypool_logic::{admin, enhanced, routes};

/// Every route, nested under `prefix` (already normalized, may be empty).
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let api = Router::new()
        .route("/status", get(routes::get_status))
        .route("/start", post(routes::start))
        .route("/stop", post(routes::stop))
        .route("/rpc", post(routes::rpc))
        .route("/batch/start", post(admin::batch_start))
        .route("/batch/stop", post(admin::batch_stop))
        .route("/config", get(admin::get_config).post(admin::update_config))
        .route("/hailiang/config", get(admin::get_hailiang_config).post(admin::update_hailiang_config))
        .route("/hailiang/test", post(admin::test_hailiang))
        .route("/health", get(admin::health))
        .route("/metrics", get(admin::metrics))
        .route("/alerts", get(admin::alerts))
        .route("/enhanced/trading-day/{market}", get(enhanced::trading_day))
        .route("/enhanced/trading-day/{market}/status", get(enhanced::trading_day_status))
        .route("/enhanced/trading-modes/summary", get(enhanced::trading_modes_summary))
        .route("/enhanced/scheduler/status", get(enhanced::scheduler_status))
        .route("/enhanced/scheduler/{market}/force-start", post(enhanced::force_start))
        .route("/enhanced/scheduler/{market}/force-stop", post(enhanced::force_stop));

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    // axum refuses to nest at the root.
    let app = if prefix.is_empty() { api } else { Router::new().nest(prefix, api) };
    app.layer(cors).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, TimeZone, Utc};
    use lib_proxypool::configs::{MemoryConfigStore, PoolConfig};
    use lib_proxypool::core::PoolTuning;
    use lib_proxypool::markets::{ManualClock, StaticCalendar, TradingCalendar};
    use lib_proxypool::retrieve::{ProxyFetcher, VendorError};
    use lib_proxypool::Market;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::proxypool_logic::state::StateParts;

    /// Hands out sequential addresses, except for HK whose vendor is down.
    #[derive(Default)]
    struct ScriptedFetcher {
        served: AtomicU64,
    }

    #[async_trait]
    impl ProxyFetcher for ScriptedFetcher {
        async fn fetch(&self, config: &PoolConfig, count: usize) -> Result<Vec<String>, VendorError> {
            if config.market == Market::Hk {
                return Err(VendorError::Status(503));
            }
            Ok((0..count)
                .map(|_| {
                    let n = self.served.fetch_add(1, Ordering::Relaxed);
                    format!("10.1.{}.{}:8080", n / 250, n % 250)
                })
                .collect())
        }
    }

    // Wednesday, 10:00 in Shanghai.
    fn trading_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 2, 0, 0).unwrap()
    }

    fn test_state(calendar: StaticCalendar) -> AppState {
        AppState::assemble(StateParts {
            fetcher: Arc::new(ScriptedFetcher::default()),
            store: Arc::new(MemoryConfigStore::new()),
            calendar: TradingCalendar::new(Arc::new(calendar), false),
            clock: Arc::new(ManualClock::new(trading_morning())),
            markets: vec![Market::Cn, Market::Hk, Market::Us],
            tuning: PoolTuning {
                sweep_interval: Duration::from_secs(3600),
                fetch_retries: 0,
                backoff_base: Duration::from_millis(1),
                backoff_max: Duration::from_millis(1),
            },
            health_check: None,
            default_hailiang_url: None,
        })
    }

    fn app() -> Router {
        build_router(test_state(StaticCalendar::builtin()), "/api/v1")
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    #[tokio::test]
    async fn batch_start_isolates_failing_markets() {
        let app = app();
        let (status, body) =
            call(&app, "POST", "/api/v1/batch/start", Some(json!({"markets": ["cn", "hk", "jp"], "mode": "live"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "live");
        assert_eq!(body["results"]["CN"]["status"], "started");
        assert_eq!(body["results"]["HK"]["status"], "error");
        assert_eq!(body["results"]["JP"]["status"], "error");

        let (_, again) = call(&app, "POST", "/api/v1/batch/start", Some(json!({"markets": ["CN"]}))).await;
        assert_eq!(again["results"]["CN"]["status"], "already_running");

        let (_, stopped) = call(&app, "POST", "/api/v1/batch/stop", Some(json!({"markets": ["cn", "us"]}))).await;
        assert_eq!(stopped["results"]["CN"]["status"], "stopped");
        assert_eq!(stopped["results"]["US"]["status"], "already_stopped");
    }

    #[tokio::test]
    async fn batch_without_markets_is_rejected() {
        let (status, body) = call(&app(), "POST", "/api/v1/batch/start", Some(json!({"markets": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
        assert_eq!(body["status_code"], 400);
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn start_reports_vendor_failure_in_body() {
        let (status, body) = call(&app(), "POST", "/api/v1/start?market=hk", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_code"], "VENDOR_UNAVAILABLE");
        assert_eq!(body["market"], "HK");
    }

    #[tokio::test]
    async fn config_update_round_trips() {
        let app = app();
        let (status, body) =
            call(&app, "POST", "/api/v1/config?market=us&mode=backfill", Some(json!({"target_size": 120}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["config"]["target_size"], 120);

        let (_, read) = call(&app, "GET", "/api/v1/config?market=US&mode=backfill", None).await;
        assert_eq!(read["config"]["target_size"], 120);
        assert_eq!(read["mode"], "backfill");
        assert!(read.get("status").is_none());

        let (status, bad) = call(&app, "POST", "/api/v1/config?market=us", Some(json!({"batch_size": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(bad["error_code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn hailiang_settings_are_stored_per_pool() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/hailiang/config?market=cn",
            Some(json!({"api_url": " http://vendor.example.com/get ", "enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["api_url"], "http://vendor.example.com/get");
        assert_eq!(body["enabled"], true);

        let (_, other) = call(&app, "GET", "/api/v1/hailiang/config?market=us", None).await;
        assert_eq!(other["enabled"], false);

        let (status, _) = call(&app, "POST", "/api/v1/hailiang/test", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(&app, "POST", "/api/v1/hailiang/test", Some(json!({"api_url": "http://127.0.0.1:1/get"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error_code"], "VENDOR_UNAVAILABLE");
    }

    #[tokio::test]
    async fn rpc_serves_and_tracks_failures() {
        let app = app();
        let (_, started) = call(&app, "POST", "/api/v1/start?market=cn", None).await;
        assert_eq!(started["status"], "started");

        let (status, lease) = call(&app, "POST", "/api/v1/rpc", Some(json!({"event": "get_proxy", "market": "cn"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lease["status"], "ok");
        assert_eq!(lease["pool_info"]["active_pool"], "A");
        assert_eq!(lease["market_info"]["is_trading_time"], true);
        let addr = lease["proxy"].as_str().unwrap().to_string();

        let (_, report) = call(
            &app,
            "POST",
            "/api/v1/rpc",
            Some(json!({"event": "report_failure", "proxy_addr": addr, "market": "cn"})),
        )
        .await;
        assert_eq!(report["status"], "ok");
        assert_eq!(report["proxy_addr"], addr.as_str());
        assert!(report["message"].as_str().unwrap().contains(&addr));
        assert_eq!(report["action_taken"], "marked_failed");
        assert_eq!(report["pool_impact"]["affected_pool"], "A");

        let (_, rpc_status) =
            call(&app, "POST", "/api/v1/rpc", Some(json!({"event": "get_status", "market": "cn"}))).await;
        assert_eq!(rpc_status["status"], "ok");
        assert_eq!(rpc_status["stats"]["running"], true);

        let (_, pong) = call(&app, "POST", "/api/v1/rpc", Some(json!({"event": "ping", "market": "cn"}))).await;
        assert_eq!(pong["status"], "ok");
        assert_eq!(pong["message"], "pong");
        assert_eq!(pong["mode"], "live");

        let (status, _) = call(&app, "POST", "/api/v1/rpc", Some(json!({"event": "teleport"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            call(&app, "POST", "/api/v1/rpc", Some(json!({"event": "report_failure", "market": "cn"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_follows_the_pool_lifecycle() {
        let app = app();
        let (status, idle) = call(&app, "GET", "/api/v1/status?market=cn", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(idle["status"], "stopped");
        assert_eq!(idle["running"], false);

        call(&app, "POST", "/api/v1/start?market=cn", None).await;
        let (_, live) = call(&app, "GET", "/api/v1/status?market=cn", None).await;
        assert_eq!(live["status"], "running");

        let (_, stopped) = call(&app, "POST", "/api/v1/stop?market=cn", None).await;
        assert_eq!(stopped["status"], "stopped");
        assert!(stopped["stopped_at"].is_string());
        assert!(stopped["final_stats"].is_object());

        let (_, again) = call(&app, "POST", "/api/v1/stop?market=cn", None).await;
        assert_eq!(again["status"], "already_stopped");
        assert!(again.get("stopped_at").is_none());

        let (_, after) = call(&app, "GET", "/api/v1/status?market=cn", None).await;
        assert_eq!(after["status"], "stopped");
    }

    #[tokio::test]
    async fn empty_pool_answers_with_error_status() {
        let (status, body) = call(&app(), "POST", "/api/v1/rpc", Some(json!({"event": "get_proxy", "market": "us"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error_code"], "POOL_EMPTY");
        assert!(body["proxy"].is_null());
    }

    #[tokio::test]
    async fn unknown_market_is_a_validation_error() {
        let (status, body) = call(&app(), "GET", "/api/v1/status?market=jp", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "VALIDATION_ERROR");

        let (status, _) = call(&app(), "GET", "/api/v1/status?mode=replay", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn uncovered_calendar_year_is_unavailable() {
        let app = build_router(test_state(StaticCalendar::builtin().with_covered_years([2026])), "/api/v1");
        let (status, body) = call(&app, "GET", "/api/v1/enhanced/trading-day/cn?date=2031-03-04", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error_code"], "CALENDAR_UNAVAILABLE");

        let (status, day) = call(&app, "GET", "/api/v1/enhanced/trading-day/cn?date=2026-03-04", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(day["is_trading_day"], true);

        let (status, _) = call(&app, "GET", "/api/v1/enhanced/trading-day/cn?date=04-03-2026", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn trading_day_status_exposes_decision() {
        let (status, body) = call(&app(), "GET", "/api/v1/enhanced/trading-day/cn/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["market"], "CN");
        assert_eq!(body["is_market_open"], true);
        assert_eq!(body["should_start_session"], true);
        assert_eq!(body["should_stop_session"], false);
    }

    #[tokio::test]
    async fn force_start_then_scheduler_status() {
        let app = app();
        let (_, forced) = call(&app, "POST", "/api/v1/enhanced/scheduler/cn/force-start", None).await;
        assert_eq!(forced["status"], "started");
        assert!(forced["trading_info"].is_object());

        let (_, status) = call(&app, "GET", "/api/v1/enhanced/scheduler/status", None).await;
        assert_eq!(status["enhanced_features"], true);
        assert_eq!(status["markets"]["cn"]["running"], true);
        assert_eq!(status["markets"]["us"]["running"], false);
        assert!(status["markets"].get("CN").is_none());

        let (_, summary) = call(&app, "GET", "/api/v1/enhanced/trading-modes/summary", None).await;
        assert_eq!(summary["markets"]["hk"]["is_trading_day"], true);

        let (_, stopped) = call(&app, "POST", "/api/v1/enhanced/scheduler/cn/force-stop", None).await;
        assert_eq!(stopped["status"], "stopped");
    }

    #[tokio::test]
    async fn health_moves_from_idle_to_partial() {
        let app = app();
        let (_, idle) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(idle["status"], "idle");
        assert_eq!(idle["total_pools"], 6);

        call(&app, "POST", "/api/v1/start?market=cn", None).await;
        let (_, partial) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(partial["status"], "partial");
        assert_eq!(partial["running_pools"], 1);
        assert_eq!(partial["proxy_pools"]["cn_live"]["running"], true);

        let (status, metrics) = call(&app, "GET", "/api/v1/metrics?market=cn", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metrics["stats"]["running"], true);
        assert!(metrics["health_issues"].is_array());

        let (_, alerts) = call(&app, "GET", "/api/v1/alerts?limit=5", None).await;
        assert!(alerts["alerts"].is_array());
        assert!(alerts["summary"]["total_alerts"].is_number());
    }

    #[tokio::test]
    async fn empty_prefix_serves_at_root() {
        let app = build_router(test_state(StaticCalendar::builtin()), "");
        let (status, body) = call(&app, "GET", "/status?market=cn", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
    }
}
