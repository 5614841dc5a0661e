use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use lib_proxypool::PoolError;
use lib_proxypool::configs::{ConfigStoreError, ConfigUpdateError};
use lib_proxypool::utils::new_request_id;
use serde_json::json;
use tracing::{error, warn};

/// Error body shared by every route: `{detail, status_code, timestamp, request_id, error_code}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub error_code: Option<&'static str>,
}

impl ApiError {
    pub fn validation(detail: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.into(), error_code: Some("VALIDATION_ERROR") }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let status = match &err {
            PoolError::Validation(_) => StatusCode::BAD_REQUEST,
            PoolError::AlreadyRunning { .. } | PoolError::AlreadyStopped { .. } => StatusCode::CONFLICT,
            PoolError::PoolEmpty { .. } => StatusCode::NOT_FOUND,
            PoolError::CalendarUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PoolError::VendorUnavailable(_) => StatusCode::BAD_GATEWAY,
            PoolError::ConfigStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, detail: err.to_string(), error_code: Some(err.error_code()) }
    }
}

impl From<ConfigStoreError> for ApiError {
    fn from(err: ConfigStoreError) -> Self {
        PoolError::from(err).into()
    }
}

impl From<ConfigUpdateError> for ApiError {
    fn from(err: ConfigUpdateError) -> Self {
        PoolError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = new_request_id();
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), request_id = %request_id, error_code = ?self.error_code, "{}", self.detail);
        } else {
            warn!(status = self.status.as_u16(), request_id = %request_id, error_code = ?self.error_code, "{}", self.detail);
        }
        let body = json!({
            "detail": self.detail,
            "status_code": self.status.as_u16(),
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": request_id,
            "error_code": self.error_code,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lib_proxypool::markets::CalendarError;
    use lib_proxypool::Market;

    #[test]
    fn pool_errors_map_to_statuses() {
        let date = chrono::NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
        let err: ApiError = PoolError::from(CalendarError::Unavailable { market: Market::Hk, date }).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code, Some("CALENDAR_UNAVAILABLE"));

        let err: ApiError = PoolError::Validation("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
