//! Engine error taxonomy with stable wire codes.

use thiserror::Error;

use crate::configs::pool_config::ConfigValidationError;
use crate::configs::store::{ConfigStoreError, ConfigUpdateError};
use crate::markets::calendar::CalendarError;
use crate::markets::market::{Market, Mode};
use crate::retrieve::fetcher::VendorError;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("{0}")]
    Validation(String),
    #[error("proxy pool {market}/{mode} is already running")]
    AlreadyRunning { market: Market, mode: Mode },
    #[error("proxy pool {market}/{mode} is already stopped")]
    AlreadyStopped { market: Market, mode: Mode },
    #[error("no eligible proxy in the active pool of {market}/{mode}")]
    PoolEmpty { market: Market, mode: Mode },
    #[error(transparent)]
    CalendarUnavailable(#[from] CalendarError),
    #[error("proxy vendor unavailable: {0}")]
    VendorUnavailable(#[from] VendorError),
    #[error(transparent)]
    ConfigStore(#[from] ConfigStoreError),
}

impl PoolError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            PoolError::Validation(_) => "VALIDATION_ERROR",
            PoolError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            PoolError::AlreadyStopped { .. } => "ALREADY_STOPPED",
            PoolError::PoolEmpty { .. } => "POOL_EMPTY",
            PoolError::CalendarUnavailable(_) => "CALENDAR_UNAVAILABLE",
            PoolError::VendorUnavailable(_) => "VENDOR_UNAVAILABLE",
            PoolError::ConfigStore(_) => "CONFIG_STORE_ERROR",
        }
    }
}

impl From<ConfigValidationError> for PoolError {
    fn from(err: ConfigValidationError) -> Self {
        PoolError::Validation(err.to_string())
    }
}

impl From<ConfigUpdateError> for PoolError {
    fn from(err: ConfigUpdateError) -> Self {
        match err {
            ConfigUpdateError::Validation(e) => e.into(),
            ConfigUpdateError::Store(e) => e.into(),
        }
    }
}
