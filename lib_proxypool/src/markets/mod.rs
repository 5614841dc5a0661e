//! # Markets Module
//!
//! Everything the engine knows about the three supported exchanges: their codes,
//! timezones, session hours and the trading calendar that classifies a given day.
//!
//! ## Contained Modules:
//!
//! - **`market`**: `Market` and `Mode`, the normalized keys used across the engine.
//!   Market codes are accepted in any case and rendered uppercase.
//! - **`calendar`**: the trading calendar resolver. It turns (market, date) into a
//!   `TradingDayDescriptor` by consulting a pluggable `CalendarSource`.
//! - **`clock`**: a small `Clock` abstraction so the scheduler and the pools can run
//!   against a controllable time source in tests.

#![forbid(unsafe_code)]

/// Trading calendar resolver and calendar sources.
pub mod calendar;
/// Wall-clock abstraction.
pub mod clock;
/// Market and mode codes.
pub mod market;

pub use calendar::{
    CalendarEntry, CalendarError, CalendarSource, DataSource, StaticCalendar, TradingCalendar,
    TradingDayDescriptor, TradingDayType, TradingHours, TradingSessionType,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use market::{CodeParseError, Market, Mode};
