//! # Trading Calendar Resolver
//!
//! Classifies a (market, date) pair into a `TradingDayDescriptor`: day type,
//! session type, trading hours and a human readable description.
//!
//! The lookup order is fixed: explicit holiday list, then weekend, then half-day
//! list, else a normal trading day. The lists themselves come from a
//! `CalendarSource`; the built-in `StaticCalendar` carries the recurring half days
//! and can be replaced or extended from a JSON calendar file.
//!
//! A source that cannot answer for a date returns `CalendarError::Unavailable`. The
//! resolver either propagates it or, when built with `fail_open`, assumes a normal
//! full trading day and marks the descriptor's data source as `fallback`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::warn;

use crate::markets::market::Market;

/// Calendar lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("trading calendar has no data for {market} on {date}")]
    Unavailable { market: Market, date: NaiveDate },
    #[error("failed to load trading calendar from {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Day classification. Uppercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingDayType {
    Normal,
    HalfDay,
    Holiday,
    Weekend,
}

/// Which part of the day trades. Lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingSessionType {
    FullDay,
    MorningOnly,
    AfternoonOnly,
}

/// Which authority produced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Built-in market clock rules.
    Macl,
    /// A curated calendar data file.
    CalendarApi,
    /// The source failed and the resolver assumed a normal day.
    Fallback,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn minutes_of(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

/// Session boundaries in exchange local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub lunch_break: Option<(NaiveTime, NaiveTime)>,
}

impl TradingHours {
    /// Hours for a market and session. Half-day sessions never carry a lunch break.
    pub fn for_session(market: Market, session: TradingSessionType) -> Self {
        let (start, end, lunch_break) = match (market, session) {
            (Market::Cn, TradingSessionType::FullDay) => (hm(9, 30), hm(15, 0), Some((hm(11, 30), hm(13, 0)))),
            (Market::Hk, TradingSessionType::FullDay) => (hm(9, 30), hm(16, 0), Some((hm(12, 0), hm(13, 0)))),
            (Market::Us, TradingSessionType::FullDay) => (hm(9, 30), hm(16, 0), None),
            (Market::Cn, TradingSessionType::MorningOnly) => (hm(9, 30), hm(11, 30), None),
            (Market::Hk, TradingSessionType::MorningOnly) => (hm(9, 30), hm(12, 0), None),
            (Market::Us, TradingSessionType::MorningOnly) => (hm(9, 30), hm(13, 0), None),
            (Market::Cn, TradingSessionType::AfternoonOnly) => (hm(13, 0), hm(15, 0), None),
            (Market::Hk, TradingSessionType::AfternoonOnly) => (hm(13, 0), hm(16, 0), None),
            (Market::Us, TradingSessionType::AfternoonOnly) => (hm(13, 0), hm(16, 0), None),
        };
        Self { start, end, lunch_break }
    }

    /// Minutes since local midnight at which the session opens.
    pub fn start_minutes(&self) -> i64 {
        minutes_of(self.start)
    }

    /// Minutes since local midnight at which the session closes.
    pub fn end_minutes(&self) -> i64 {
        minutes_of(self.end)
    }

    /// True strictly inside the lunch break.
    pub fn is_lunch_at(&self, t: NaiveTime) -> bool {
        let m = minutes_of(t);
        self.lunch_break
            .map(|(ls, le)| m > minutes_of(ls) && m < minutes_of(le))
            .unwrap_or(false)
    }

    /// True when the session is open at `t`, both boundaries inclusive.
    pub fn is_open_at(&self, t: NaiveTime) -> bool {
        let m = minutes_of(t);
        m >= self.start_minutes() && m <= self.end_minutes() && !self.is_lunch_at(t)
    }
}

impl Serialize for TradingHours {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("TradingHours", 3)?;
        st.serialize_field("start", &self.start.format("%H:%M").to_string())?;
        st.serialize_field("end", &self.end.format("%H:%M").to_string())?;
        let lunch = self
            .lunch_break
            .map(|(s, e)| [s.format("%H:%M").to_string(), e.format("%H:%M").to_string()]);
        st.serialize_field("lunch_break", &lunch)?;
        st.end()
    }
}

/// Resolved classification of one market day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradingDayDescriptor {
    pub market: Market,
    pub date: NaiveDate,
    pub day_type: TradingDayType,
    pub session_type: TradingSessionType,
    pub is_trading_day: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trading_hours: Option<TradingHours>,
    pub status_description: String,
    pub data_source: DataSource,
}

impl TradingDayDescriptor {
    /// Clock-state text for a local time on this day, e.g. `lunch break (12:15)`.
    pub fn clock_state(&self, local: NaiveTime) -> String {
        let hhmm = local.format("%H:%M");
        match &self.trading_hours {
            Some(hours) if hours.is_open_at(local) => format!("market open ({hhmm})"),
            Some(hours) if hours.is_lunch_at(local) => format!("lunch break ({hhmm})"),
            _ => format!("closed ({hhmm})"),
        }
    }
}

/// What a calendar source knows about a single day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalendarEntry {
    pub holiday: bool,
    pub half_day: Option<TradingSessionType>,
}

/// External calendar authority.
pub trait CalendarSource: Send + Sync {
    fn name(&self) -> DataSource;
    fn lookup(&self, market: Market, date: NaiveDate) -> Result<CalendarEntry, CalendarError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DaySpec {
    Exact(NaiveDate),
    Recurring(u32, u32),
}

impl DaySpec {
    fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Ok(DaySpec::Exact(date));
        }
        let mut parts = raw.split('-');
        if let (Some(m), Some(d), None) = (parts.next(), parts.next(), parts.next()) {
            if let (Ok(m), Ok(d)) = (m.parse::<u32>(), d.parse::<u32>()) {
                // 2000 is a leap year, so 02-29 is accepted as a recurring day.
                if NaiveDate::from_ymd_opt(2000, m, d).is_some() {
                    return Ok(DaySpec::Recurring(m, d));
                }
            }
        }
        Err(format!("invalid calendar date '{raw}', expected YYYY-MM-DD or MM-DD"))
    }
}

#[derive(Debug, Clone, Default)]
struct MarketDays {
    holidays: HashSet<DaySpec>,
    half_days: HashMap<DaySpec, TradingSessionType>,
}

impl MarketDays {
    fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&DaySpec::Exact(date))
            || self.holidays.contains(&DaySpec::Recurring(date.month(), date.day()))
    }

    fn half_day(&self, date: NaiveDate) -> Option<TradingSessionType> {
        self.half_days
            .get(&DaySpec::Exact(date))
            .or_else(|| self.half_days.get(&DaySpec::Recurring(date.month(), date.day())))
            .copied()
    }
}

#[derive(Debug, Deserialize)]
struct CalendarFile {
    #[serde(default)]
    covered_years: Option<Vec<i32>>,
    #[serde(default)]
    markets: HashMap<String, MarketFile>,
}

#[derive(Debug, Deserialize)]
struct MarketFile {
    #[serde(default)]
    holidays: Vec<String>,
    #[serde(default)]
    half_days: Vec<HalfDayFile>,
}

#[derive(Debug, Deserialize)]
struct HalfDayFile {
    date: String,
    #[serde(default = "default_half_session")]
    session: TradingSessionType,
}

fn default_half_session() -> TradingSessionType {
    TradingSessionType::MorningOnly
}

/// In-process calendar built from recurring defaults and an optional data file.
#[derive(Debug, Clone)]
pub struct StaticCalendar {
    source: DataSource,
    covered_years: Option<BTreeSet<i32>>,
    markets: HashMap<Market, MarketDays>,
}

impl Default for StaticCalendar {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StaticCalendar {
    /// Recurring half days only: HK 12-24 and 12-31, US 11-29 and 12-24.
    pub fn builtin() -> Self {
        let mut markets: HashMap<Market, MarketDays> = HashMap::new();
        for market in Market::ALL {
            markets.insert(market, MarketDays::default());
        }
        let recurring = [
            (Market::Hk, 12, 24),
            (Market::Hk, 12, 31),
            (Market::Us, 11, 29),
            (Market::Us, 12, 24),
        ];
        for (market, month, day) in recurring {
            markets
                .entry(market)
                .or_default()
                .half_days
                .insert(DaySpec::Recurring(month, day), TradingSessionType::MorningOnly);
        }
        Self { source: DataSource::Macl, covered_years: None, markets }
    }

    /// Builds a calendar from JSON. Markets named in the document replace the
    /// built-in lists; the others keep them.
    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self, CalendarError> {
        let load_err = |reason: String| CalendarError::Load { path: origin.to_string(), reason };
        let file: CalendarFile = serde_json::from_str(raw).map_err(|e| load_err(e.to_string()))?;

        let mut calendar = Self::builtin();
        calendar.source = DataSource::CalendarApi;
        calendar.covered_years = file.covered_years.map(|years| years.into_iter().collect());

        for (code, days) in file.markets {
            let market: Market = code.parse().map_err(|e: crate::markets::market::CodeParseError| load_err(e.to_string()))?;
            let mut parsed = MarketDays::default();
            for raw_day in &days.holidays {
                parsed.holidays.insert(DaySpec::parse(raw_day).map_err(load_err)?);
            }
            for half in &days.half_days {
                parsed.half_days.insert(DaySpec::parse(&half.date).map_err(load_err)?, half.session);
            }
            calendar.markets.insert(market, parsed);
        }
        Ok(calendar)
    }

    /// Reads a JSON calendar file.
    pub fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let raw = fs::read_to_string(path).map_err(|e| CalendarError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw, &path.display().to_string())
    }

    pub fn with_holiday(mut self, market: Market, date: NaiveDate) -> Self {
        self.markets.entry(market).or_default().holidays.insert(DaySpec::Exact(date));
        self
    }

    pub fn with_half_day(mut self, market: Market, date: NaiveDate, session: TradingSessionType) -> Self {
        self.markets
            .entry(market)
            .or_default()
            .half_days
            .insert(DaySpec::Exact(date), session);
        self
    }

    pub fn with_covered_years(mut self, years: impl IntoIterator<Item = i32>) -> Self {
        self.covered_years = Some(years.into_iter().collect());
        self
    }
}

impl CalendarSource for StaticCalendar {
    fn name(&self) -> DataSource {
        self.source
    }

    fn lookup(&self, market: Market, date: NaiveDate) -> Result<CalendarEntry, CalendarError> {
        if let Some(years) = &self.covered_years {
            if !years.contains(&date.year()) {
                return Err(CalendarError::Unavailable { market, date });
            }
        }
        let Some(days) = self.markets.get(&market) else {
            return Ok(CalendarEntry::default());
        };
        Ok(CalendarEntry { holiday: days.is_holiday(date), half_day: days.half_day(date) })
    }
}

fn day_description(day_type: TradingDayType, session: TradingSessionType) -> &'static str {
    match (day_type, session) {
        (TradingDayType::Normal, _) => "normal trading day",
        (TradingDayType::HalfDay, TradingSessionType::AfternoonOnly) => "half-day trading (afternoon only)",
        (TradingDayType::HalfDay, _) => "half-day trading (morning only)",
        (TradingDayType::Holiday, _) => "holiday",
        (TradingDayType::Weekend, _) => "weekend",
    }
}

/// The resolver consulted by the scheduler and the status endpoints.
#[derive(Clone)]
pub struct TradingCalendar {
    source: Arc<dyn CalendarSource>,
    fail_open: bool,
}

impl TradingCalendar {
    pub fn new(source: Arc<dyn CalendarSource>, fail_open: bool) -> Self {
        Self { source, fail_open }
    }

    pub fn fail_open(&self) -> bool {
        self.fail_open
    }

    /// Resolves the descriptor for `date` in the market's own calendar.
    pub fn resolve(&self, market: Market, date: NaiveDate) -> Result<TradingDayDescriptor, CalendarError> {
        match self.source.lookup(market, date) {
            Ok(entry) => Ok(Self::describe(market, date, entry, self.source.name())),
            Err(err) if self.fail_open => {
                warn!(market = %market, %date, error = %err, "calendar unavailable, assuming a normal trading day");
                let mut descriptor = Self::describe(market, date, CalendarEntry::default(), DataSource::Fallback);
                descriptor.status_description = "normal trading day (assumed, calendar unavailable)".to_string();
                Ok(descriptor)
            }
            Err(err) => Err(err),
        }
    }

    /// Descriptor for the market's local "today" at instant `at`.
    pub fn today(&self, market: Market, at: DateTime<Utc>) -> Result<TradingDayDescriptor, CalendarError> {
        self.resolve(market, market.local_time(at).date_naive())
    }

    /// Clock state plus day classification, e.g. `market open (10:05) - normal trading day`.
    pub fn market_status(&self, market: Market, at: DateTime<Utc>) -> Result<String, CalendarError> {
        let descriptor = self.today(market, at)?;
        let local = market.local_time(at).time();
        Ok(format!("{} - {}", descriptor.clock_state(local), descriptor.status_description))
    }

    /// True while the market is inside a trading session at `at`.
    pub fn is_market_open(&self, market: Market, at: DateTime<Utc>) -> Result<bool, CalendarError> {
        let descriptor = self.today(market, at)?;
        let local = market.local_time(at).time();
        Ok(descriptor
            .trading_hours
            .map(|hours| descriptor.is_trading_day && hours.is_open_at(local))
            .unwrap_or(false))
    }

    fn describe(market: Market, date: NaiveDate, entry: CalendarEntry, source: DataSource) -> TradingDayDescriptor {
        let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
        let (day_type, session_type) = if entry.holiday {
            (TradingDayType::Holiday, TradingSessionType::FullDay)
        } else if weekend {
            (TradingDayType::Weekend, TradingSessionType::FullDay)
        } else if let Some(session) = entry.half_day {
            (TradingDayType::HalfDay, session)
        } else {
            (TradingDayType::Normal, TradingSessionType::FullDay)
        };
        let is_trading_day = matches!(day_type, TradingDayType::Normal | TradingDayType::HalfDay);
        let trading_hours = is_trading_day.then(|| TradingHours::for_session(market, session_type));

        TradingDayDescriptor {
            market,
            date,
            day_type,
            session_type,
            is_trading_day,
            trading_hours,
            status_description: day_description(day_type, session_type).to_string(),
            data_source: source,
        }
    }
}
