//! # Market and Mode Codes
//!
//! The single canonicalization point for market and mode identifiers. Requests may
//! carry `cn`, `CN` or ` Cn `; all of them parse to `Market::Cn`. Response bodies
//! always carry the uppercase code.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Failure to parse a market or mode code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodeParseError {
    #[error("unsupported market '{0}', expected one of cn, hk, us")]
    Market(String),
    #[error("unsupported mode '{0}', expected live or backfill")]
    Mode(String),
}

/// A supported exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Market {
    /// Shanghai / Shenzhen.
    Cn,
    /// Hong Kong.
    Hk,
    /// New York.
    Us,
}

impl Market {
    /// All supported markets in display order.
    pub const ALL: [Market; 3] = [Market::Cn, Market::Hk, Market::Us];

    /// Lowercase code, used in hostnames and storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Cn => "cn",
            Market::Hk => "hk",
            Market::Us => "us",
        }
    }

    /// Uppercase code as it appears in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Market::Cn => "CN",
            Market::Hk => "HK",
            Market::Us => "US",
        }
    }

    /// IANA timezone of the exchange.
    pub fn timezone(&self) -> Tz {
        match self {
            Market::Cn => chrono_tz::Asia::Shanghai,
            Market::Hk => chrono_tz::Asia::Hong_Kong,
            Market::Us => chrono_tz::America::New_York,
        }
    }

    /// Converts a UTC instant to exchange local time.
    pub fn local_time(&self, at: DateTime<Utc>) -> DateTime<Tz> {
        at.with_timezone(&self.timezone())
    }

    /// Parses a comma separated list such as `cn,HK, us`.
    pub fn parse_list(raw: &str) -> Result<Vec<Market>, CodeParseError> {
        let mut out = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let market = part.parse::<Market>()?;
            if !out.contains(&market) {
                out.push(market);
            }
        }
        Ok(out)
    }
}

impl FromStr for Market {
    type Err = CodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cn" => Ok(Market::Cn),
            "hk" => Ok(Market::Hk),
            "us" => Ok(Market::Us),
            _ => Err(CodeParseError::Market(s.to_string())),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for Market {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Market {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Operating mode of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Mode {
    /// Real-time collection during market hours.
    #[default]
    Live,
    /// Historical catch-up after the session.
    Backfill,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Live, Mode::Backfill];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Backfill => "backfill",
        }
    }
}

impl FromStr for Mode {
    type Err = CodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Mode::Live),
            "backfill" => Ok(Mode::Backfill),
            _ => Err(CodeParseError::Mode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Mode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
