//! # Utilities Module
//!
//! Small helpers shared by the engine and the HTTP layer.

#![forbid(unsafe_code)]

/// Time formatting, rounding and id helpers.
pub mod timefmt;

pub use timefmt::{format_duration, new_request_id, percent, round2};
