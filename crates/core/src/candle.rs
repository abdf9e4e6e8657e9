//! OHLCV candles and time-and-sales resolutions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl Candle {
    /// Whether the bar opens on a whole minute that is a multiple of `period_minutes`.
    #[must_use]
    pub fn is_aligned(&self, period_minutes: u32) -> bool {
        if period_minutes == 0 {
            return false;
        }
        let secs = self.timestamp.timestamp();
        if secs.rem_euclid(60) != 0 || self.timestamp.timestamp_subsec_nanos() != 0 {
            return false;
        }
        (secs / 60).rem_euclid(i64::from(period_minutes)) == 0
    }
}

/// Bar resolution requested from a time-and-sales source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeSalesInterval {
    #[serde(rename = "tick")]
    Tick,
    #[serde(rename = "1min")]
    #[default]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
}

impl TimeSalesInterval {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::OneMinute => "1min",
            Self::FiveMinutes => "5min",
            Self::FifteenMinutes => "15min",
        }
    }
}
