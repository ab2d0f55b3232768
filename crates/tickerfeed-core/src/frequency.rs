//! Bar interval, lookback period and statement frequency definitions.
//!
//! This module defines [`Interval`] for the granularity of price bars,
//! [`Period`] for relative lookback windows and [`StatementFrequency`] for
//! fundamentals series.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Granularity of a price bar series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// One-minute bars.
    Minute,
    /// Two-minute bars.
    TwoMinute,
    /// Five-minute bars.
    FiveMinute,
    /// Fifteen-minute bars.
    FifteenMinute,
    /// Thirty-minute bars.
    ThirtyMinute,
    /// Ninety-minute bars.
    NinetyMinute,
    /// Hourly bars.
    Hourly,
    /// Daily bars.
    #[default]
    Daily,
    /// Five-day bars.
    FiveDay,
    /// Weekly bars.
    Weekly,
    /// Monthly bars.
    Monthly,
    /// Quarterly bars.
    Quarterly,
}

impl Interval {
    /// Every interval, finest first.
    pub const ALL: [Self; 12] = [
        Self::Minute,
        Self::TwoMinute,
        Self::FiveMinute,
        Self::FifteenMinute,
        Self::ThirtyMinute,
        Self::NinetyMinute,
        Self::Hourly,
        Self::Daily,
        Self::FiveDay,
        Self::Weekly,
        Self::Monthly,
        Self::Quarterly,
    ];

    /// The wire code used in the `interval` query parameter.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Minute => "1m",
            Self::TwoMinute => "2m",
            Self::FiveMinute => "5m",
            Self::FifteenMinute => "15m",
            Self::ThirtyMinute => "30m",
            Self::NinetyMinute => "90m",
            Self::Hourly => "1h",
            Self::Daily => "1d",
            Self::FiveDay => "5d",
            Self::Weekly => "1wk",
            Self::Monthly => "1mo",
            Self::Quarterly => "3mo",
        }
    }

    /// Returns true for sub-day intervals (minute and hour units).
    ///
    /// Intraday series align corporate actions by calendar date rather than
    /// by exact instant.
    #[must_use]
    pub const fn is_intraday(&self) -> bool {
        matches!(
            self,
            Self::Minute
                | Self::TwoMinute
                | Self::FiveMinute
                | Self::FifteenMinute
                | Self::ThirtyMinute
                | Self::NinetyMinute
                | Self::Hourly
        )
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // 60m is an alias the upstream accepts for 1h
        if s == "60m" {
            return Ok(Self::Hourly);
        }
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| DataError::InvalidParameter(format!("unknown interval '{s}'")))
    }
}

/// A relative lookback window such as `5d`, `6mo`, `ytd` or `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    /// A number of days.
    Days(u32),
    /// A number of weeks.
    Weeks(u32),
    /// A number of months.
    Months(u32),
    /// A number of years.
    Years(u32),
    /// Year to date.
    YearToDate,
    /// Everything the upstream has.
    Max,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(n) => write!(f, "{n}d"),
            Self::Weeks(n) => write!(f, "{n}wk"),
            Self::Months(n) => write!(f, "{n}mo"),
            Self::Years(n) => write!(f, "{n}y"),
            Self::YearToDate => f.write_str("ytd"),
            Self::Max => f.write_str("max"),
        }
    }
}

impl FromStr for Period {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DataError::InvalidParameter(format!(
                "period '{s}' must look like 5d, 2wk, 6mo, 1y, ytd or max"
            ))
        };

        match s {
            "ytd" => return Ok(Self::YearToDate),
            "max" => return Ok(Self::Max),
            _ => {}
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, unit) = s.split_at(split);
        if digits.is_empty() || digits.starts_with('0') {
            return Err(invalid());
        }
        let n: u32 = digits.parse().map_err(|_| invalid())?;

        match unit {
            "d" => Ok(Self::Days(n)),
            "wk" => Ok(Self::Weeks(n)),
            "mo" => Ok(Self::Months(n)),
            "y" => Ok(Self::Years(n)),
            _ => Err(invalid()),
        }
    }
}

/// Reporting frequency of a fundamentals series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementFrequency {
    /// Annual reporting periods.
    #[default]
    Yearly,
    /// Quarterly reporting periods.
    Quarterly,
    /// Trailing-twelve-months snapshot.
    Trailing,
}

impl StatementFrequency {
    /// The prefix the upstream puts in front of every metric name.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Yearly => "annual",
            Self::Quarterly => "quarterly",
            Self::Trailing => "trailing",
        }
    }
}
