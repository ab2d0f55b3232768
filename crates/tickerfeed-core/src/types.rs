//! Core data types for financial market data.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`PriceBar`] - One OHLCV bar with its adjusted close
//! - [`CorporateAction`] - Dividend, split or capital gain event
//! - [`FundamentalsObservation`] - One reported value of one statement line item
//! - [`HistoryRequest`] - What to fetch from a chart endpoint and how to shape it
//! - [`PriceHistory`] - The shaped price table plus its metadata

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::frequency::{Interval, Period, StatementFrequency};

/// A trading symbol/ticker.
///
/// Symbols are automatically uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// OHLCV bar as reported by the upstream.
///
/// Price fields are optional because the upstream pads halted or illiquid
/// sessions with nulls while keeping the timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar open instant.
    pub timestamp: DateTime<Utc>,
    /// Opening price.
    pub open: Option<f64>,
    /// Highest price during the bar.
    pub high: Option<f64>,
    /// Lowest price during the bar.
    pub low: Option<f64>,
    /// Closing price.
    pub close: Option<f64>,
    /// Split/dividend adjusted close; equals `close` when the upstream omits it.
    pub adjusted_close: Option<f64>,
    /// Traded volume.
    pub volume: Option<u64>,
}

impl PriceBar {
    /// Returns true when all four prices are missing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.open.is_none() && self.high.is_none() && self.low.is_none() && self.close.is_none()
    }
}

/// Kind of corporate action carried by an event series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Cash dividend.
    Dividend,
    /// Stock split.
    Split,
    /// Fund capital gain distribution.
    CapitalGain,
}

impl EventKind {
    /// All event kinds in the order they are merged into a price table.
    pub const ALL: [Self; 3] = [Self::Dividend, Self::Split, Self::CapitalGain];

    /// Column name this event series occupies in a price table.
    #[must_use]
    pub const fn column_name(&self) -> &'static str {
        match self {
            Self::Dividend => "dividends",
            Self::Split => "stock_splits",
            Self::CapitalGain => "capital_gains",
        }
    }

    /// Resolves a price-table column name back to its event kind.
    #[must_use]
    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.column_name() == name)
    }

    /// Combines two events of this kind that land on the same bar.
    ///
    /// Amounts add up; split ratios compound.
    #[must_use]
    pub fn combine(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Split => a * b,
            Self::Dividend | Self::CapitalGain => a + b,
        }
    }
}

/// A sparse corporate action event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CorporateAction {
    /// Cash dividend per share.
    Dividend {
        /// Ex-date instant.
        timestamp: DateTime<Utc>,
        /// Amount per share.
        amount: f64,
    },
    /// Stock split.
    Split {
        /// Effective instant.
        timestamp: DateTime<Utc>,
        /// New shares.
        numerator: f64,
        /// Old shares.
        denominator: f64,
    },
    /// Capital gain distribution per share.
    CapitalGain {
        /// Ex-date instant.
        timestamp: DateTime<Utc>,
        /// Amount per share.
        amount: f64,
    },
}

impl CorporateAction {
    /// Event instant.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Dividend { timestamp, .. }
            | Self::Split { timestamp, .. }
            | Self::CapitalGain { timestamp, .. } => *timestamp,
        }
    }

    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Dividend { .. } => EventKind::Dividend,
            Self::Split { .. } => EventKind::Split,
            Self::CapitalGain { .. } => EventKind::CapitalGain,
        }
    }

    /// The scalar written into the price table: the amount, or the split
    /// ratio reduced to a float.
    #[must_use]
    pub fn value(&self) -> f64 {
        match self {
            Self::Dividend { amount, .. } | Self::CapitalGain { amount, .. } => *amount,
            Self::Split {
                numerator,
                denominator,
                ..
            } => numerator / denominator,
        }
    }
}

/// Financial statement kinds available as fundamentals series.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statement {
    /// Income statement.
    Income,
    /// Balance sheet.
    BalanceSheet,
    /// Cash flow statement.
    CashFlow,
}

impl Statement {
    /// Returns true if the upstream publishes this statement at `frequency`.
    ///
    /// Balance sheets are point-in-time already and have no trailing series.
    #[must_use]
    pub const fn supports(&self, frequency: StatementFrequency) -> bool {
        !matches!(
            (self, frequency),
            (Self::BalanceSheet, StatementFrequency::Trailing)
        )
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Income => "income",
            Self::BalanceSheet => "balance-sheet",
            Self::CashFlow => "cash-flow",
        })
    }
}

/// One reported value of one line item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundamentalsObservation {
    /// Line item name with the period prefix stripped (e.g. `TotalRevenue`).
    pub metric: String,
    /// Period end date the value refers to.
    pub as_of: NaiveDate,
    /// Reported value; `None` when the upstream reports the period without a value.
    pub value: Option<f64>,
}

/// How split/dividend adjustment is folded into the OHLC columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Adjustment {
    /// Leave prices as reported and keep the `adjusted_close` column.
    None,
    /// Scale open/high/low by adjusted/close and replace close with the adjusted close.
    #[default]
    Forward,
    /// Scale open/high/low by adjusted/close and keep close as reported.
    Back,
}

/// Time window of a history request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistorySpan {
    /// Relative window ending now.
    Period(Period),
    /// Absolute window, start inclusive, end exclusive.
    Range {
        /// Window start.
        start: DateTime<Utc>,
        /// Window end.
        end: DateTime<Utc>,
    },
}

/// Parameters of a price history fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRequest {
    /// Time window.
    pub span: HistorySpan,
    /// Bar granularity.
    pub interval: Interval,
    /// Include pre- and post-market bars for intraday intervals.
    pub prepost: bool,
    /// Keep the dividend, split and capital gain columns.
    pub actions: bool,
    /// Adjustment convention.
    pub adjustment: Adjustment,
    /// Keep rows with no non-zero number left after the other steps.
    pub keep_na: bool,
    /// Round float columns, prices and event amounts, to two decimals.
    pub rounding: bool,
}

impl Default for HistoryRequest {
    fn default() -> Self {
        Self {
            span: HistorySpan::Period(Period::Months(1)),
            interval: Interval::Daily,
            prepost: false,
            actions: true,
            adjustment: Adjustment::Forward,
            keep_na: false,
            rounding: false,
        }
    }
}

impl HistoryRequest {
    /// Creates a request for a relative period at the given interval.
    #[must_use]
    pub fn period(period: Period, interval: Interval) -> Self {
        Self {
            span: HistorySpan::Period(period),
            interval,
            ..Default::default()
        }
    }

    /// Creates a request for an absolute window at the given interval.
    #[must_use]
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>, interval: Interval) -> Self {
        Self {
            span: HistorySpan::Range { start, end },
            interval,
            ..Default::default()
        }
    }

    /// Sets the adjustment convention.
    #[must_use]
    pub const fn with_adjustment(mut self, adjustment: Adjustment) -> Self {
        self.adjustment = adjustment;
        self
    }

    /// Sets whether event columns are kept.
    #[must_use]
    pub const fn with_actions(mut self, actions: bool) -> Self {
        self.actions = actions;
        self
    }

    /// Sets whether all-null price rows are kept.
    #[must_use]
    pub const fn with_keep_na(mut self, keep_na: bool) -> Self {
        self.keep_na = keep_na;
        self
    }

    /// Sets whether pre/post market bars are requested.
    #[must_use]
    pub const fn with_prepost(mut self, prepost: bool) -> Self {
        self.prepost = prepost;
        self
    }

    /// Sets whether float columns are rounded to two decimals.
    #[must_use]
    pub const fn with_rounding(mut self, rounding: bool) -> Self {
        self.rounding = rounding;
        self
    }
}

/// Descriptive metadata returned alongside a price series.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMeta {
    /// Trading currency.
    pub currency: Option<String>,
    /// Symbol as echoed by the upstream.
    pub symbol: Option<String>,
    /// Exchange short name.
    pub exchange_name: Option<String>,
    /// IANA timezone of the exchange.
    pub exchange_timezone_name: Option<String>,
    /// Instrument type (EQUITY, ETF, MUTUALFUND, ...).
    pub instrument_type: Option<String>,
    /// Last regular market price.
    pub regular_market_price: Option<f64>,
    /// Granularity the upstream actually served.
    pub data_granularity: Option<String>,
}

/// A shaped price table plus its metadata.
///
/// `data` has a `timestamp` column (UTC datetime), the OHLC columns, `volume`,
/// optionally `adjusted_close` (only with [`Adjustment::None`]) and optionally
/// the event columns named by [`EventKind::column_name`].
#[derive(Clone, Debug)]
pub struct PriceHistory {
    /// Price table, ascending by timestamp.
    pub data: DataFrame,
    /// Chart metadata.
    pub meta: HistoryMeta,
}

impl PriceHistory {
    /// An empty history, used when the upstream has no bars for the request.
    #[must_use]
    pub fn empty(meta: HistoryMeta) -> Self {
        Self {
            data: DataFrame::empty(),
            meta,
        }
    }
}
