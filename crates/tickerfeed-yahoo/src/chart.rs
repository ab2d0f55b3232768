//! Chart payload parsing.
//!
//! A chart result carries parallel arrays (`timestamp`, `indicators.quote[0]`
//! OHLCV, optionally `indicators.adjclose[0].adjclose`) and sparse `events`
//! maps keyed by epoch-second strings. [`parse_chart`] turns one result into
//! typed bars and corporate actions; [`bars_to_frame`] and
//! [`events_to_frame`] produce the tables the aligner works on.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use serde_json::Value;
use tickerfeed_core::{CorporateAction, DataError, EventKind, HistoryMeta, PriceBar, Result};
use tracing::{debug, warn};

use crate::field::{Field, array_field, as_integer, f64_field, i64_field, object_field, value};

/// Name of the time key column shared by price and event tables.
pub const TIMESTAMP: &str = "timestamp";

/// Price column names in table order.
pub const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

/// Adjusted close column name.
pub const ADJUSTED_CLOSE: &str = "adjusted_close";

/// Volume column name.
pub const VOLUME: &str = "volume";

/// One parsed chart result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChartData {
    /// Bars ascending by timestamp, one per timestamp.
    pub bars: Vec<PriceBar>,
    /// Dividends ascending by timestamp.
    pub dividends: Vec<CorporateAction>,
    /// Splits ascending by timestamp.
    pub splits: Vec<CorporateAction>,
    /// Capital gains ascending by timestamp.
    pub capital_gains: Vec<CorporateAction>,
    /// Chart metadata.
    pub meta: HistoryMeta,
}

impl ChartData {
    /// Events of one kind.
    #[must_use]
    pub fn events(&self, kind: EventKind) -> &[CorporateAction] {
        match kind {
            EventKind::Dividend => &self.dividends,
            EventKind::Split => &self.splits,
            EventKind::CapitalGain => &self.capital_gains,
        }
    }
}

/// Parses one element of `chart.result`.
///
/// A result without timestamps parses to no bars. Duplicate timestamps keep
/// the last bar. Adjusted close falls back to close when the upstream omits
/// it.
///
/// # Errors
///
/// Returns [`DataError::Shape`] if the quote arrays are missing, of the
/// wrong type or not the same length as `timestamp`, or if every record of
/// an event series is malformed.
pub fn parse_chart(result: &Value) -> Result<ChartData> {
    let meta = match value(result, "meta") {
        Field::Present(meta) => serde_json::from_value(meta.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "unreadable chart metadata");
            HistoryMeta::default()
        }),
        Field::Missing | Field::WrongType => HistoryMeta::default(),
    };

    let events = match value(result, "events") {
        Field::Present(events) => Some(events),
        Field::Missing => None,
        Field::WrongType => return Err(DataError::Shape("events is not an object".to_string())),
    };

    let mut chart = ChartData {
        meta,
        ..ChartData::default()
    };
    if let Some(events) = events {
        chart.dividends = parse_events(events, "dividends", EventKind::Dividend)?;
        chart.splits = parse_events(events, "splits", EventKind::Split)?;
        chart.capital_gains = parse_events(events, "capitalGains", EventKind::CapitalGain)?;
    }

    let Some(timestamps) = array_field(result, "timestamp").optional("timestamp")? else {
        debug!("chart result has no timestamps");
        return Ok(chart);
    };
    let timestamps = timestamps
        .iter()
        .map(|t| as_integer(t).and_then(to_utc))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| DataError::Shape("timestamp holds a non-integer".to_string()))?;
    let len = timestamps.len();

    let indicators = value(result, "indicators").required("indicators")?;
    let quote = array_field(indicators, "quote")
        .required("indicators.quote")?
        .first()
        .ok_or_else(|| DataError::Shape("indicators.quote is empty".to_string()))?;

    let open = float_series(quote, "open", len)?;
    let high = float_series(quote, "high", len)?;
    let low = float_series(quote, "low", len)?;
    let close = float_series(quote, "close", len)?;
    let volume = volume_series(quote, len)?;
    let adjusted = adjusted_close_series(indicators, len)?;

    let mut by_time = BTreeMap::new();
    for (i, timestamp) in timestamps.into_iter().enumerate() {
        by_time.insert(
            timestamp,
            PriceBar {
                timestamp,
                open: open[i],
                high: high[i],
                low: low[i],
                close: close[i],
                adjusted_close: adjusted.as_ref().and_then(|a| a[i]).or(close[i]),
                volume: volume[i],
            },
        );
    }
    if by_time.len() < len {
        debug!(duplicates = len - by_time.len(), "dropped duplicate timestamps");
    }
    chart.bars = by_time.into_values().collect();

    Ok(chart)
}

fn to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

fn float_series(quote: &Value, key: &str, len: usize) -> Result<Vec<Option<f64>>> {
    let items = array_field(quote, key).required(key)?;
    if items.len() != len {
        return Err(DataError::Shape(format!(
            "{key} has {} values for {len} timestamps",
            items.len()
        )));
    }
    items
        .iter()
        .map(|v| match v {
            Value::Null => Ok(None),
            v => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| DataError::Shape(format!("{key} holds a non-number"))),
        })
        .collect()
}

fn volume_series(quote: &Value, len: usize) -> Result<Vec<Option<u64>>> {
    Ok(float_series(quote, "volume", len)?
        .into_iter()
        .map(|v| v.filter(|v| *v >= 0.0).map(|v| v as u64))
        .collect())
}

fn adjusted_close_series(indicators: &Value, len: usize) -> Result<Option<Vec<Option<f64>>>> {
    let Some(block) = array_field(indicators, "adjclose")
        .optional("indicators.adjclose")?
        .and_then(|a| a.first())
    else {
        return Ok(None);
    };
    match float_series(block, "adjclose", len) {
        Ok(series) => Ok(Some(series)),
        Err(e) => {
            warn!(error = %e, "ignoring unusable adjusted close");
            Ok(None)
        }
    }
}

/// Parses `events.<key>`, skipping malformed records.
fn parse_events(events: &Value, key: &str, kind: EventKind) -> Result<Vec<CorporateAction>> {
    let Some(records) = object_field(events, key).optional(key)? else {
        return Ok(Vec::new());
    };

    let mut actions: Vec<CorporateAction> = records.values().filter_map(|r| parse_event(r, kind)).collect();
    let skipped = records.len() - actions.len();
    if skipped > 0 {
        if actions.is_empty() {
            return Err(DataError::Shape(format!("all {skipped} {key} records are malformed")));
        }
        debug!(key, skipped, "skipped malformed event records");
    }

    actions.sort_by_key(CorporateAction::timestamp);
    Ok(actions)
}

fn parse_event(record: &Value, kind: EventKind) -> Option<CorporateAction> {
    let timestamp = i64_field(record, "date").ok().and_then(to_utc)?;
    match kind {
        EventKind::Dividend => {
            let amount = f64_field(record, "amount").ok().filter(|a| *a > 0.0)?;
            Some(CorporateAction::Dividend { timestamp, amount })
        }
        EventKind::CapitalGain => {
            let amount = f64_field(record, "amount").ok().filter(|a| *a > 0.0)?;
            Some(CorporateAction::CapitalGain { timestamp, amount })
        }
        EventKind::Split => {
            let numerator = f64_field(record, "numerator").ok().filter(|n| *n > 0.0)?;
            let denominator = f64_field(record, "denominator").ok().filter(|d| *d > 0.0)?;
            Some(CorporateAction::Split {
                timestamp,
                numerator,
                denominator,
            })
        }
    }
}

fn timestamp_column(timestamps: impl Iterator<Item = DateTime<Utc>>) -> Result<Column> {
    let millis: Vec<i64> = timestamps.map(|t| t.timestamp_millis()).collect();
    Ok(Column::new(TIMESTAMP.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}

/// Builds the price table: `timestamp` (UTC, ms) plus OHLC, `volume` and
/// `adjusted_close`.
///
/// # Errors
///
/// Propagates table construction failures as [`DataError::Shape`].
pub fn bars_to_frame(bars: &[PriceBar]) -> Result<DataFrame> {
    let column = |name: &str, get: fn(&PriceBar) -> Option<f64>| {
        Column::new(name.into(), bars.iter().map(get).collect::<Vec<_>>())
    };

    Ok(DataFrame::new(vec![
        timestamp_column(bars.iter().map(|b| b.timestamp))?,
        column("open", |b| b.open),
        column("high", |b| b.high),
        column("low", |b| b.low),
        column("close", |b| b.close),
        Column::new(VOLUME.into(), bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
        column(ADJUSTED_CLOSE, |b| b.adjusted_close),
    ])?)
}

/// Builds a two-column event table: `timestamp` plus the value column named
/// after `kind`. Split values are ratios.
///
/// # Errors
///
/// Propagates table construction failures as [`DataError::Shape`].
pub fn events_to_frame(kind: EventKind, actions: &[CorporateAction]) -> Result<DataFrame> {
    let values: Vec<f64> = actions.iter().map(CorporateAction::value).collect();
    Ok(DataFrame::new(vec![
        timestamp_column(actions.iter().map(CorporateAction::timestamp))?,
        Column::new(kind.column_name().into(), values),
    ])?)
}
