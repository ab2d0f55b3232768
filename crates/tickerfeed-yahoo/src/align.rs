//! As-of merge of sparse event series onto a price table.
//!
//! Daily and coarser tables attach each event to the last bar at or before
//! it. Intraday tables attach each event to the first bar of its calendar day
//! (UTC), or the first later day with bars, since the upstream stamps events
//! at the session open while intraday bars start later.

use std::collections::HashSet;

use polars::prelude::*;
use tickerfeed_core::{DataError, EventKind, Interval, Result};
use tracing::debug;

use crate::chart::TIMESTAMP;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Merges the single value column of `events` into `primary`.
///
/// Row count and row order of `primary` are preserved. Bars without an event
/// get a null. Events that land on the same bar are combined: split ratios
/// multiply, amounts add. Events outside the table's span are dropped.
///
/// # Errors
///
/// Returns [`DataError::Shape`] unless `events` has a `timestamp` column and
/// exactly one other column, absent from `primary`.
pub fn merge_events(primary: &DataFrame, events: &DataFrame, interval: Interval) -> Result<DataFrame> {
    let value_name = event_column(primary, events)?;
    if primary.height() == 0 {
        return Ok(primary.clone());
    }

    let bar_times = millis(primary)?;
    let event_times = millis(events)?;
    let event_values = events.column(&value_name)?.cast(&DataType::Float64)?;
    let event_values = event_values.f64()?;

    let mut order: Vec<usize> = (0..bar_times.len()).collect();
    order.sort_by_key(|&i| bar_times[i]);
    let sorted: Vec<i64> = order.iter().map(|&i| bar_times[i]).collect();

    let kind = EventKind::from_column_name(&value_name);
    let mut merged: Vec<Option<f64>> = vec![None; bar_times.len()];
    let mut dropped = 0usize;

    for (at, amount) in event_times.iter().zip(event_values) {
        let Some(amount) = amount else { continue };
        let slot = if interval.is_intraday() {
            first_bar_on_or_after_day(&sorted, *at)
        } else {
            last_bar_at_or_before(&sorted, *at)
        };
        let Some(slot) = slot else {
            dropped += 1;
            continue;
        };

        let row = order[slot];
        merged[row] = Some(match (merged[row], kind) {
            (None, _) => amount,
            (Some(prev), Some(kind)) => kind.combine(prev, amount),
            (Some(prev), None) => prev + amount,
        });
    }

    if dropped > 0 {
        debug!(column = %value_name, dropped, "events outside the price range");
    }

    let mut out = primary.clone();
    out.with_column(Column::new(value_name.into(), merged))?;
    Ok(out)
}

/// Name of the one column `events` contributes.
fn event_column(primary: &DataFrame, events: &DataFrame) -> Result<String> {
    let event_names = events.get_column_names();
    if !event_names.iter().any(|n| n.as_str() == TIMESTAMP) {
        return Err(DataError::Shape("event table has no timestamp column".to_string()));
    }

    let existing: HashSet<&str> = primary
        .get_column_names()
        .into_iter()
        .map(|n| n.as_str())
        .collect();
    let values: Vec<&str> = event_names
        .into_iter()
        .map(|n| n.as_str())
        .filter(|n| *n != TIMESTAMP)
        .collect();

    match values.as_slice() {
        [name] if !existing.contains(name) => Ok((*name).to_string()),
        [name] => Err(DataError::Shape(format!(
            "event column '{name}' already exists in the price table"
        ))),
        _ => Err(DataError::Shape(format!(
            "event table must have exactly one value column, found {}",
            values.len()
        ))),
    }
}

/// Timestamps as epoch milliseconds, whatever the column's time unit.
fn millis(df: &DataFrame) -> Result<Vec<i64>> {
    let column = df
        .column(TIMESTAMP)?
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
        .cast(&DataType::Int64)?;
    column
        .i64()?
        .into_iter()
        .map(|t| t.ok_or_else(|| DataError::Shape("null timestamp".to_string())))
        .collect()
}

fn last_bar_at_or_before(sorted: &[i64], at: i64) -> Option<usize> {
    sorted.partition_point(|&t| t <= at).checked_sub(1)
}

fn first_bar_on_or_after_day(sorted: &[i64], at: i64) -> Option<usize> {
    let day = at.div_euclid(MILLIS_PER_DAY);
    let slot = sorted.partition_point(|&t| t.div_euclid(MILLIS_PER_DAY) < day);
    (slot < sorted.len()).then_some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = MILLIS_PER_DAY;
    const HOUR: i64 = 3_600_000;

    fn datetime(name: &str, millis: Vec<i64>) -> Column {
        Column::new(name.into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .unwrap()
    }

    fn prices(times: Vec<i64>) -> DataFrame {
        let close: Vec<f64> = (0..times.len()).map(|i| 10.0 + i as f64).collect();
        DataFrame::new(vec![datetime(TIMESTAMP, times), Column::new("close".into(), close)]).unwrap()
    }

    fn events(name: &str, times: Vec<i64>, values: Vec<f64>) -> DataFrame {
        DataFrame::new(vec![datetime(TIMESTAMP, times), Column::new(name.into(), values)]).unwrap()
    }

    fn values(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name).unwrap().f64().unwrap().into_iter().collect()
    }

    #[test]
    fn test_daily_attaches_to_last_bar_at_or_before() {
        let base = 100 * DAY;
        let primary = prices(vec![base, base + DAY, base + 2 * DAY]);
        let dividends = events("dividends", vec![base + DAY + HOUR], vec![0.5]);

        let merged = merge_events(&primary, &dividends, Interval::Daily).unwrap();

        assert_eq!(merged.height(), 3);
        assert_eq!(values(&merged, "dividends"), vec![None, Some(0.5), None]);
        assert_eq!(values(&merged, "close"), values(&primary, "close"));
    }

    #[test]
    fn test_intraday_attaches_to_first_bar_of_day() {
        let day = 200 * DAY;
        // Bars at 14:30 and 15:30 on the event day, event stamped at 13:30.
        let primary = prices(vec![day + 14 * HOUR + HOUR / 2, day + 15 * HOUR + HOUR / 2]);
        let dividends = events("dividends", vec![day + 13 * HOUR + HOUR / 2], vec![0.25]);

        let merged = merge_events(&primary, &dividends, Interval::Hourly).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![Some(0.25), None]);

        // Same event merged daily would precede every bar and be dropped.
        let merged = merge_events(&primary, &dividends, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![None, None]);
    }

    #[test]
    fn test_intraday_rolls_to_next_day_with_bars() {
        let primary = prices(vec![11 * DAY + HOUR]);
        let dividends = events("dividends", vec![10 * DAY + HOUR], vec![1.0]);

        let merged = merge_events(&primary, &dividends, Interval::FiveMinute).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![Some(1.0)]);
    }

    #[test]
    fn test_collisions_combine_by_kind() {
        let primary = prices(vec![DAY, 5 * DAY]);

        let splits = events("stock_splits", vec![2 * DAY, 3 * DAY], vec![2.0, 3.0]);
        let merged = merge_events(&primary, &splits, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "stock_splits"), vec![Some(6.0), None]);

        let dividends = events("dividends", vec![2 * DAY, 3 * DAY], vec![0.25, 0.5]);
        let merged = merge_events(&primary, &dividends, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![Some(0.75), None]);
    }

    #[test]
    fn test_unsorted_primary_keeps_row_order() {
        let primary = prices(vec![3 * DAY, DAY, 2 * DAY]);
        let dividends = events("dividends", vec![DAY], vec![0.1]);

        let merged = merge_events(&primary, &dividends, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![None, Some(0.1), None]);
    }

    #[test]
    fn test_mixed_time_units() {
        let base = 100 * DAY;
        let primary = prices(vec![base, base + DAY, base + 2 * DAY]);

        let nanos = DataFrame::new(vec![
            Column::new(TIMESTAMP.into(), vec![(base + DAY) * 1_000_000])
                .cast(&DataType::Datetime(TimeUnit::Nanoseconds, None))
                .unwrap(),
            Column::new("dividends".into(), vec![0.5]),
        ])
        .unwrap();
        let merged = merge_events(&primary, &nanos, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![None, Some(0.5), None]);

        let days = DataFrame::new(vec![
            Column::new(TIMESTAMP.into(), vec![101i32]).cast(&DataType::Date).unwrap(),
            Column::new("dividends".into(), vec![0.5]),
        ])
        .unwrap();
        let merged = merge_events(&primary, &days, Interval::Daily).unwrap();
        assert_eq!(values(&merged, "dividends"), vec![None, Some(0.5), None]);
    }

    #[test]
    fn test_empty_primary_passes_through() {
        let primary = prices(Vec::new());
        let dividends = events("dividends", vec![DAY], vec![0.1]);

        let merged = merge_events(&primary, &dividends, Interval::Daily).unwrap();
        assert_eq!(merged.height(), 0);
        assert_eq!(merged.width(), primary.width());
    }

    #[test]
    fn test_event_table_must_add_one_column() {
        let primary = prices(vec![DAY]);

        let two = DataFrame::new(vec![
            datetime(TIMESTAMP, vec![DAY]),
            Column::new("dividends".into(), vec![0.1]),
            Column::new("capital_gains".into(), vec![0.2]),
        ])
        .unwrap();
        assert!(matches!(merge_events(&primary, &two, Interval::Daily), Err(DataError::Shape(_))));

        let clash = events("close", vec![DAY], vec![1.0]);
        assert!(matches!(merge_events(&primary, &clash, Interval::Daily), Err(DataError::Shape(_))));

        let bare = DataFrame::new(vec![datetime(TIMESTAMP, vec![DAY])]).unwrap();
        assert!(matches!(merge_events(&primary, &bare, Interval::Daily), Err(DataError::Shape(_))));
    }
}
