//! Fundamentals time-series reshaping.
//!
//! The timeseries endpoint returns one result object per requested metric,
//! keyed by the frequency-prefixed metric name (`annualTotalRevenue`), each
//! holding a list of `{asOfDate, reportedValue: {raw}}` observations. This
//! module flattens those into [`FundamentalsObservation`]s and pivots them
//! into a wide table: one row per metric in canonical order, one column per
//! period end date, most recent first.

mod keys;

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use polars::prelude::*;
use serde_json::Value;
use tickerfeed_core::{DataError, FundamentalsObservation, Result, Statement, StatementFrequency};
use tracing::debug;

use crate::field::{Field, f64_field, str_field, value};

/// Name of the row label column.
pub const METRIC: &str = "metric";

/// Date format of the period columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Canonical line items of `statement`, in row order.
#[must_use]
pub fn statement_keys(statement: Statement) -> &'static [&'static str] {
    match statement {
        Statement::Income => keys::INCOME_STATEMENT_KEYS,
        Statement::BalanceSheet => keys::BALANCE_SHEET_KEYS,
        Statement::CashFlow => keys::CASH_FLOW_KEYS,
    }
}

/// Comma-separated, prefixed metric list for the `type` query parameter.
#[must_use]
pub fn type_param(statement: Statement, frequency: StatementFrequency) -> String {
    let prefix = frequency.prefix();
    statement_keys(statement)
        .iter()
        .map(|key| format!("{prefix}{key}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Flattens timeseries results into observations.
///
/// Only keys carrying the prefix of `frequency` are read; `meta` and
/// `timestamp` are skipped. Malformed observations are skipped.
///
/// # Errors
///
/// Returns [`DataError::Shape`] if a result is not an object or if every
/// observation is malformed.
pub fn observations(
    results: &[Value],
    frequency: StatementFrequency,
) -> Result<Vec<FundamentalsObservation>> {
    let prefix = frequency.prefix();
    let mut out = Vec::new();
    let mut malformed = 0usize;

    for result in results {
        let Some(series) = result.as_object() else {
            return Err(DataError::Shape("timeseries result is not an object".to_string()));
        };
        for (key, entries) in series {
            if key == "meta" || key == "timestamp" {
                continue;
            }
            let Some(metric) = key.strip_prefix(prefix) else {
                continue;
            };
            let entries = match entries {
                Value::Array(entries) => entries,
                Value::Null => continue,
                _ => {
                    malformed += 1;
                    continue;
                }
            };
            for entry in entries.iter().filter(|e| !e.is_null()) {
                match observation(metric, entry) {
                    Some(obs) => out.push(obs),
                    None => malformed += 1,
                }
            }
        }
    }

    if malformed > 0 {
        if out.is_empty() {
            return Err(DataError::Shape(format!(
                "all {malformed} timeseries observations are malformed"
            )));
        }
        debug!(malformed, "skipped malformed observations");
    }
    Ok(out)
}

fn observation(metric: &str, entry: &Value) -> Option<FundamentalsObservation> {
    let as_of = str_field(entry, "asOfDate")
        .ok()
        .and_then(|d| NaiveDate::parse_from_str(d, DATE_FORMAT).ok())?;
    let amount = match value(entry, "reportedValue") {
        Field::Present(reported) => match f64_field(reported, "raw") {
            Field::Present(raw) => Some(raw),
            Field::Missing => None,
            Field::WrongType => return None,
        },
        Field::Missing => None,
        Field::WrongType => return None,
    };
    Some(FundamentalsObservation {
        metric: metric.to_string(),
        as_of,
        value: amount,
    })
}

/// Pivots observations into the wide statement table.
///
/// Metrics outside the canonical list of `statement` are dropped. Trailing
/// tables keep only the most recent period column.
///
/// # Errors
///
/// Returns [`DataError::NoData`] when there are no observations.
pub fn reshape(
    observations: &[FundamentalsObservation],
    statement: Statement,
    frequency: StatementFrequency,
) -> Result<DataFrame> {
    let mut dates: Vec<NaiveDate> = observations
        .iter()
        .map(|o| o.as_of)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .rev()
        .collect();
    if dates.is_empty() {
        return Err(DataError::NoData(format!("no {statement} periods reported")));
    }
    if frequency == StatementFrequency::Trailing {
        dates.truncate(1);
    }

    let position: HashMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    let mut cells: HashMap<&str, Vec<Option<f64>>> = HashMap::new();
    for obs in observations {
        let row = cells
            .entry(obs.metric.as_str())
            .or_insert_with(|| vec![None; dates.len()]);
        if let (Some(&column), Some(v)) = (position.get(&obs.as_of), obs.value) {
            row[column] = Some(v);
        }
    }

    let rows: Vec<(&str, &Vec<Option<f64>>)> = statement_keys(statement)
        .iter()
        .filter_map(|key| cells.get(*key).map(|row| (*key, row)))
        .collect();

    let mut columns = Vec::with_capacity(dates.len() + 1);
    columns.push(Column::new(
        METRIC.into(),
        rows.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
    ));
    for (i, date) in dates.iter().enumerate() {
        columns.push(Column::new(
            date.format(DATE_FORMAT).to_string().into(),
            rows.iter().map(|(_, row)| row[i]).collect::<Vec<_>>(),
        ));
    }

    Ok(DataFrame::new(columns)?)
}

/// [`observations`] followed by [`reshape`].
///
/// # Errors
///
/// See [`observations`] and [`reshape`].
pub fn parse_statement(
    results: &[Value],
    statement: Statement,
    frequency: StatementFrequency,
) -> Result<DataFrame> {
    reshape(&observations(results, frequency)?, statement, frequency)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(date: &str, raw: f64) -> Value {
        json!({"asOfDate": date, "periodType": "12M", "reportedValue": {"raw": raw, "fmt": "x"}})
    }

    fn column_names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().into_iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_reshape_two_metrics() {
        let results = vec![
            json!({
                "meta": {"symbol": ["AAPL"], "type": ["annualTotalRevenue"]},
                "timestamp": [1],
                "annualTotalRevenue": [entry("2022-12-31", 1.0), entry("2023-12-31", 2.0)]
            }),
            json!({
                "meta": {"symbol": ["AAPL"], "type": ["annualNetIncome"]},
                "annualNetIncome": [entry("2023-12-31", 3.0)]
            }),
        ];

        let df = parse_statement(&results, Statement::Income, StatementFrequency::Yearly).unwrap();

        assert_eq!(column_names(&df), vec!["metric", "2023-12-31", "2022-12-31"]);
        // Canonical order lists net income before revenue.
        let metrics: Vec<Option<&str>> = df.column(METRIC).unwrap().str().unwrap().into_iter().collect();
        assert_eq!(metrics, vec![Some("NetIncome"), Some("TotalRevenue")]);
        let latest: Vec<Option<f64>> = df.column("2023-12-31").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(latest, vec![Some(3.0), Some(2.0)]);
        let prior: Vec<Option<f64>> = df.column("2022-12-31").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(prior, vec![None, Some(1.0)]);
    }

    #[test]
    fn test_trailing_keeps_latest_column() {
        let results = vec![json!({
            "trailingFreeCashFlow": [
                entry("2023-03-31", 1.0),
                entry("2023-06-30", 2.0),
                entry("2023-09-30", 3.0),
                entry("2023-12-31", 4.0)
            ]
        })];

        let df = parse_statement(&results, Statement::CashFlow, StatementFrequency::Trailing).unwrap();

        assert_eq!(column_names(&df), vec!["metric", "2023-12-31"]);
        let values: Vec<Option<f64>> = df.column("2023-12-31").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(values, vec![Some(4.0)]);
    }

    #[test]
    fn test_unknown_and_foreign_prefix_metrics_dropped() {
        let results = vec![json!({
            "annualTotalAssets": [entry("2023-12-31", 10.0)],
            "annualMadeUpMetric": [entry("2023-12-31", 1.0)],
            "quarterlyTotalAssets": [entry("2023-09-30", 9.0)]
        })];

        let df = parse_statement(&results, Statement::BalanceSheet, StatementFrequency::Yearly).unwrap();

        assert_eq!(df.height(), 1);
        assert_eq!(column_names(&df), vec!["metric", "2023-12-31"]);
    }

    #[test]
    fn test_null_values_and_series() {
        let results = vec![json!({
            "annualTotalRevenue": [null, {"asOfDate": "2023-12-31"}],
            "annualGrossProfit": null
        })];

        let obs = observations(&results, StatementFrequency::Yearly).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].value, None);
    }

    #[test]
    fn test_no_periods_is_no_data() {
        let results = vec![json!({"meta": {}, "timestamp": []})];
        let err = parse_statement(&results, Statement::Income, StatementFrequency::Yearly).unwrap_err();
        assert!(err.is_no_data());
    }

    #[test]
    fn test_all_malformed_is_shape_error() {
        let results = vec![json!({"annualTotalRevenue": [{"asOfDate": "yesterday"}]})];
        assert!(matches!(
            observations(&results, StatementFrequency::Yearly),
            Err(DataError::Shape(_))
        ));
    }

    #[test]
    fn test_type_param() {
        let param = type_param(Statement::CashFlow, StatementFrequency::Quarterly);
        assert!(param.split(',').all(|k| k.starts_with("quarterly")));
        assert!(param.split(',').any(|k| k == "quarterlyFreeCashFlow"));
        assert_eq!(param.split(',').count(), statement_keys(Statement::CashFlow).len());
    }
}
