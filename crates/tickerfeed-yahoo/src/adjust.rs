//! Price adjustment for splits and distributions.
//!
//! The per-bar factor is `adjusted_close / close`. Forward adjustment scales
//! open, high and low by the factor and replaces close with the adjusted
//! close. Back adjustment scales open, high and low but keeps the raw close.
//! Both drop the `adjusted_close` column; every other column is untouched and
//! the column order is preserved.

use polars::prelude::*;
use tickerfeed_core::{Adjustment, Result};

use crate::chart::{ADJUSTED_CLOSE, PRICE_COLUMNS};

/// Applies `mode` to a price table.
///
/// # Errors
///
/// Returns [`DataError::Shape`](tickerfeed_core::DataError::Shape) if a
/// required price column is missing.
pub fn adjust(df: &DataFrame, mode: Adjustment) -> Result<DataFrame> {
    match mode {
        Adjustment::None => Ok(df.clone()),
        Adjustment::Forward => forward_adjust(df),
        Adjustment::Back => back_adjust(df),
    }
}

/// Rewrites close to the adjusted close and scales open, high and low.
///
/// # Errors
///
/// Fails if `close` or `adjusted_close` is missing.
pub fn forward_adjust(df: &DataFrame) -> Result<DataFrame> {
    let close = float_values(df, "close")?;
    let adjusted = float_values(df, ADJUSTED_CLOSE)?;
    let factors = factors(&close, &adjusted);

    let mut out = scale_open_high_low(df, &factors)?;
    let new_close: Vec<Option<f64>> = close
        .iter()
        .zip(&adjusted)
        .map(|(c, a)| a.or(*c))
        .collect();
    out.with_column(Column::new("close".into(), new_close))?;
    Ok(out.drop(ADJUSTED_CLOSE)?)
}

/// Scales open, high and low, leaving close as reported.
///
/// # Errors
///
/// Fails if `close` or `adjusted_close` is missing.
pub fn back_adjust(df: &DataFrame) -> Result<DataFrame> {
    let close = float_values(df, "close")?;
    let adjusted = float_values(df, ADJUSTED_CLOSE)?;
    let factors = factors(&close, &adjusted);

    let out = scale_open_high_low(df, &factors)?;
    Ok(out.drop(ADJUSTED_CLOSE)?)
}

/// Per-bar factor; 1.0 when either value is missing or close is zero.
fn factors(close: &[Option<f64>], adjusted: &[Option<f64>]) -> Vec<f64> {
    close
        .iter()
        .zip(adjusted)
        .map(|(c, a)| match (c, a) {
            (Some(c), Some(a)) if *c != 0.0 && (a / c).is_finite() => a / c,
            _ => 1.0,
        })
        .collect()
}

fn scale_open_high_low(df: &DataFrame, factors: &[f64]) -> Result<DataFrame> {
    let mut out = df.clone();
    for name in &PRICE_COLUMNS[..3] {
        let scaled: Vec<Option<f64>> = float_values(df, name)?
            .into_iter()
            .zip(factors)
            .map(|(v, f)| v.map(|v| v * f))
            .collect();
        out.with_column(Column::new((*name).into(), scaled))?;
    }
    Ok(out)
}

pub(crate) fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickerfeed_core::DataError;

    fn frame() -> DataFrame {
        let timestamps = Column::new("timestamp".into(), vec![1_700_000_000_000i64, 1_700_003_600_000])
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .unwrap();
        DataFrame::new(vec![
            timestamps,
            Column::new("open".into(), vec![Some(10.0), Some(11.0)]),
            Column::new("high".into(), vec![Some(10.5), None]),
            Column::new("low".into(), vec![Some(9.5), Some(10.5)]),
            Column::new("close".into(), vec![Some(10.0), Some(11.0)]),
            Column::new("volume".into(), vec![Some(100u64), Some(200)]),
            Column::new("adjusted_close".into(), vec![Some(9.0), Some(9.9)]),
            Column::new("dividends".into(), vec![0.0, 0.5]),
        ])
        .unwrap()
    }

    fn approx(values: Vec<Option<f64>>, expected: &[Option<f64>]) {
        assert_eq!(values.len(), expected.len());
        for (v, e) in values.iter().zip(expected) {
            match (v, e) {
                (Some(v), Some(e)) => assert!((v - e).abs() < 1e-9, "{v} != {e}"),
                (v, e) => assert_eq!(v, e),
            }
        }
    }

    fn names(df: &DataFrame) -> Vec<String> {
        df.get_column_names().into_iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_forward_adjust() {
        let df = forward_adjust(&frame()).unwrap();

        approx(float_values(&df, "open").unwrap(), &[Some(9.0), Some(9.9)]);
        approx(float_values(&df, "high").unwrap(), &[Some(9.45), None]);
        approx(float_values(&df, "close").unwrap(), &[Some(9.0), Some(9.9)]);
        assert_eq!(
            names(&df),
            vec!["timestamp", "open", "high", "low", "close", "volume", "dividends"]
        );
        approx(float_values(&df, "dividends").unwrap(), &[Some(0.0), Some(0.5)]);
    }

    #[test]
    fn test_back_adjust_keeps_close() {
        let df = back_adjust(&frame()).unwrap();

        approx(float_values(&df, "open").unwrap(), &[Some(9.0), Some(9.9)]);
        approx(float_values(&df, "low").unwrap(), &[Some(8.55), Some(9.45)]);
        approx(float_values(&df, "close").unwrap(), &[Some(10.0), Some(11.0)]);
        assert!(!names(&df).contains(&"adjusted_close".to_string()));
    }

    #[test]
    fn test_forward_close_matches_adjusted_close() {
        let original = frame();
        let adjusted_close = float_values(&original, "adjusted_close").unwrap();
        let df = adjust(&original, Adjustment::Forward).unwrap();
        approx(float_values(&df, "close").unwrap(), &adjusted_close);
    }

    #[test]
    fn test_zero_close_uses_unit_factor() {
        let close = [Some(0.0), None, Some(4.0)];
        let adjusted = [Some(1.0), Some(2.0), Some(2.0)];
        assert_eq!(factors(&close, &adjusted), vec![1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_none_is_identity() {
        let df = adjust(&frame(), Adjustment::None).unwrap();
        assert!(df.equals_missing(&frame()));
    }

    #[test]
    fn test_missing_column_is_error() {
        let df = frame().drop("adjusted_close").unwrap();
        assert!(matches!(forward_adjust(&df), Err(DataError::Shape(_))));
    }
}
