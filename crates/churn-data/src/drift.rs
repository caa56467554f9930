// Drift correction for monetary columns: peso amounts from different months
// are not comparable, so each monetary column is deflated by a per-period
// index before any cross-month feature is computed.

use std::collections::BTreeMap;

use churn_core::{ChurnError, Result};
use polars::prelude::*;
use tracing::info;

use crate::{optional_numeric, PERIOD_COL};

const MONETARY_PREFIXES: [&str; 4] = ["m", "Visa_m", "Master_m", "vm_m"];

/// Columns holding peso amounts, selected by the dataset's naming scheme.
pub fn monetary_columns(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|c| c.as_str())
        .filter(|c| MONETARY_PREFIXES.iter().any(|p| c.starts_with(p)))
        .map(|c| c.to_string())
        .collect()
}

/// Divide every monetary column by the index value of its row's period.
/// Every period present in the data must appear in the index.
pub fn deflate_monetary(mut df: DataFrame, index: &BTreeMap<i32, f64>) -> Result<DataFrame> {
    let periods = df
        .column(PERIOD_COL)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", PERIOD_COL)))?
        .as_materialized_series()
        .cast(&DataType::Int32)
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", PERIOD_COL, e)))?;
    let periods: Vec<Option<i32>> = periods
        .i32()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", PERIOD_COL, e)))?
        .into_iter()
        .collect();

    let mut factors = Vec::with_capacity(periods.len());
    for period in &periods {
        let period = period.ok_or_else(|| {
            ChurnError::DataShape(format!("null {} while deflating monetary columns", PERIOD_COL))
        })?;
        let factor = index.get(&period).copied().ok_or_else(|| {
            ChurnError::DataShape(format!(
                "monetary index has no entry for period {}",
                period
            ))
        })?;
        if factor == 0.0 {
            return Err(ChurnError::DataShape(format!(
                "monetary index is zero for period {}",
                period
            )));
        }
        factors.push(factor);
    }

    let columns = monetary_columns(&df);
    for name in &columns {
        let Some(values) = optional_numeric(&df, name) else {
            continue;
        };
        let adjusted: Vec<Option<f64>> = values
            .iter()
            .zip(factors.iter())
            .map(|(v, f)| v.map(|v| v / f))
            .collect();
        df.with_column(Series::new(name.as_str().into(), adjusted))
            .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    }

    info!("Deflated {} monetary columns", columns.len());
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        let periods: Vec<i32> = vec![202101, 202102];
        DataFrame::new(vec![
            Series::new(PERIOD_COL.into(), periods).into(),
            Series::new("mcaja_ahorro".into(), vec![Some(100.0), Some(100.0)]).into(),
            Series::new("Visa_msaldototal".into(), vec![Some(50.0), None]).into(),
            Series::new("ccaja_ahorro".into(), vec![Some(2.0), Some(2.0)]).into(),
        ])
        .unwrap()
    }

    fn index() -> BTreeMap<i32, f64> {
        let mut index = BTreeMap::new();
        index.insert(202101, 1.0);
        index.insert(202102, 2.0);
        index
    }

    #[test]
    fn test_monetary_columns_by_prefix() {
        let cols = monetary_columns(&frame());
        assert!(cols.contains(&"mcaja_ahorro".to_string()));
        assert!(cols.contains(&"Visa_msaldototal".to_string()));
        assert!(!cols.contains(&"ccaja_ahorro".to_string()));
    }

    #[test]
    fn test_deflation_scales_by_period() {
        let df = deflate_monetary(frame(), &index()).unwrap();
        let values: Vec<Option<f64>> = df
            .column("mcaja_ahorro")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(values, vec![Some(100.0), Some(50.0)]);

        // Counts are untouched and nulls stay null.
        let counts: Vec<Option<f64>> = df
            .column("ccaja_ahorro")
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(counts, vec![Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_missing_period_named_in_error() {
        let mut index = index();
        index.remove(&202102);
        let err = deflate_monetary(frame(), &index).unwrap_err();
        assert!(err.to_string().contains("202102"));
    }
}
