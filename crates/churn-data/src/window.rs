// Lag/delta feature generation over partitioned, ordered window operations.
//
// Offsets are row offsets within a customer's ordered snapshot sequence, not
// calendar arithmetic: across a gap month, lag 1 still reads the previous
// observed row.

use rayon::prelude::*;
use std::collections::BTreeMap;

use churn_core::{ChurnError, Result};
use polars::prelude::*;
use tracing::{info, warn};

use crate::{optional_numeric, SnapshotTable, ID_COL, LABEL_COL, BINARY_COL, PERIOD_COL, TARGET_COL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Lag,
    Delta,
}

/// One derived column to generate.
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub attribute: String,
    pub kind: FeatureKind,
    pub depth: usize,
}

impl FeatureSpec {
    pub fn column_name(&self) -> String {
        match self.kind {
            FeatureKind::Lag => format!("{}_lag_{}", self.attribute, self.depth),
            FeatureKind::Delta => format!("{}_delta_{}", self.attribute, self.depth),
        }
    }
}

/// Attributes eligible for window features: everything except identifiers
/// and label columns, plus any caller exclusions.
pub fn candidate_attributes(df: &DataFrame, extra_exclusions: &[&str]) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|c| c.as_str())
        .filter(|c| {
            !matches!(*c, ID_COL | PERIOD_COL | LABEL_COL | BINARY_COL | TARGET_COL)
                && !extra_exclusions.contains(c)
        })
        .map(|c| c.to_string())
        .collect()
}

/// Lag specs for depths 1..=cant_lag and delta specs for 1..=cant_delta.
pub fn lag_delta_specs(attributes: &[String], cant_lag: usize, cant_delta: usize) -> Vec<FeatureSpec> {
    let mut specs = Vec::new();
    for attr in attributes {
        for depth in 1..=cant_lag {
            specs.push(FeatureSpec {
                attribute: attr.clone(),
                kind: FeatureKind::Lag,
                depth,
            });
        }
        for depth in 1..=cant_delta {
            specs.push(FeatureSpec {
                attribute: attr.clone(),
                kind: FeatureKind::Delta,
                depth,
            });
        }
    }
    specs
}

/// Computes lag/delta columns over a snapshot table. The input table is
/// read-only; `build` returns a new owned frame with the original columns
/// plus one column per spec, same row count and order.
pub struct WindowFeatureEngine<'a> {
    table: &'a SnapshotTable,
    partitions: Vec<(usize, usize)>,
}

impl<'a> WindowFeatureEngine<'a> {
    pub fn new(table: &'a SnapshotTable) -> Self {
        let partitions = table.partitions();
        Self { table, partitions }
    }

    /// Value of the customer's d-th prior row, per row; null when fewer than
    /// d prior rows exist.
    fn shift(&self, values: &[Option<f64>], depth: usize) -> Vec<Option<f64>> {
        let mut out = vec![None; values.len()];
        for &(start, end) in &self.partitions {
            for i in start..end {
                if i >= start + depth {
                    out[i] = values[i - depth];
                }
            }
        }
        out
    }

    /// Generate every requested column. Missing or non-numeric source
    /// attributes are skipped with a warning; one bad attribute never fails
    /// the batch. Returns the new frame and the skipped attribute names.
    pub fn build(&self, specs: &[FeatureSpec]) -> Result<(DataFrame, Vec<String>)> {
        if specs.is_empty() {
            warn!("No feature specs supplied; returning the table unchanged");
            return Ok((self.table.df().clone(), Vec::new()));
        }

        let mut attributes: Vec<&str> = specs.iter().map(|s| s.attribute.as_str()).collect();
        attributes.sort_unstable();
        attributes.dedup();

        let extracted: BTreeMap<String, Option<Vec<Option<f64>>>> = attributes
            .par_iter()
            .map(|attr| {
                (
                    attr.to_string(),
                    optional_numeric(self.table.df(), attr),
                )
            })
            .collect();

        let mut skipped: Vec<String> = Vec::new();
        for (attr, values) in &extracted {
            if values.is_none() {
                warn!(
                    "Attribute {} is missing or not numeric; skipping its window features",
                    attr
                );
                skipped.push(attr.clone());
            }
        }

        let columns: Vec<Series> = specs
            .par_iter()
            .filter_map(|spec| {
                let values = extracted.get(&spec.attribute)?.as_ref()?;
                let lagged = self.shift(values, spec.depth);
                let out: Vec<Option<f64>> = match spec.kind {
                    FeatureKind::Lag => lagged,
                    FeatureKind::Delta => values
                        .iter()
                        .zip(lagged.iter())
                        .map(|(cur, lag)| match (cur, lag) {
                            (Some(c), Some(l)) => Some(c - l),
                            _ => None,
                        })
                        .collect(),
                };
                Some(Series::new(spec.column_name().into(), out))
            })
            .collect();

        let mut df = self.table.df().clone();
        for series in columns {
            df.with_column(series)
                .map_err(|e| ChurnError::DataShape(e.to_string()))?;
        }

        info!(
            "Window features: {} specs over {} attributes -> {} columns total ({} skipped)",
            specs.len(),
            attributes.len(),
            df.width(),
            skipped.len()
        );
        Ok((df, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_from_rows;

    fn column(df: &DataFrame, name: &str) -> Vec<Option<f64>> {
        df.column(name)
            .unwrap()
            .as_materialized_series()
            .f64()
            .unwrap()
            .into_iter()
            .collect()
    }

    #[test]
    fn test_lag_and_delta_over_four_periods() {
        let table = table_from_rows(&[
            (1, 202101, 10.0),
            (1, 202102, 20.0),
            (1, 202103, 30.0),
            (1, 202104, 40.0),
        ]);
        let engine = WindowFeatureEngine::new(&table);
        let specs = lag_delta_specs(&["x".to_string()], 1, 2);
        let (df, skipped) = engine.build(&specs).unwrap();

        assert!(skipped.is_empty());
        assert_eq!(df.height(), 4);
        assert_eq!(
            column(&df, "x_lag_1"),
            vec![None, Some(10.0), Some(20.0), Some(30.0)]
        );
        assert_eq!(
            column(&df, "x_delta_1"),
            vec![None, Some(10.0), Some(10.0), Some(10.0)]
        );
        assert_eq!(
            column(&df, "x_delta_2"),
            vec![None, None, Some(20.0), Some(20.0)]
        );
    }

    #[test]
    fn test_lag_is_row_offset_across_calendar_gaps() {
        // Customer skips 202102: lag 1 at 202103 still reads the 202101 row.
        let table = table_from_rows(&[(1, 202101, 5.0), (1, 202103, 8.0)]);
        let engine = WindowFeatureEngine::new(&table);
        let specs = lag_delta_specs(&["x".to_string()], 1, 1);
        let (df, _) = engine.build(&specs).unwrap();

        assert_eq!(column(&df, "x_lag_1"), vec![None, Some(5.0)]);
        assert_eq!(column(&df, "x_delta_1"), vec![None, Some(3.0)]);
    }

    #[test]
    fn test_lags_do_not_cross_customers() {
        let table = table_from_rows(&[
            (1, 202101, 1.0),
            (1, 202102, 2.0),
            (2, 202101, 100.0),
            (2, 202102, 200.0),
        ]);
        let engine = WindowFeatureEngine::new(&table);
        let specs = lag_delta_specs(&["x".to_string()], 1, 0);
        let (df, _) = engine.build(&specs).unwrap();

        assert_eq!(
            column(&df, "x_lag_1"),
            vec![None, Some(1.0), None, Some(100.0)]
        );
    }

    #[test]
    fn test_missing_attribute_skipped_batch_survives() {
        let table = table_from_rows(&[(1, 202101, 1.0), (1, 202102, 2.0)]);
        let engine = WindowFeatureEngine::new(&table);
        let specs = lag_delta_specs(&["x".to_string(), "no_such_column".to_string()], 1, 1);
        let (df, skipped) = engine.build(&specs).unwrap();

        assert_eq!(skipped, vec!["no_such_column".to_string()]);
        assert!(df.column("x_lag_1").is_ok());
        assert!(df.column("no_such_column_lag_1").is_err());
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn test_null_source_propagates_to_delta() {
        let values: Vec<Option<f64>> = vec![Some(1.0), None, Some(3.0)];
        let ids: Vec<i64> = vec![1, 1, 1];
        let periods: Vec<i32> = vec![202101, 202102, 202103];
        let df = DataFrame::new(vec![
            Series::new(crate::ID_COL.into(), ids).into(),
            Series::new(crate::PERIOD_COL.into(), periods).into(),
            Series::new("x".into(), values).into(),
        ])
        .unwrap();
        let table = SnapshotTable::from_dataframe(df).unwrap();
        let engine = WindowFeatureEngine::new(&table);
        let specs = lag_delta_specs(&["x".to_string()], 1, 1);
        let (out, _) = engine.build(&specs).unwrap();

        assert_eq!(column(&out, "x_lag_1"), vec![None, Some(1.0), None]);
        // Row 1 has a null current value, row 2 a null lag: both deltas null.
        assert_eq!(column(&out, "x_delta_1"), vec![None, None, None]);
    }
}
