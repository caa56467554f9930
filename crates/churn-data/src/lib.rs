use std::path::Path;

use anyhow::Context;
use churn_core::{ChurnError, Result};
use polars::prelude::*;
use tracing::info;

pub mod derived;
pub mod drift;
pub mod label;
pub mod window;

pub use label::{class_weights, derive_binary_targets, ternary_labels, with_ternary_label, TernaryLabel};
pub use window::{candidate_attributes, lag_delta_specs, FeatureKind, FeatureSpec, WindowFeatureEngine};

pub const ID_COL: &str = "numero_de_cliente";
pub const PERIOD_COL: &str = "foto_mes";
pub const LABEL_COL: &str = "clase_ternaria";
pub const BINARY_COL: &str = "clase_binaria";
pub const TARGET_COL: &str = "target";

/// Monthly snapshot dataset keyed by (customer, period), held sorted by
/// customer then period. The table is read-only once built; feature builds
/// produce a new owned frame.
#[derive(Debug)]
pub struct SnapshotTable {
    df: DataFrame,
    customers: Vec<i64>,
    positions: Vec<i32>,
}

impl SnapshotTable {
    /// Build from a raw frame: casts the keys, sorts by (customer, period)
    /// and derives the monotone period index `year*12 + month`.
    pub fn from_dataframe(df: DataFrame) -> Result<Self> {
        let customers = key_i64(&df, ID_COL)?;
        let periods = key_i32(&df, PERIOD_COL)?;

        let mut order: Vec<u32> = (0..df.height() as u32).collect();
        order.sort_by_key(|&i| (customers[i as usize], periods[i as usize]));

        for pair in order.windows(2) {
            let (a, b) = (pair[0] as usize, pair[1] as usize);
            if customers[a] == customers[b] && periods[a] == periods[b] {
                return Err(ChurnError::DataShape(format!(
                    "duplicate snapshot for customer {} in period {}",
                    customers[a], periods[a]
                )));
            }
        }

        let idx_ca = UInt32Chunked::from_vec("idx".into(), order.clone());
        let df = df
            .take(&idx_ca)
            .map_err(|e| ChurnError::DataShape(e.to_string()))?;

        let customers: Vec<i64> = order.iter().map(|&i| customers[i as usize]).collect();
        let positions: Vec<i32> = order
            .iter()
            .map(|&i| period_index(periods[i as usize]))
            .collect();

        Ok(Self {
            df,
            customers,
            positions,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let df = read_table(path)?;
        Self::from_dataframe(df)
    }

    pub fn df(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_df(self) -> DataFrame {
        self.df
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn customers(&self) -> &[i64] {
        &self.customers
    }

    /// Period index per row, aligned with the sorted frame.
    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    /// Contiguous [start, end) row ranges, one per customer.
    pub fn partitions(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        let n = self.customers.len();
        let mut start = 0;
        for i in 1..=n {
            if i == n || self.customers[i] != self.customers[start] {
                out.push((start, i));
                start = i;
            }
        }
        out
    }
}

/// `foto_mes` YYYYMM to a monotone month counter.
pub fn period_index(foto_mes: i32) -> i32 {
    (foto_mes / 100) * 12 + (foto_mes % 100)
}

fn key_i64(df: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let series = df
        .column(name)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", name)))?
        .as_materialized_series()
        .cast(&DataType::Int64)
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    let ca = series
        .i64()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    ca.into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| ChurnError::DataShape(format!("null {} at row {}", name, i)))
        })
        .collect()
}

fn key_i32(df: &DataFrame, name: &str) -> Result<Vec<i32>> {
    let series = df
        .column(name)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", name)))?
        .as_materialized_series()
        .cast(&DataType::Int32)
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    let ca = series
        .i32()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    ca.into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| ChurnError::DataShape(format!("null {} at row {}", name, i)))
        })
        .collect()
}

/// Nullable float view of one column; None when the column is absent or not
/// numeric.
pub(crate) fn optional_numeric(df: &DataFrame, name: &str) -> Option<Vec<Option<f64>>> {
    let col = df.column(name).ok()?;
    let numeric = matches!(
        col.dtype(),
        DataType::Float32
            | DataType::Float64
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
    );
    if !numeric {
        return None;
    }
    let series = col
        .as_materialized_series()
        .cast(&DataType::Float64)
        .ok()?;
    let ca = series.f64().ok()?;
    Some(ca.into_iter().collect())
}

/// Load a snapshot dataset from CSV or Parquet, by extension.
pub fn read_table(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let df = match ext.as_str() {
        "parquet" => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            ParquetReader::new(file)
                .finish()
                .with_context(|| format!("failed to read {}", path.display()))?
        }
        _ => CsvReadOptions::default()
            .with_infer_schema_length(Some(5000))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .with_context(|| format!("failed to open {}", path.display()))?
            .finish()
            .with_context(|| format!("failed to read {}", path.display()))?,
    };
    info!(
        "Loaded {} with {} rows and {} columns",
        path.display(),
        df.height(),
        df.width()
    );
    Ok(df)
}

pub fn write_parquet(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    ParquetWriter::new(file)
        .finish(df)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_csv(df: &mut DataFrame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn table_from_rows(rows: &[(i64, i32, f64)]) -> SnapshotTable {
    let ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
    let periods: Vec<i32> = rows.iter().map(|r| r.1).collect();
    let values: Vec<f64> = rows.iter().map(|r| r.2).collect();
    let df = DataFrame::new(vec![
        Series::new(ID_COL.into(), ids).into(),
        Series::new(PERIOD_COL.into(), periods).into(),
        Series::new("x".into(), values).into(),
    ])
    .unwrap();
    SnapshotTable::from_dataframe(df).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_index_spans_year_boundary() {
        assert_eq!(period_index(202101) + 1, period_index(202102));
        assert_eq!(period_index(202112) + 1, period_index(202201));
    }

    #[test]
    fn test_table_sorted_by_customer_then_period() {
        let table = table_from_rows(&[
            (2, 202102, 1.0),
            (1, 202103, 2.0),
            (2, 202101, 3.0),
            (1, 202101, 4.0),
        ]);
        assert_eq!(table.customers(), &[1, 1, 2, 2]);
        assert_eq!(
            table.positions(),
            &[
                period_index(202101),
                period_index(202103),
                period_index(202101),
                period_index(202102)
            ]
        );
    }

    #[test]
    fn test_duplicate_snapshot_rejected() {
        let ids: Vec<i64> = vec![7, 7];
        let periods: Vec<i32> = vec![202101, 202101];
        let df = DataFrame::new(vec![
            Series::new(ID_COL.into(), ids).into(),
            Series::new(PERIOD_COL.into(), periods).into(),
        ])
        .unwrap();
        let err = SnapshotTable::from_dataframe(df).unwrap_err();
        assert!(err.to_string().contains("customer 7"));
    }

    #[test]
    fn test_partitions_cover_all_rows() {
        let table = table_from_rows(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (2, 202101, 0.0),
            (3, 202101, 0.0),
            (3, 202102, 0.0),
            (3, 202103, 0.0),
        ]);
        assert_eq!(table.partitions(), vec![(0, 2), (2, 3), (3, 6)]);
    }
}
