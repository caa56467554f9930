// Slicing the feature matrix into the flat design matrix the training
// collaborator consumes. Identifier and label columns are held out of the
// features; nulls become NaN for the backend to treat as missing.

use churn_core::{ChurnError, Result};
use churn_data::{class_weights, TernaryLabel, BINARY_COL, ID_COL, LABEL_COL, PERIOD_COL, TARGET_COL};
use churn_model::TrainMatrix;
use polars::prelude::*;
use tracing::info;

/// One training or scoring slice of the feature matrix, restricted to a set
/// of periods.
#[derive(Debug)]
pub struct DesignMatrix {
    pub features: Vec<f64>,
    pub n_features: usize,
    pub feature_names: Vec<String>,
    /// Coarse churn flag (BAJA+1 or BAJA+2), unlabeled rows as 0.
    pub attrition: Vec<i32>,
    /// Strict churn flag (BAJA+2 only), the gain-eligibility signal.
    pub strict: Vec<i32>,
    pub weights: Vec<f32>,
    pub customer_ids: Vec<i64>,
    pub periods: Vec<i32>,
}

impl DesignMatrix {
    /// Extract the rows whose `foto_mes` is in `periods`. `context` names
    /// the period set in errors ("MES_TRAIN", "FINAL_PREDIC", ...). Fails
    /// fast when the selection is empty.
    pub fn from_frame(df: &DataFrame, periods: &[i32], context: &str) -> Result<Self> {
        let period_col = i32_column(df, PERIOD_COL)?;
        let mask: Vec<bool> = period_col
            .iter()
            .map(|p| p.map_or(false, |p| periods.contains(&p)))
            .collect();
        let n_rows = mask.iter().filter(|&&m| m).count();
        if n_rows == 0 {
            return Err(ChurnError::DataShape(format!(
                "{} selected no rows (periods {:?})",
                context, periods
            )));
        }
        let selected: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| if m { Some(i) } else { None })
            .collect();

        let customer_col = i64_column(df, ID_COL)?;
        let labels = label_column(df);
        let weights_all = class_weights(df).unwrap_or_else(|_| vec![1.0; df.height()]);

        let feature_names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|c| c.as_str())
            .filter(|c| !matches!(*c, ID_COL | PERIOD_COL | LABEL_COL | BINARY_COL | TARGET_COL))
            .map(|c| c.to_string())
            .collect();
        let n_features = feature_names.len();
        if n_features == 0 {
            return Err(ChurnError::DataShape(format!(
                "{}: feature matrix has no feature columns",
                context
            )));
        }

        // Column-wise extraction, then row-major assembly.
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n_features);
        for name in &feature_names {
            let series = df
                .column(name.as_str())
                .map_err(|e| ChurnError::DataShape(e.to_string()))?
                .as_materialized_series()
                .cast(&DataType::Float64)
                .map_err(|e| {
                    ChurnError::DataShape(format!("feature {} is not numeric: {}", name, e))
                })?;
            let ca = series
                .f64()
                .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
            let values: Vec<f64> = selected
                .iter()
                .map(|&i| ca.get(i).unwrap_or(f64::NAN))
                .collect();
            columns.push(values);
        }

        let mut features = Vec::with_capacity(n_rows * n_features);
        for r in 0..n_rows {
            for column in &columns {
                features.push(column[r]);
            }
        }

        let attrition: Vec<i32> = selected
            .iter()
            .map(|&i| match labels.get(i).copied().flatten() {
                Some(TernaryLabel::Continua) | None => 0,
                Some(_) => 1,
            })
            .collect();
        let strict: Vec<i32> = selected
            .iter()
            .map(|&i| match labels.get(i).copied().flatten() {
                Some(TernaryLabel::Baja2) => 1,
                _ => 0,
            })
            .collect();
        let weights: Vec<f32> = selected.iter().map(|&i| weights_all[i]).collect();
        let customer_ids: Vec<i64> = selected
            .iter()
            .map(|&i| customer_col[i].unwrap_or(0))
            .collect();
        let row_periods: Vec<i32> = selected
            .iter()
            .map(|&i| period_col[i].unwrap_or(0))
            .collect();

        info!(
            "{}: {} rows x {} features, {} attrition / {} strict positives",
            context,
            n_rows,
            n_features,
            attrition.iter().filter(|&&v| v == 1).count(),
            strict.iter().filter(|&&v| v == 1).count()
        );

        Ok(Self {
            features,
            n_features,
            feature_names,
            attrition,
            strict,
            weights,
            customer_ids,
            periods: row_periods,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.attrition.len()
    }

    /// Training matrix over the attrition labels for a row subset.
    pub fn train_matrix(&self, rows: &[usize], weighted: bool) -> TrainMatrix {
        let mut features = Vec::with_capacity(rows.len() * self.n_features);
        let mut labels = Vec::with_capacity(rows.len());
        let mut weights = Vec::with_capacity(rows.len());
        for &r in rows {
            features.extend_from_slice(
                &self.features[r * self.n_features..(r + 1) * self.n_features],
            );
            labels.push(self.attrition[r] as f32);
            weights.push(self.weights[r]);
        }
        TrainMatrix {
            features,
            n_features: self.n_features,
            labels,
            weights: if weighted { Some(weights) } else { None },
        }
    }

    pub fn full_train_matrix(&self, weighted: bool) -> TrainMatrix {
        let rows: Vec<usize> = (0..self.n_rows()).collect();
        self.train_matrix(&rows, weighted)
    }

    pub fn feature_rows(&self, rows: &[usize]) -> Vec<f64> {
        let mut out = Vec::with_capacity(rows.len() * self.n_features);
        for &r in rows {
            out.extend_from_slice(&self.features[r * self.n_features..(r + 1) * self.n_features]);
        }
        out
    }

    pub fn eligibility(&self, rows: &[usize]) -> Vec<bool> {
        rows.iter().map(|&r| self.strict[r] == 1).collect()
    }
}

fn i32_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i32>>> {
    let series = df
        .column(name)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", name)))?
        .as_materialized_series()
        .cast(&DataType::Int32)
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    Ok(series
        .i32()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?
        .into_iter()
        .collect())
}

fn i64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let series = df
        .column(name)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", name)))?
        .as_materialized_series()
        .cast(&DataType::Int64)
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?;
    Ok(series
        .i64()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", name, e)))?
        .into_iter()
        .collect())
}

fn label_column(df: &DataFrame) -> Vec<Option<TernaryLabel>> {
    let Ok(col) = df.column(LABEL_COL) else {
        return vec![None; df.height()];
    };
    let Ok(ca) = col.as_materialized_series().str().map(|c| c.clone()) else {
        return vec![None; df.height()];
    };
    ca.into_iter()
        .map(|v| v.and_then(TernaryLabel::parse))
        .collect()
}
