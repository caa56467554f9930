// Ternary churn label from future-snapshot continuity, and the binary
// training targets derived from it.

use churn_core::{ChurnError, Result};
use polars::prelude::*;
use tracing::info;

use crate::{SnapshotTable, LABEL_COL, BINARY_COL, TARGET_COL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryLabel {
    Continua,
    /// Customer has no snapshot in the following month.
    Baja1,
    /// Customer appears exactly one more month, then disappears for at
    /// least two months.
    Baja2,
}

impl TernaryLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TernaryLabel::Continua => "CONTINUA",
            TernaryLabel::Baja1 => "BAJA+1",
            TernaryLabel::Baja2 => "BAJA+2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTINUA" => Some(TernaryLabel::Continua),
            "BAJA+1" => Some(TernaryLabel::Baja1),
            "BAJA+2" => Some(TernaryLabel::Baja2),
            _ => None,
        }
    }
}

/// Label every row from the next two snapshots of the same customer.
///
/// With `last` the newest period index table-wide and `secondlast = last - 1`,
/// a row at position `p` whose next snapshots sit at `next1`/`next2`:
///
/// - BAJA+2 when `p < secondlast`, `next1 == p+1` and `next2` is absent or
///   beyond `p+2`;
/// - otherwise BAJA+1 when `p < last` and `next1` is absent or beyond `p+1`;
/// - otherwise CONTINUA when `p < secondlast`;
/// - otherwise null: the two newest global periods cannot be labeled without
///   future data.
///
/// BAJA+2 must win over BAJA+1 on borderline sequences, so it is checked
/// first.
pub fn ternary_labels(table: &SnapshotTable) -> Vec<Option<TernaryLabel>> {
    let positions = table.positions();
    let n = positions.len();
    let mut labels: Vec<Option<TernaryLabel>> = vec![None; n];
    if n == 0 {
        return labels;
    }

    let last = positions.iter().copied().max().unwrap_or(0);
    let secondlast = last - 1;

    for (start, end) in table.partitions() {
        for i in start..end {
            let p = positions[i];
            let next1 = if i + 1 < end { Some(positions[i + 1]) } else { None };
            let next2 = if i + 2 < end { Some(positions[i + 2]) } else { None };

            labels[i] = if p < secondlast
                && next1 == Some(p + 1)
                && next2.map_or(true, |n2| n2 > p + 2)
            {
                Some(TernaryLabel::Baja2)
            } else if p < last && next1.map_or(true, |n1| n1 > p + 1) {
                Some(TernaryLabel::Baja1)
            } else if p < secondlast {
                Some(TernaryLabel::Continua)
            } else {
                None
            };
        }
    }

    labels
}

/// Append the `clase_ternaria` column and report the label mix.
pub fn with_ternary_label(table: SnapshotTable) -> Result<SnapshotTable> {
    let labels = ternary_labels(&table);
    let mut continua = 0usize;
    let mut baja1 = 0usize;
    let mut baja2 = 0usize;
    let mut unknown = 0usize;
    for label in &labels {
        match label {
            Some(TernaryLabel::Continua) => continua += 1,
            Some(TernaryLabel::Baja1) => baja1 += 1,
            Some(TernaryLabel::Baja2) => baja2 += 1,
            None => unknown += 1,
        }
    }
    info!(
        "Ternary labels - CONTINUA: {}, BAJA+1: {}, BAJA+2: {}, unlabeled: {}",
        continua, baja1, baja2, unknown
    );

    let values: Vec<Option<&str>> = labels.iter().map(|l| l.map(|l| l.as_str())).collect();
    let series = Series::new(LABEL_COL.into(), values);
    let SnapshotTable {
        mut df,
        customers,
        positions,
    } = table;
    df.with_column(series)
        .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    Ok(SnapshotTable {
        df,
        customers,
        positions,
    })
}

fn label_column(df: &DataFrame) -> Result<Vec<Option<TernaryLabel>>> {
    let col = df
        .column(LABEL_COL)
        .map_err(|_| ChurnError::DataShape(format!("missing required column {}", LABEL_COL)))?;
    let ca = col
        .as_materialized_series()
        .str()
        .map_err(|e| ChurnError::DataShape(format!("{}: {}", LABEL_COL, e)))?
        .clone();
    Ok(ca
        .into_iter()
        .map(|v| v.and_then(TernaryLabel::parse))
        .collect())
}

/// Derive both binary flags from the ternary label:
/// `clase_binaria` is 1 for any churn (BAJA+1 or BAJA+2), `target` is 1 only
/// for BAJA+2. Pure mapping; nulls propagate. Logs the class balance.
pub fn derive_binary_targets(mut df: DataFrame) -> Result<DataFrame> {
    let labels = label_column(&df)?;

    let attrition: Vec<Option<i32>> = labels
        .iter()
        .map(|l| l.map(|l| if l == TernaryLabel::Continua { 0 } else { 1 }))
        .collect();
    let strict: Vec<Option<i32>> = labels
        .iter()
        .map(|l| l.map(|l| if l == TernaryLabel::Baja2 { 1 } else { 0 }))
        .collect();

    let positives: usize = attrition.iter().flatten().filter(|&&v| v == 1).count();
    let labeled: usize = attrition.iter().flatten().count();
    let strict_positives: usize = strict.iter().flatten().filter(|&&v| v == 1).count();
    if labeled > 0 {
        info!(
            "Binary targets - attrition: {}/{} ({:.2}% positive), strict: {}",
            positives,
            labeled,
            positives as f64 / labeled as f64 * 100.0,
            strict_positives
        );
    }

    df.with_column(Series::new(BINARY_COL.into(), attrition))
        .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    df.with_column(Series::new(TARGET_COL.into(), strict))
        .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    Ok(df)
}

/// Per-row training weights: churn rows sit just above 1.0 so ranked
/// predictions break ties toward them.
pub fn class_weights(df: &DataFrame) -> Result<Vec<f32>> {
    let labels = label_column(df)?;
    Ok(labels
        .iter()
        .map(|l| match l {
            Some(TernaryLabel::Baja2) => 1.00002,
            Some(TernaryLabel::Baja1) => 1.00001,
            _ => 1.0,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_from_rows;

    fn labels_for(rows: &[(i64, i32, f64)]) -> Vec<Option<TernaryLabel>> {
        ternary_labels(&table_from_rows(rows))
    }

    #[test]
    fn test_three_customer_scenario() {
        // Customer 1 continues across all three global periods; customer 2
        // has its last snapshot in the second period; customer 3 appears
        // once and is gone.
        let labels = labels_for(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (1, 202103, 0.0),
            (2, 202101, 0.0),
            (2, 202102, 0.0),
            (3, 202101, 0.0),
        ]);

        // Rows are sorted by (customer, period).
        assert_eq!(labels[0], Some(TernaryLabel::Continua));
        assert_eq!(labels[1], None);
        assert_eq!(labels[2], None);
        assert_eq!(labels[3], Some(TernaryLabel::Baja2));
        assert_eq!(labels[4], Some(TernaryLabel::Baja1));
        assert_eq!(labels[5], Some(TernaryLabel::Baja1));
    }

    #[test]
    fn test_baja2_requires_gap_after_next_month() {
        // Present, present, gap of one month, present again: the customer
        // returns at p+3, which still counts as disappearing at p+2.
        let labels = labels_for(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (1, 202104, 0.0),
            // Stretch the global window so none of the above are in the two
            // newest periods.
            (9, 202101, 0.0),
            (9, 202106, 0.0),
        ]);
        assert_eq!(labels[0], Some(TernaryLabel::Baja2));
        // Row at 202102 has its next snapshot two months out: BAJA+1.
        assert_eq!(labels[1], Some(TernaryLabel::Baja1));
    }

    #[test]
    fn test_baja2_not_fired_when_customer_returns_at_p_plus_2() {
        // Contiguous three months: the first row is plain CONTINUA.
        let labels = labels_for(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (1, 202103, 0.0),
            (9, 202106, 0.0),
        ]);
        assert_eq!(labels[0], Some(TernaryLabel::Continua));
    }

    #[test]
    fn test_labels_are_single_valued_per_row() {
        let table = table_from_rows(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (2, 202101, 0.0),
            (2, 202103, 0.0),
            (3, 202101, 0.0),
            (3, 202102, 0.0),
            (3, 202103, 0.0),
        ]);
        let first = ternary_labels(&table);
        let second = ternary_labels(&table);
        assert_eq!(first, second);
    }

    #[test]
    fn test_binary_targets_and_weights() {
        let table = table_from_rows(&[
            (1, 202101, 0.0),
            (1, 202102, 0.0),
            (1, 202103, 0.0),
            (2, 202101, 0.0),
            (2, 202102, 0.0),
            (3, 202101, 0.0),
        ]);
        let table = with_ternary_label(table).unwrap();
        let weights = class_weights(table.df()).unwrap();
        let df = derive_binary_targets(table.into_df()).unwrap();

        let attrition: Vec<Option<i32>> = df
            .column(BINARY_COL)
            .unwrap()
            .as_materialized_series()
            .i32()
            .unwrap()
            .into_iter()
            .collect();
        let strict: Vec<Option<i32>> = df
            .column(TARGET_COL)
            .unwrap()
            .as_materialized_series()
            .i32()
            .unwrap()
            .into_iter()
            .collect();

        // customer 1: CONTINUA, null, null; customer 2: BAJA+2, BAJA+1;
        // customer 3: BAJA+1.
        assert_eq!(attrition, vec![Some(0), None, None, Some(1), Some(1), Some(1)]);
        assert_eq!(strict, vec![Some(0), None, None, Some(1), Some(0), Some(0)]);
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[3], 1.00002);
        assert_eq!(weights[4], 1.00001);
    }
}
