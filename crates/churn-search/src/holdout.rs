// Held-out evaluation of the winning configuration, cutoff selection from
// the cumulative-gain curve, and the final top-K submission.

use std::path::Path;

use churn_core::{ChurnError, Result};
use churn_model::{GbdtBackend, ParamValue};
use polars::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::dataset::DesignMatrix;
use crate::gain::{gain_curve, ranking_order, GainCurve, GainParams};
use crate::sampler::HyperparamConfig;

/// Operating point inside the contact-capacity window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CutoffDecision {
    pub rank: usize,
    pub gain_at_rank: f64,
}

/// One scored held-out customer.
#[derive(Debug, Clone, Serialize)]
pub struct RankedPrediction {
    pub numero_de_cliente: i64,
    pub score: f64,
    pub rank: usize,
    pub contact: i32,
}

#[derive(Debug)]
pub struct HoldoutReport {
    pub curve: GainCurve,
    /// Curve-wide maximum, for reporting.
    pub max_gain: f64,
    pub max_gain_rank: usize,
    /// Operating cutoff restricted to the feasibility window.
    pub cutoff: CutoffDecision,
    pub predictions: Vec<RankedPrediction>,
}

pub struct HoldoutEvaluator<'a> {
    backend: &'a dyn GbdtBackend,
    pub gain: GainParams,
    pub floor_contacts: usize,
    pub ceiling_contacts: usize,
    pub seed: u64,
    /// Weight churn rows slightly above 1.0 during the retrain.
    pub weighted: bool,
}

impl<'a> HoldoutEvaluator<'a> {
    pub fn new(backend: &'a dyn GbdtBackend, gain: GainParams, seed: u64) -> Self {
        Self {
            backend,
            gain,
            floor_contacts: 4000,
            ceiling_contacts: 20_000,
            seed,
            weighted: true,
        }
    }

    fn fit_and_score(
        &self,
        train: &DesignMatrix,
        holdout: &DesignMatrix,
        config: &HyperparamConfig,
        best_iteration: usize,
    ) -> Result<Vec<f64>> {
        if best_iteration == 0 {
            return Err(ChurnError::Model(
                "best_iteration must be at least 1".to_string(),
            ));
        }
        let mut params = churn_model::base_binary_params(self.seed);
        params.set("num_threads", ParamValue::Int(1));
        config.apply_to(&mut params);

        let matrix = train.full_train_matrix(self.weighted);
        let booster = self
            .backend
            .fit(&matrix, &params, best_iteration)
            .map_err(ChurnError::Other)?;
        let rows: Vec<usize> = (0..holdout.n_rows()).collect();
        booster
            .predict(&holdout.feature_rows(&rows), holdout.n_features)
            .map_err(ChurnError::Other)
    }

    /// Retrain on the training periods and read the operating cutoff off the
    /// held-out gain curve.
    pub fn evaluate(
        &self,
        train: &DesignMatrix,
        holdout: &DesignMatrix,
        config: &HyperparamConfig,
        best_iteration: usize,
    ) -> Result<HoldoutReport> {
        let scores = self.fit_and_score(train, holdout, config, best_iteration)?;
        let rows: Vec<usize> = (0..holdout.n_rows()).collect();
        let eligible = holdout.eligibility(&rows);
        let curve = gain_curve(&scores, &eligible, &self.gain);

        let (max_gain, max_gain_rank) = curve.max_gain();
        let (gain_at_rank, rank) =
            curve.max_gain_in_window(self.floor_contacts, self.ceiling_contacts);
        let cutoff = CutoffDecision { rank, gain_at_rank };

        // Contact decision reported against the curve-wide argmax.
        let order = ranking_order(&scores);
        let mut ranks = vec![0usize; scores.len()];
        for (pos, &row) in order.iter().enumerate() {
            ranks[row] = pos + 1;
        }
        let predictions: Vec<RankedPrediction> = (0..scores.len())
            .map(|i| RankedPrediction {
                numero_de_cliente: holdout.customer_ids[i],
                score: scores[i],
                rank: ranks[i],
                contact: if ranks[i] <= max_gain_rank { 1 } else { 0 },
            })
            .collect();

        info!(
            "Holdout: max gain {:.0} at rank {}; window [{}, {}] cutoff {} ({:.0})",
            max_gain,
            max_gain_rank,
            self.floor_contacts,
            self.ceiling_contacts,
            cutoff.rank,
            cutoff.gain_at_rank
        );

        Ok(HoldoutReport {
            curve,
            max_gain,
            max_gain_rank,
            cutoff,
            predictions,
        })
    }

    /// Final retrain + prediction with a fixed cutoff rank. The prediction
    /// period has no labels; the decision is purely rank <= k_corte.
    pub fn predict_top_k(
        &self,
        train: &DesignMatrix,
        predict: &DesignMatrix,
        config: &HyperparamConfig,
        best_iteration: usize,
        k_corte: usize,
    ) -> Result<Vec<RankedPrediction>> {
        let scores = self.fit_and_score(train, predict, config, best_iteration)?;
        let order = ranking_order(&scores);
        let cut = k_corte.min(scores.len());
        let mut ranks = vec![0usize; scores.len()];
        for (pos, &row) in order.iter().enumerate() {
            ranks[row] = pos + 1;
        }
        let predictions: Vec<RankedPrediction> = (0..scores.len())
            .map(|i| RankedPrediction {
                numero_de_cliente: predict.customer_ids[i],
                score: scores[i],
                rank: ranks[i],
                contact: if ranks[i] <= cut { 1 } else { 0 },
            })
            .collect();
        info!(
            "Final predictions: {} rows, contacting top {}",
            predictions.len(),
            cut
        );
        Ok(predictions)
    }
}

/// Two-column decision table `(numero_de_cliente, contact)`.
pub fn write_decisions_csv(
    predictions: &[RankedPrediction],
    header: &str,
    path: impl AsRef<Path>,
) -> Result<()> {
    let ids: Vec<i64> = predictions.iter().map(|p| p.numero_de_cliente).collect();
    let flags: Vec<i32> = predictions.iter().map(|p| p.contact).collect();
    let mut df = DataFrame::new(vec![
        Series::new("numero_de_cliente".into(), ids).into(),
        Series::new(header.into(), flags).into(),
    ])
    .map_err(|e| ChurnError::DataShape(e.to_string()))?;
    churn_data::write_csv(&mut df, path)
}

/// Gain-curve artifact: values only, rendering is someone else's job.
pub fn write_curve_json(curve: &GainCurve, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChurnError::Journal(format!("{}: {}", parent.display(), e)))?;
        }
    }
    let json = serde_json::to_string(&curve.cumulative)
        .map_err(|e| ChurnError::Journal(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ChurnError::Journal(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use churn_model::mock::CentroidBackend;

    fn frame(n: usize, train_period: i32, test_period: i32) -> DataFrame {
        let mut ids = Vec::new();
        let mut periods = Vec::new();
        let mut xs = Vec::new();
        let mut labels: Vec<Option<&str>> = Vec::new();
        for period in [train_period, test_period] {
            for i in 0..n {
                ids.push((i + 1) as i64);
                periods.push(period);
                let churner = i % 4 == 0;
                let wiggle = (i % 9) as f64 * 0.05;
                xs.push(if churner { 8.0 + wiggle } else { 1.0 + wiggle });
                labels.push(Some(if churner { "BAJA+2" } else { "CONTINUA" }));
            }
        }
        DataFrame::new(vec![
            Series::new(churn_data::ID_COL.into(), ids).into(),
            Series::new(churn_data::PERIOD_COL.into(), periods).into(),
            Series::new("x".into(), xs).into(),
            Series::new(churn_data::LABEL_COL.into(), labels).into(),
        ])
        .unwrap()
    }

    const GAIN: GainParams = GainParams {
        reward: 1000.0,
        cost: 100.0,
    };

    fn config() -> HyperparamConfig {
        let mut config = HyperparamConfig::default();
        config.values.insert("learning_rate".to_string(), 0.1);
        config
    }

    #[test]
    fn test_cutoff_lies_within_window() {
        let frame = frame(80, 202101, 202102);
        let train = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let holdout = DesignMatrix::from_frame(&frame, &[202102], "MES_TEST").unwrap();
        let backend = CentroidBackend;
        let mut evaluator = HoldoutEvaluator::new(&backend, GAIN, 42);
        evaluator.floor_contacts = 10;
        evaluator.ceiling_contacts = 30;

        let report = evaluator.evaluate(&train, &holdout, &config(), 50).unwrap();
        assert!(report.cutoff.rank >= 10 && report.cutoff.rank <= 30);
        assert_eq!(report.curve.cumulative.len(), 80);
        // Ranked churners first: the curve climbs before it decays.
        assert!(report.max_gain > 0.0);
    }

    #[test]
    fn test_contact_decision_follows_global_argmax() {
        let frame = frame(80, 202101, 202102);
        let train = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let holdout = DesignMatrix::from_frame(&frame, &[202102], "MES_TEST").unwrap();
        let backend = CentroidBackend;
        let mut evaluator = HoldoutEvaluator::new(&backend, GAIN, 42);
        evaluator.floor_contacts = 1;
        evaluator.ceiling_contacts = 80;

        let report = evaluator.evaluate(&train, &holdout, &config(), 50).unwrap();
        let contacted = report.predictions.iter().filter(|p| p.contact == 1).count();
        assert_eq!(contacted, report.max_gain_rank);
        for p in &report.predictions {
            assert_eq!(p.contact == 1, p.rank <= report.max_gain_rank);
        }
    }

    #[test]
    fn test_top_k_respects_fixed_cut() {
        let frame = frame(60, 202101, 202106);
        let train = DesignMatrix::from_frame(&frame, &[202101], "FINAL_TRAIN").unwrap();
        let predict = DesignMatrix::from_frame(&frame, &[202106], "FINAL_PREDIC").unwrap();
        let backend = CentroidBackend;
        let evaluator = HoldoutEvaluator::new(&backend, GAIN, 42);

        let predictions = evaluator
            .predict_top_k(&train, &predict, &config(), 50, 15)
            .unwrap();
        assert_eq!(predictions.len(), 60);
        assert_eq!(predictions.iter().filter(|p| p.contact == 1).count(), 15);
    }

    #[test]
    fn test_zero_iteration_rejected() {
        let frame = frame(60, 202101, 202102);
        let train = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let holdout = DesignMatrix::from_frame(&frame, &[202102], "MES_TEST").unwrap();
        let backend = CentroidBackend;
        let evaluator = HoldoutEvaluator::new(&backend, GAIN, 42);
        let err = evaluator.evaluate(&train, &holdout, &config(), 0).unwrap_err();
        assert!(err.to_string().contains("best_iteration"));
    }

    #[test]
    fn test_artifact_writers() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("churn_holdout_{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);

        let predictions = vec![
            RankedPrediction {
                numero_de_cliente: 1,
                score: 0.9,
                rank: 1,
                contact: 1,
            },
            RankedPrediction {
                numero_de_cliente: 2,
                score: 0.1,
                rank: 2,
                contact: 0,
            },
        ];
        let csv_path = dir.join("decisions.csv");
        write_decisions_csv(&predictions, "contact", &csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(content.starts_with("numero_de_cliente,contact"));
        assert!(content.contains("1,1"));

        let curve = GainCurve {
            cumulative: vec![10.0, 20.0, 15.0],
        };
        let json_path = dir.join("curve.json");
        write_curve_json(&curve, &json_path).unwrap();
        let values: Vec<f64> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(values, vec![10.0, 20.0, 15.0]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
