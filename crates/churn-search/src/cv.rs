// Stratified k-fold cross-validation of one hyperparameter configuration,
// scored per boosting iteration with the gain metric and early-stopped on
// the cross-validated mean gain curve.

use anyhow::Context;
use churn_core::{ChurnError, Result};
use churn_model::{EarlyStopper, FittedBooster, GbdtBackend, ParamValue};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::dataset::DesignMatrix;
use crate::gain::{max_gain, GainParams};
use crate::sampler::HyperparamConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvOutcome {
    pub best_mean_gain: f64,
    pub best_iteration: usize,
}

/// Deterministic stratified fold assignment: indices of each class are
/// shuffled with the seeded generator, then dealt round-robin. Same labels
/// and seed always produce the same folds.
pub fn stratified_folds(labels: &[i32], n_folds: usize, seed: u64) -> Vec<usize> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut assignment = vec![0usize; labels.len()];
    for class in [0, 1] {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter_map(|(i, &l)| if l == class { Some(i) } else { None })
            .collect();
        indices.shuffle(&mut rng);
        for (pos, idx) in indices.into_iter().enumerate() {
            assignment[idx] = pos % n_folds;
        }
    }
    assignment
}

pub struct CrossValidator<'a> {
    backend: &'a dyn GbdtBackend,
    pub n_folds: usize,
    pub seed: u64,
    pub max_rounds: usize,
    pub patience: usize,
}

impl<'a> CrossValidator<'a> {
    pub fn new(backend: &'a dyn GbdtBackend, seed: u64) -> Self {
        Self {
            backend,
            n_folds: 5,
            seed,
            max_rounds: 1000,
            patience: 50,
        }
    }

    /// Evaluate one configuration. Returns the best cross-validated mean
    /// gain and the 1-based iteration achieving it.
    pub fn run(
        &self,
        data: &DesignMatrix,
        config: &HyperparamConfig,
        gain: &GainParams,
    ) -> Result<CvOutcome> {
        if data.n_rows() == 0 {
            return Err(ChurnError::DataShape(
                "cross-validation received an empty training partition".to_string(),
            ));
        }
        if data.n_rows() < self.n_folds {
            return Err(ChurnError::DataShape(format!(
                "cross-validation needs at least {} rows, got {}",
                self.n_folds,
                data.n_rows()
            )));
        }

        let assignment = stratified_folds(&data.attrition, self.n_folds, self.seed);

        let mut params = churn_model::base_binary_params(self.seed);
        params.set("num_threads", ParamValue::Int(1));
        config.apply_to(&mut params);

        let mut folds: Vec<FoldEval> = Vec::with_capacity(self.n_folds);
        for fold in 0..self.n_folds {
            let train_rows: Vec<usize> = (0..data.n_rows())
                .filter(|&i| assignment[i] != fold)
                .collect();
            let valid_rows: Vec<usize> = (0..data.n_rows())
                .filter(|&i| assignment[i] == fold)
                .collect();

            let train = data.train_matrix(&train_rows, false);
            let booster = self
                .backend
                .fit(&train, &params, self.max_rounds)
                .with_context(|| format!("fold {} training failed", fold))
                .map_err(ChurnError::Other)?;

            folds.push(FoldEval {
                booster,
                features: data.feature_rows(&valid_rows),
                eligible: data.eligibility(&valid_rows),
            });
        }

        let mut stopper = EarlyStopper::new(self.patience);
        let mut best = CvOutcome {
            best_mean_gain: f64::NEG_INFINITY,
            best_iteration: 0,
        };
        for iteration in 1..=self.max_rounds {
            let mut sum = 0.0;
            for fold in &folds {
                let scores = fold
                    .booster
                    .predict_at(&fold.features, data.n_features, iteration)
                    .map_err(ChurnError::Other)?;
                sum += max_gain(&scores, &fold.eligible, gain);
            }
            let mean = sum / self.n_folds as f64;
            if mean > best.best_mean_gain {
                best = CvOutcome {
                    best_mean_gain: mean,
                    best_iteration: iteration,
                };
            }
            if stopper.check(mean) {
                debug!(
                    "Early stop at iteration {} (best {} at {})",
                    iteration, best.best_mean_gain, best.best_iteration
                );
                break;
            }
        }

        info!(
            "CV done: best mean gain {:.0} at iteration {}",
            best.best_mean_gain, best.best_iteration
        );
        Ok(best)
    }
}

struct FoldEval {
    booster: Box<dyn FittedBooster>,
    features: Vec<f64>,
    eligible: Vec<bool>,
}
