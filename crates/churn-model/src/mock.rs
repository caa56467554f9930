// Deterministic synthetic backend for exercising the selection loop without
// a native LightGBM build. Scores are a class-centroid projection of the
// features; more iterations sharpen the projection toward its asymptote, so
// evaluation curves improve and then flatten like a real boosting run.

use anyhow::{bail, Result};

use crate::booster::{BoosterParams, FittedBooster, GbdtBackend, TrainMatrix};

pub struct CentroidBackend;

struct CentroidFitted {
    direction: Vec<f64>,
    num_rounds: usize,
    learning_rate: f64,
}

fn finite(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl GbdtBackend for CentroidBackend {
    fn fit(
        &self,
        data: &TrainMatrix,
        params: &BoosterParams,
        num_rounds: usize,
    ) -> Result<Box<dyn FittedBooster>> {
        let n_rows = data.n_rows();
        if n_rows == 0 {
            bail!("empty training matrix");
        }

        let n = data.n_features;
        let mut pos = vec![0.0f64; n];
        let mut neg = vec![0.0f64; n];
        let mut n_pos = 0usize;
        let mut n_neg = 0usize;
        for i in 0..n_rows {
            let row = data.row(i);
            let weight = data
                .weights
                .as_ref()
                .map(|w| w[i] as f64)
                .unwrap_or(1.0);
            if data.labels[i] > 0.5 {
                for j in 0..n {
                    pos[j] += finite(row[j]) * weight;
                }
                n_pos += 1;
            } else {
                for j in 0..n {
                    neg[j] += finite(row[j]) * weight;
                }
                n_neg += 1;
            }
        }

        let direction: Vec<f64> = (0..n)
            .map(|j| {
                let p = if n_pos > 0 { pos[j] / n_pos as f64 } else { 0.0 };
                let q = if n_neg > 0 { neg[j] / n_neg as f64 } else { 0.0 };
                p - q
            })
            .collect();

        Ok(Box::new(CentroidFitted {
            direction,
            num_rounds,
            learning_rate: params.get_f64("learning_rate").unwrap_or(0.1),
        }))
    }
}

impl CentroidFitted {
    fn scores(&self, features: &[f64], n_features: usize, iteration: usize) -> Vec<f64> {
        let iteration = iteration.min(self.num_rounds).max(1);
        features
            .chunks(n_features)
            .map(|row| {
                // Later features ramp in more slowly, so the ranking keeps
                // shifting over early iterations before it converges.
                let logit: f64 = row
                    .iter()
                    .zip(self.direction.iter())
                    .enumerate()
                    .map(|(j, (x, d))| {
                        let rate = self.learning_rate * iteration as f64 / (j + 1) as f64;
                        finite(*x) * d * (1.0 - (-rate).exp())
                    })
                    .sum();
                1.0 / (1.0 + (-logit).exp())
            })
            .collect()
    }
}

impl FittedBooster for CentroidFitted {
    fn predict(&self, features: &[f64], n_features: usize) -> Result<Vec<f64>> {
        Ok(self.scores(features, n_features, self.num_rounds))
    }

    fn predict_at(
        &self,
        features: &[f64],
        n_features: usize,
        iteration: usize,
    ) -> Result<Vec<f64>> {
        Ok(self.scores(features, n_features, iteration))
    }

    fn save(&self, _path: &std::path::Path) -> Result<()> {
        Ok(())
    }
}
