// Boosted-tree training collaborator.
//
// Cross-validation and the holdout evaluation speak to the model through
// `GbdtBackend`/`FittedBooster`; LightGBM is the production implementation,
// compiled in behind the `lightgbm` feature.

use std::collections::BTreeMap;

use anyhow::Result;

#[cfg(feature = "lightgbm")]
use anyhow::Context;
#[cfg(feature = "lightgbm")]
use lightgbm3::{Booster as LgbmBooster, Dataset as LgbmDataset};
#[cfg(feature = "lightgbm")]
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::Int(v) => serde_json::json!(v),
            ParamValue::Float(v) => serde_json::json!(v),
            ParamValue::Str(v) => serde_json::json!(v),
            ParamValue::Bool(v) => serde_json::json!(v),
        }
    }
}

/// Full parameter set for one training run: fixed objective parameters plus
/// the sampled hyperparameters, keyed by their LightGBM names.
#[derive(Debug, Clone)]
pub struct BoosterParams {
    pub values: BTreeMap<String, ParamValue>,
}

impl BoosterParams {
    pub fn set(&mut self, name: &str, value: ParamValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.values {
            map.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Fixed binary-objective parameters shared by every trial; the sampled
/// hyperparameters are layered on top.
pub fn base_binary_params(seed: u64) -> BoosterParams {
    let mut params = BoosterParams {
        values: BTreeMap::new(),
    };
    params.set("objective", ParamValue::Str("binary".to_string()));
    params.set("metric", ParamValue::Str("none".to_string()));
    params.set("boosting_type", ParamValue::Str("gbdt".to_string()));
    params.set("first_metric_only", ParamValue::Bool(true));
    params.set("boost_from_average", ParamValue::Bool(true));
    params.set("feature_pre_filter", ParamValue::Bool(false));
    params.set("max_bin", ParamValue::Int(31));
    params.set("seed", ParamValue::Int(seed as i64));
    params.set("deterministic", ParamValue::Bool(true));
    params.set("verbosity", ParamValue::Int(-1));
    params
}

/// Row-major design matrix handed to the backend. Nulls arrive as NaN and
/// are the backend's to treat as missing values.
#[derive(Debug, Clone)]
pub struct TrainMatrix {
    pub features: Vec<f64>,
    pub n_features: usize,
    pub labels: Vec<f32>,
    pub weights: Option<Vec<f32>>,
}

impl TrainMatrix {
    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.features.len() / self.n_features
        }
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.features[i * self.n_features..(i + 1) * self.n_features]
    }
}

pub trait FittedBooster: Send {
    /// Churn probabilities for a row-major feature block, using every
    /// trained iteration.
    fn predict(&self, features: &[f64], n_features: usize) -> Result<Vec<f64>>;

    /// Same, truncated to the first `iteration` boosting rounds.
    fn predict_at(&self, features: &[f64], n_features: usize, iteration: usize)
        -> Result<Vec<f64>>;

    fn save(&self, path: &std::path::Path) -> Result<()>;
}

pub trait GbdtBackend: Send + Sync {
    fn fit(
        &self,
        data: &TrainMatrix,
        params: &BoosterParams,
        num_rounds: usize,
    ) -> Result<Box<dyn FittedBooster>>;
}

// ============================================================================
// LIGHTGBM IMPLEMENTATION
// ============================================================================

#[cfg(feature = "lightgbm")]
pub struct LightGbmBackend;

#[cfg(feature = "lightgbm")]
struct LightGbmFitted {
    booster: LgbmBooster,
}

#[cfg(feature = "lightgbm")]
impl GbdtBackend for LightGbmBackend {
    fn fit(
        &self,
        data: &TrainMatrix,
        params: &BoosterParams,
        num_rounds: usize,
    ) -> Result<Box<dyn FittedBooster>> {
        let n_rows = data.n_rows();
        let rows: Vec<Vec<f64>> = (0..n_rows).map(|i| data.row(i).to_vec()).collect();
        let mut dataset = LgbmDataset::from_vec_of_vec(rows, data.labels.clone(), true)
            .context("failed to build LightGBM dataset")?;
        if let Some(weights) = &data.weights {
            dataset
                .set_weights(weights)
                .context("failed to set LightGBM row weights")?;
        }

        let mut json = params.to_json();
        json["num_iterations"] = serde_json::json!(num_rounds);
        debug!("LightGBM params: {}", json);

        let booster =
            LgbmBooster::train(dataset, &json).context("LightGBM training failed")?;
        Ok(Box::new(LightGbmFitted { booster }))
    }
}

#[cfg(feature = "lightgbm")]
impl FittedBooster for LightGbmFitted {
    fn predict(&self, features: &[f64], n_features: usize) -> Result<Vec<f64>> {
        self.booster
            .predict(features, n_features as i32, true)
            .context("LightGBM prediction failed")
    }

    fn predict_at(
        &self,
        features: &[f64],
        n_features: usize,
        iteration: usize,
    ) -> Result<Vec<f64>> {
        self.booster
            .predict_with_params(
                features,
                n_features as i32,
                true,
                &format!("num_iteration={}", iteration),
            )
            .context("LightGBM prediction failed")
    }

    fn save(&self, path: &std::path::Path) -> Result<()> {
        self.booster
            .save_file(path.to_str().context("invalid model path")?)
            .context("failed to save LightGBM model")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_params_carry_seed_and_objective() {
        let params = base_binary_params(7);
        let json = params.to_json();
        assert_eq!(json["objective"], "binary");
        assert_eq!(json["seed"], 7);
        assert_eq!(json["max_bin"], 31);
    }

    #[test]
    fn test_sampled_params_layer_over_base() {
        let mut params = base_binary_params(7);
        params.set("num_leaves", ParamValue::Int(64));
        params.set("learning_rate", ParamValue::Float(0.05));
        assert_eq!(params.get_f64("num_leaves"), Some(64.0));
        assert_eq!(params.get_f64("learning_rate"), Some(0.05));
        assert_eq!(params.get_f64("missing"), None);
    }

    #[test]
    fn test_train_matrix_rows() {
        let matrix = TrainMatrix {
            features: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            n_features: 3,
            labels: vec![0.0, 1.0],
            weights: None,
        };
        assert_eq!(matrix.n_rows(), 2);
        assert_eq!(matrix.row(1), &[4.0, 5.0, 6.0]);
    }
}
