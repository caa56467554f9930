// Search strategies for the hyperparameter loop, behind one
// propose/observe contract so the algorithm is swappable.
//
// `TpeSampler` is a compact Tree-structured Parzen Estimator: after a few
// random startup trials it splits history at the gamma quantile, fits one
// Parzen mixture to the good configurations and one to the rest, and keeps
// the candidate with the best good/bad density ratio.

use std::collections::BTreeMap;

use churn_core::config::{ParamBounds, Settings};
use churn_model::{BoosterParams, ParamValue};
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::debug;

/// Integer-valued parameters; everything else samples as a float.
const INTEGER_PARAMS: [&str; 2] = ["num_leaves", "min_data_in_leaf"];
/// Parameters searched on a log scale.
const LOG_PARAMS: [&str; 1] = ["learning_rate"];

#[derive(Debug, Clone)]
pub struct ParamRange {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub integer: bool,
    pub log_scale: bool,
}

impl ParamRange {
    fn to_internal(&self, x: f64) -> f64 {
        if self.log_scale {
            x.ln()
        } else {
            x
        }
    }

    fn from_internal(&self, u: f64) -> f64 {
        let x = if self.log_scale { u.exp() } else { u };
        let x = x.clamp(self.min, self.max);
        if self.integer {
            x.round()
        } else {
            x
        }
    }

    fn internal_bounds(&self) -> (f64, f64) {
        (self.to_internal(self.min), self.to_internal(self.max))
    }
}

#[derive(Debug, Clone)]
pub struct SearchSpace {
    pub params: Vec<ParamRange>,
}

impl SearchSpace {
    /// Build from the configured `{param: {min, max}}` bounds.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_bounds(&settings.parametros_lgb)
    }

    pub fn from_bounds(bounds: &BTreeMap<String, ParamBounds>) -> Self {
        let params = bounds
            .iter()
            .map(|(name, b)| ParamRange {
                name: name.clone(),
                min: b.min,
                max: b.max,
                integer: INTEGER_PARAMS.contains(&name.as_str()),
                log_scale: LOG_PARAMS.contains(&name.as_str()) && b.min > 0.0,
            })
            .collect();
        Self { params }
    }
}

/// One sampled configuration, keyed by parameter name. Integer parameters
/// hold already-rounded values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HyperparamConfig {
    pub values: BTreeMap<String, f64>,
}

impl HyperparamConfig {
    pub fn apply_to(&self, params: &mut BoosterParams) {
        for (name, value) in &self.values {
            if INTEGER_PARAMS.contains(&name.as_str()) {
                params.set(name, ParamValue::Int(*value as i64));
            } else {
                params.set(name, ParamValue::Float(*value));
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or_default()
    }
}

pub trait SearchStrategy {
    fn propose(&mut self, space: &SearchSpace) -> HyperparamConfig;
    fn observe(&mut self, config: &HyperparamConfig, value: f64);
}

// ============================================================================
// RANDOM SEARCH
// ============================================================================

pub struct RandomSampler {
    rng: rand::rngs::StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self, range: &ParamRange) -> f64 {
        let (lo, hi) = range.internal_bounds();
        let u = if lo < hi {
            self.rng.gen_range(lo..hi)
        } else {
            lo
        };
        range.from_internal(u)
    }
}

impl SearchStrategy for RandomSampler {
    fn propose(&mut self, space: &SearchSpace) -> HyperparamConfig {
        let mut config = HyperparamConfig::default();
        for range in &space.params {
            config.values.insert(range.name.clone(), self.draw(range));
        }
        config
    }

    fn observe(&mut self, _config: &HyperparamConfig, _value: f64) {}
}

// ============================================================================
// TREE-STRUCTURED PARZEN ESTIMATOR
// ============================================================================

pub struct TpeSampler {
    rng: rand::rngs::StdRng,
    pub n_startup: usize,
    pub gamma: f64,
    pub n_candidates: usize,
    history: Vec<(HyperparamConfig, f64)>,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: rand::rngs::StdRng::seed_from_u64(seed),
            n_startup: 10,
            gamma: 0.25,
            n_candidates: 24,
            history: Vec::new(),
        }
    }

    fn random_value(&mut self, range: &ParamRange) -> f64 {
        let (lo, hi) = range.internal_bounds();
        let u = if lo < hi {
            self.rng.gen_range(lo..hi)
        } else {
            lo
        };
        range.from_internal(u)
    }

    /// Parzen mixture over internal-scale observations: one Gaussian per
    /// observation with a shared range-derived bandwidth.
    fn log_density(observations: &[f64], bandwidth: f64, u: f64) -> f64 {
        let mut acc = 0.0;
        for &o in observations {
            let z = (u - o) / bandwidth;
            acc += (-0.5 * z * z).exp();
        }
        ((acc / observations.len() as f64) / bandwidth).max(1e-300).ln()
    }

    fn propose_param(&mut self, range: &ParamRange, good: &[f64], bad: &[f64]) -> f64 {
        let (lo, hi) = range.internal_bounds();
        let span = (hi - lo).max(1e-12);
        let bandwidth = (span / (good.len() as f64).sqrt()).max(span * 0.05);

        let normals: Vec<Normal<f64>> = good
            .iter()
            .map(|&mean| Normal::new(mean, bandwidth).expect("finite bandwidth"))
            .collect();

        let mut best_u = lo + span * 0.5;
        let mut best_score = f64::NEG_INFINITY;
        for _ in 0..self.n_candidates {
            let component = self.rng.gen_range(0..normals.len());
            let u = normals[component].sample(&mut self.rng).clamp(lo, hi);
            let score = Self::log_density(good, bandwidth, u)
                - Self::log_density(bad, bandwidth, u);
            if score > best_score {
                best_score = score;
                best_u = u;
            }
        }
        range.from_internal(best_u)
    }
}

impl SearchStrategy for TpeSampler {
    fn propose(&mut self, space: &SearchSpace) -> HyperparamConfig {
        if self.history.len() < self.n_startup {
            let mut config = HyperparamConfig::default();
            for range in &space.params {
                let value = self.random_value(range);
                config.values.insert(range.name.clone(), value);
            }
            return config;
        }

        // Maximize: best observations form the "good" split.
        let mut ranked: Vec<usize> = (0..self.history.len()).collect();
        ranked.sort_by(|&a, &b| {
            self.history[b]
                .1
                .partial_cmp(&self.history[a].1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n_good = ((self.history.len() as f64 * self.gamma).ceil() as usize)
            .clamp(1, self.history.len() - 1);
        let good_idx = &ranked[..n_good];
        let bad_idx = &ranked[n_good..];

        let mut config = HyperparamConfig::default();
        for range in &space.params {
            let collect = |idx: &[usize], sampler: &Self| -> Vec<f64> {
                idx.iter()
                    .filter_map(|&i| sampler.history[i].0.values.get(&range.name))
                    .map(|&x| range.to_internal(x))
                    .collect()
            };
            let good = collect(good_idx, self);
            let bad = collect(bad_idx, self);
            let value = if good.is_empty() || bad.is_empty() {
                self.random_value(range)
            } else {
                self.propose_param(range, &good, &bad)
            };
            config.values.insert(range.name.clone(), value);
        }
        debug!("TPE proposal from {} observations: {:?}", self.history.len(), config.values);
        config
    }

    fn observe(&mut self, config: &HyperparamConfig, value: f64) {
        self.history.push((config.clone(), value));
    }
}
