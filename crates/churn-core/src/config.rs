// Run configuration for the churn pipeline.
//
// A single YAML document is parsed once at startup into an immutable
// `Settings` value; every stage receives it by reference. The uppercase key
// names are the on-disk contract shared with the dataset tooling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::errors::{ChurnError, Result};

/// Accepts either a scalar or a list; scalars become one-element lists.
fn one_or_many<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        One(T),
        Many(Vec<T>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(v) => vec![v],
        OneOrMany::Many(v) => v,
    })
}

/// Inclusive bounds for one searched hyperparameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "STUDY_NAME")]
    pub study_name: String,
    #[serde(rename = "DATA_PATH")]
    pub data_path: PathBuf,
    /// Seeds, scalar or list; the first entry drives fold assignment and
    /// the sampler.
    #[serde(rename = "SEMILLA", deserialize_with = "one_or_many")]
    pub semilla: Vec<u64>,
    #[serde(rename = "MES_TRAIN", deserialize_with = "one_or_many")]
    pub mes_train: Vec<i32>,
    #[serde(rename = "MES_TEST", deserialize_with = "one_or_many")]
    pub mes_test: Vec<i32>,
    /// Gain for contacting a customer that actually churns.
    #[serde(rename = "GANANCIA_ACIERTO")]
    pub ganancia_acierto: f64,
    /// Cost of contacting a customer that stays.
    #[serde(rename = "COSTO_ESTIMULO")]
    pub costo_estimulo: f64,
    #[serde(rename = "FINAL_TRAIN", deserialize_with = "one_or_many")]
    pub final_train: Vec<i32>,
    #[serde(rename = "FINAL_PREDIC")]
    pub final_predic: i32,
    #[serde(rename = "N_TRIALS")]
    pub n_trials: usize,
    /// Operational contact-capacity window for the cutoff decision.
    #[serde(rename = "PISO_ENVIOS")]
    pub piso_envios: usize,
    #[serde(rename = "TECHO_ENVIOS")]
    pub techo_envios: usize,
    /// Fixed cutoff rank for the final submission.
    #[serde(rename = "K_CORTE")]
    pub k_corte: usize,
    #[serde(rename = "PARAMETROS_LGB")]
    pub parametros_lgb: BTreeMap<String, ParamBounds>,
    #[serde(rename = "RESULTADOS_DIR")]
    pub resultados_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let mut parametros_lgb = BTreeMap::new();
        for (name, min, max) in [
            ("num_leaves", 8.0, 256.0),
            ("learning_rate", 0.01, 0.3),
            ("feature_fraction", 0.1, 1.0),
            ("bagging_fraction", 0.1, 1.0),
            ("min_data_in_leaf", 50.0, 4000.0),
        ] {
            parametros_lgb.insert(name.to_string(), ParamBounds { min, max });
        }

        Self {
            study_name: "wednesday".to_string(),
            data_path: PathBuf::from("datasets/competencia_01.csv"),
            semilla: vec![42],
            mes_train: vec![202102],
            mes_test: vec![202104],
            ganancia_acierto: 0.0,
            costo_estimulo: 0.0,
            final_train: vec![202101, 202102, 202103, 202104],
            final_predic: 202106,
            n_trials: 20,
            piso_envios: 4000,
            techo_envios: 20_000,
            k_corte: 9500,
            parametros_lgb,
            resultados_dir: PathBuf::from("resultados"),
        }
    }
}

impl Settings {
    /// Load settings from a YAML config file.
    pub fn from_yaml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChurnError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let settings: Settings = serde_yaml_ng::from_str(&content)
            .map_err(|e| ChurnError::Configuration(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from the file named by CONFIG_FILE, falling back to conf.yaml.
    pub fn load() -> Result<Self> {
        let config_file = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "conf.yaml".to_string());
        Self::from_yaml(&config_file)
    }

    /// Primary seed used for fold assignment, training and the sampler.
    pub fn seed(&self) -> u64 {
        self.semilla.first().copied().unwrap_or(42)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ganancia_acierto <= 0.0 {
            return Err(ChurnError::Configuration(
                "GANANCIA_ACIERTO must be set to a positive value".to_string(),
            ));
        }
        if self.costo_estimulo < 0.0 {
            return Err(ChurnError::Configuration(
                "COSTO_ESTIMULO must be zero or positive".to_string(),
            ));
        }
        if self.semilla.is_empty() {
            return Err(ChurnError::Configuration(
                "SEMILLA must contain at least one seed".to_string(),
            ));
        }
        if self.mes_train.is_empty() {
            return Err(ChurnError::Configuration(
                "MES_TRAIN must name at least one period".to_string(),
            ));
        }
        if self.mes_test.is_empty() {
            return Err(ChurnError::Configuration(
                "MES_TEST must name at least one period".to_string(),
            ));
        }
        if self.piso_envios > self.techo_envios {
            return Err(ChurnError::Configuration(format!(
                "PISO_ENVIOS ({}) must not exceed TECHO_ENVIOS ({})",
                self.piso_envios, self.techo_envios
            )));
        }
        for (name, bounds) in &self.parametros_lgb {
            if !(bounds.min.is_finite() && bounds.max.is_finite()) || bounds.min > bounds.max {
                return Err(ChurnError::Configuration(format!(
                    "PARAMETROS_LGB.{}: invalid bounds [{}, {}]",
                    name, bounds.min, bounds.max
                )));
            }
        }
        for required in ["num_leaves", "learning_rate", "feature_fraction", "bagging_fraction"] {
            if !self.parametros_lgb.contains_key(required) {
                return Err(ChurnError::Configuration(format!(
                    "PARAMETROS_LGB is missing bounds for {}",
                    required
                )));
            }
        }
        Ok(())
    }
}
