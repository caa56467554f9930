// Sequential hyperparameter search. One trial runs to completion before the
// next is sampled: the strategy must observe each result to propose the next
// configuration. A trial failure aborts the whole search; there is no retry
// state and no partial-results recovery.

use chrono::Utc;
use churn_core::{ChurnError, Result, TrialJournal, TrialRecord};
use tracing::{error, info};

use crate::cv::{CrossValidator, CvOutcome};
use crate::dataset::DesignMatrix;
use crate::gain::GainParams;
use crate::sampler::{HyperparamConfig, SearchSpace, SearchStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialState {
    Pending,
    Running,
    Complete,
}

impl TrialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialState::Pending => "PENDING",
            TrialState::Running => "RUNNING",
            TrialState::Complete => "COMPLETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BestTrial {
    pub trial_number: usize,
    pub config: HyperparamConfig,
    pub value: f64,
    pub best_iteration: usize,
}

pub struct SearchOrchestrator<'a> {
    strategy: &'a mut dyn SearchStrategy,
    validator: &'a CrossValidator<'a>,
    journal: &'a TrialJournal,
    pub n_trials: usize,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(
        strategy: &'a mut dyn SearchStrategy,
        validator: &'a CrossValidator<'a>,
        journal: &'a TrialJournal,
        n_trials: usize,
    ) -> Self {
        Self {
            strategy,
            validator,
            journal,
            n_trials,
        }
    }

    /// Run the full search and return the best trial.
    pub fn run(
        &mut self,
        space: &SearchSpace,
        data: &DesignMatrix,
        gain: &GainParams,
    ) -> Result<BestTrial> {
        if self.n_trials == 0 {
            return Err(ChurnError::Configuration(
                "N_TRIALS must be at least 1".to_string(),
            ));
        }

        let mut best: Option<BestTrial> = None;
        for trial_number in 0..self.n_trials {
            let mut state = TrialState::Pending;
            tracing::debug!("Trial {} {}", trial_number, state.as_str());
            let config = self.strategy.propose(space);
            state = TrialState::Running;
            info!(
                "Trial {}/{} {}: {:?}",
                trial_number + 1,
                self.n_trials,
                state.as_str(),
                config.values
            );

            let CvOutcome {
                best_mean_gain,
                best_iteration,
            } = self.validator.run(data, &config, gain).map_err(|e| {
                error!("Trial {} failed; aborting search", trial_number);
                ChurnError::Other(anyhow::anyhow!("trial {} failed: {}", trial_number, e))
            })?;
            state = TrialState::Complete;

            self.journal.append(TrialRecord {
                trial_number,
                params: config.to_json(),
                best_iteration: Some(best_iteration),
                value: best_mean_gain,
                datetime: Utc::now().to_rfc3339(),
                state: state.as_str().to_string(),
            })?;
            self.strategy.observe(&config, best_mean_gain);

            let is_best = best
                .as_ref()
                .map_or(true, |b| best_mean_gain > b.value);
            if is_best {
                best = Some(BestTrial {
                    trial_number,
                    config,
                    value: best_mean_gain,
                    best_iteration,
                });
            }
        }

        let best = best.ok_or_else(|| {
            ChurnError::Configuration("search finished without a completed trial".to_string())
        })?;
        info!(
            "Search complete: trial {} with gain {:.0} at iteration {}",
            best.trial_number, best.value, best.best_iteration
        );
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::RandomSampler;
    use churn_core::config::ParamBounds;
    use churn_model::mock::CentroidBackend;
    use polars::prelude::*;
    use std::collections::BTreeMap;

    fn frame() -> DataFrame {
        let n = 100usize;
        let ids: Vec<i64> = (0..n as i64).collect();
        let periods: Vec<i32> = vec![202101; n];
        let xs: Vec<f64> = (0..n)
            .map(|i| if i % 5 == 0 { 10.0 } else { 1.0 + (i % 3) as f64 * 0.1 })
            .collect();
        let labels: Vec<Option<&str>> = (0..n)
            .map(|i| Some(if i % 5 == 0 { "BAJA+2" } else { "CONTINUA" }))
            .collect();
        DataFrame::new(vec![
            Series::new(churn_data::ID_COL.into(), ids).into(),
            Series::new(churn_data::PERIOD_COL.into(), periods).into(),
            Series::new("x".into(), xs).into(),
            Series::new(churn_data::LABEL_COL.into(), labels).into(),
        ])
        .unwrap()
    }

    fn space() -> SearchSpace {
        let mut bounds = BTreeMap::new();
        bounds.insert("num_leaves".to_string(), ParamBounds { min: 8.0, max: 64.0 });
        bounds.insert(
            "learning_rate".to_string(),
            ParamBounds { min: 0.01, max: 0.3 },
        );
        SearchSpace::from_bounds(&bounds)
    }

    fn temp_journal(tag: &str) -> TrialJournal {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "churn_orchestrator_{}_{}.json",
            std::process::id(),
            tag
        ));
        let _ = std::fs::remove_file(&path);
        TrialJournal::new(path)
    }

    const GAIN: GainParams = GainParams {
        reward: 1000.0,
        cost: 100.0,
    };

    #[test]
    fn test_search_journals_every_trial_and_picks_best() {
        let frame = frame();
        let data = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let backend = CentroidBackend;
        let validator = CrossValidator::new(&backend, 42);
        let journal = temp_journal("best");
        let mut strategy = RandomSampler::new(42);

        let mut orchestrator = SearchOrchestrator::new(&mut strategy, &validator, &journal, 5);
        let best = orchestrator.run(&space(), &data, &GAIN).unwrap();

        let records = journal.load().unwrap();
        assert_eq!(records.len(), 5);
        assert!(records.iter().all(|r| r.state == "COMPLETE"));
        let journal_best = journal.best().unwrap().unwrap();
        assert_eq!(journal_best.trial_number, best.trial_number);
        assert!((journal_best.value - best.value).abs() < 1e-9);
        assert_eq!(journal_best.best_iteration, Some(best.best_iteration));
        let _ = std::fs::remove_file(journal.path());
    }

    #[test]
    fn test_failed_trial_aborts_search() {
        let frame = frame();
        // Empty period selection fails inside the validator on first trial.
        let data = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let backend = CentroidBackend;
        let mut validator = CrossValidator::new(&backend, 42);
        validator.n_folds = 200; // more folds than rows
        let journal = temp_journal("abort");
        let mut strategy = RandomSampler::new(42);

        let mut orchestrator = SearchOrchestrator::new(&mut strategy, &validator, &journal, 5);
        let err = orchestrator.run(&space(), &data, &GAIN).unwrap_err();
        assert!(err.to_string().contains("trial 0"));
        assert!(journal.load().unwrap().is_empty());
        let _ = std::fs::remove_file(journal.path());
    }

    #[test]
    fn test_zero_trials_rejected() {
        let frame = frame();
        let data = DesignMatrix::from_frame(&frame, &[202101], "MES_TRAIN").unwrap();
        let backend = CentroidBackend;
        let validator = CrossValidator::new(&backend, 42);
        let journal = temp_journal("zero");
        let mut strategy = RandomSampler::new(42);

        let mut orchestrator = SearchOrchestrator::new(&mut strategy, &validator, &journal, 0);
        let err = orchestrator.run(&space(), &data, &GAIN).unwrap_err();
        assert!(err.to_string().contains("N_TRIALS"));
    }
}
