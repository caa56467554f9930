pub mod cv;
pub mod dataset;
pub mod gain;
pub mod holdout;
pub mod orchestrator;
pub mod sampler;

pub use cv::{stratified_folds, CrossValidator, CvOutcome};
pub use dataset::DesignMatrix;
pub use gain::{gain_curve, max_gain, ranking_order, GainCurve, GainParams};
pub use holdout::{
    write_curve_json, write_decisions_csv, CutoffDecision, HoldoutEvaluator, HoldoutReport,
    RankedPrediction,
};
pub use orchestrator::{BestTrial, SearchOrchestrator, TrialState};
pub use sampler::{
    HyperparamConfig, ParamRange, RandomSampler, SearchSpace, SearchStrategy, TpeSampler,
};
