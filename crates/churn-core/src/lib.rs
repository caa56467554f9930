pub mod config;
pub mod domain;
pub mod journal;
pub mod logging;

pub use config::Settings;
pub use domain::errors::{ChurnError, Result};
pub use journal::{TrialJournal, TrialRecord};
