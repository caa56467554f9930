use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data shape error: {0}")]
    DataShape(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Trial journal error: {0}")]
    Journal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ChurnError>;
