use thiserror::Error;

/// Hard failures that stop a run before any job executes.
///
/// Job failures and missing telemetry are not errors: they are recorded in
/// the run result and surface through the verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BenchError {
    #[error("config error: {0}")]
    Config(String),

    #[error("setup error: {0}")]
    Setup(String),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        BenchError::Setup(msg.into())
    }
}

pub type BenchResult<T> = std::result::Result<T, BenchError>;
