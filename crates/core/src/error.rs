use thiserror::Error;

/// Why a rule's lifecycle was cancelled.
///
/// Recorded exactly once per lifecycle; later cancellations keep the first cause.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    #[error("rule deleted")]
    RuleDeleted,

    #[error("rule restarted")]
    RuleRestarted,

    #[error("scheduler stopped")]
    SchedulerStopped,

    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Rule source error: {0}")]
    RuleSource(String),

    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
