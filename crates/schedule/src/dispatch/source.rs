use std::path::PathBuf;

use alertsched_core::{RuleDefinition, ScheduleError};
use async_trait::async_trait;

/// Supplies the current set of schedulable rules.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<RuleDefinition>, ScheduleError>;
}

/// Fixed rule set, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<RuleDefinition>,
}

impl StaticRuleSource {
    pub fn new(rules: Vec<RuleDefinition>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl RuleSource for StaticRuleSource {
    async fn fetch(&self) -> Result<Vec<RuleDefinition>, ScheduleError> {
        Ok(self.rules.clone())
    }
}

/// Reads a JSON array of rules from disk on every fetch, so edits are picked
/// up on the next tick.
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RuleSource for FileRuleSource {
    async fn fetch(&self) -> Result<Vec<RuleDefinition>, ScheduleError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ScheduleError::RuleSource(format!("{}: {}", self.path.display(), e))
        })?;
        let rules: Vec<RuleDefinition> = serde_json::from_str(&content)?;
        Ok(rules)
    }
}
