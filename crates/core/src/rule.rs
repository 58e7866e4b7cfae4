use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic configuration version of a rule.
pub type RuleVersion = i64;

/// Identity of a schedulable rule: tenant scope plus rule uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub org_id: i64,
    pub uid: String,
}

impl RuleKey {
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.uid)
    }
}

/// A rule as the rule store hands it to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    #[serde(flatten)]
    pub key: RuleKey,
    pub title: String,
    pub version: RuleVersion,
    /// Evaluation interval. Expected to be a multiple of the base interval.
    pub interval_seconds: u64,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub folder_title: Option<String>,
}

/// One evaluation request for a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationSignal {
    /// Tick the evaluation was scheduled for.
    pub scheduled_at: DateTime<Utc>,
    /// Snapshot of the rule resolved by the dispatcher at tick time.
    pub rule: Arc<RuleDefinition>,
}

impl EvaluationSignal {
    pub fn new(scheduled_at: DateTime<Utc>, rule: Arc<RuleDefinition>) -> Self {
        Self { scheduled_at, rule }
    }

    pub fn folder_title(&self) -> Option<&str> {
        self.rule.folder_title.as_deref()
    }
}

/// Latest configuration version and pause status of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSignal {
    pub version: RuleVersion,
    pub is_paused: bool,
}

impl From<&RuleDefinition> for VersionSignal {
    fn from(rule: &RuleDefinition) -> Self {
        Self {
            version: rule.version,
            is_paused: rule.is_paused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_key_equality_is_by_value() {
        assert_eq!(RuleKey::new(1, "abc"), RuleKey::new(1, "abc"));
        assert_ne!(RuleKey::new(1, "abc"), RuleKey::new(2, "abc"));
        assert_eq!(RuleKey::new(7, "cpu-high").to_string(), "7/cpu-high");
    }

    #[test]
    fn rule_definition_parses_flattened_key() {
        let json = r#"{"org_id": 3, "uid": "disk", "title": "Disk full", "version": 4, "interval_seconds": 60}"#;
        let rule: RuleDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(rule.key, RuleKey::new(3, "disk"));
        assert!(!rule.is_paused);
        assert_eq!(rule.folder_title, None);
        assert_eq!(
            VersionSignal::from(&rule),
            VersionSignal {
                version: 4,
                is_paused: false
            }
        );
    }

    #[test]
    fn evaluation_signal_reads_folder_from_snapshot() {
        let rule = Arc::new(RuleDefinition {
            key: RuleKey::new(1, "a"),
            title: "A".into(),
            version: 1,
            interval_seconds: 10,
            is_paused: false,
            folder_title: Some("infra".into()),
        });
        let signal = EvaluationSignal::new(Utc::now(), rule);
        assert_eq!(signal.folder_title(), Some("infra"));
    }
}
