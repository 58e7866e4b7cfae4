use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt<F>(lookup: &F, profile: &str, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_u64<F>(lookup: &F, profile: &str, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    profiled_opt(lookup, profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ── Scheduler config ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Dispatcher tick period. Rule intervals are multiples of it.
    pub base_interval: Duration,
    /// Evaluation attempts per trigger before the routine gives up.
    pub max_attempts: u32,
    /// Caller-side bound on a single trigger/reconfigure handoff.
    pub dispatch_timeout: Option<Duration>,
    /// How long shutdown waits for evaluation routines to exit.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            base_interval: Duration::from_secs(10),
            max_attempts: 3,
            dispatch_timeout: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `ALERTSCHED_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("ALERTSCHED_PROFILE").unwrap_or_default();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        Self::from_lookup(profile, |key| env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(profile: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let defaults = Self::default();

        let dispatch_timeout_ms = profiled_u64(&lookup, p, "ALERTSCHED_DISPATCH_TIMEOUT_MS", 0);
        let max_attempts = profiled_u64(
            &lookup,
            p,
            "ALERTSCHED_MAX_ATTEMPTS",
            defaults.max_attempts as u64,
        );

        Self {
            profile: p.to_string(),
            base_interval: Duration::from_secs(profiled_u64(
                &lookup,
                p,
                "ALERTSCHED_BASE_INTERVAL_SECS",
                defaults.base_interval.as_secs(),
            )),
            max_attempts: u32::try_from(max_attempts).unwrap_or(u32::MAX),
            dispatch_timeout: (dispatch_timeout_ms > 0)
                .then(|| Duration::from_millis(dispatch_timeout_ms)),
            shutdown_timeout: Duration::from_secs(profiled_u64(
                &lookup,
                p,
                "ALERTSCHED_SHUTDOWN_TIMEOUT_SECS",
                defaults.shutdown_timeout.as_secs(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.base_interval.is_zero() {
            return Err(ScheduleError::InvalidConfig(
                "base interval must be at least one second".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ScheduleError::InvalidConfig(
                "max attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  base_interval:    {:?}", self.base_interval);
        tracing::info!("  max_attempts:     {}", self.max_attempts);
        tracing::info!("  dispatch_timeout: {:?}", self.dispatch_timeout);
        tracing::info!("  shutdown_timeout: {:?}", self.shutdown_timeout);
    }
}
