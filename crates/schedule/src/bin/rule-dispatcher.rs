//! rule-dispatcher: runs the alert rule dispatcher against a JSON rule file.
//!
//! Every base interval the rule file is re-read, new rules get an evaluation
//! routine, changed versions are forwarded, due rules are triggered and
//! removed rules are stopped. Evaluation itself is a logging stand-in.
//!
//! Stops on Ctrl-C and prints a metrics snapshot.

use std::sync::Arc;
use std::time::Duration;

use alertsched_core::config::load_dotenv;
use alertsched_core::{
    EvaluationSignal, RuleKey, ScheduleError, SchedulerConfig, StopReason, VersionSignal,
};
use alertsched_schedule::{AtomicSequence, Dispatcher, FileRuleSource, RuleEvaluator};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};

// ── CLI ─────────────────────────────────────────────────────────────

/// Alert rule dispatcher.
#[derive(Parser, Debug)]
#[command(name = "rule-dispatcher", version, about)]
struct Cli {
    /// Path to a JSON array of rule definitions.
    #[arg(long, env = "ALERTSCHED_RULES", default_value = "data/rules.json")]
    rules: String,

    /// Override the base tick interval in seconds.
    #[arg(long)]
    base_interval_secs: Option<u64>,

    /// Simulated evaluation latency in milliseconds.
    #[arg(long, env = "ALERTSCHED_EVAL_DELAY_MS", default_value_t = 0)]
    eval_delay_ms: u64,
}

// ── LoggingEvaluator ────────────────────────────────────────────────

/// Stand-in evaluator that logs each evaluation after an optional delay.
struct LoggingEvaluator {
    delay: Duration,
}

#[async_trait]
impl RuleEvaluator for LoggingEvaluator {
    async fn evaluate(&self, signal: &EvaluationSignal) -> Result<(), ScheduleError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        info!(
            rule = %signal.rule.key,
            title = %signal.rule.title,
            version = signal.rule.version,
            folder = signal.folder_title().unwrap_or("-"),
            tick = %signal.scheduled_at,
            "rule evaluated"
        );
        Ok(())
    }

    async fn reset(&self, key: &RuleKey, version: VersionSignal) {
        info!(rule = %key, version = version.version, paused = version.is_paused, "rule state reset");
    }

    async fn retire(&self, key: &RuleKey, reason: &StopReason) {
        info!(rule = %key, cause = %reason, "rule retired");
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = SchedulerConfig::from_env();
    if let Some(secs) = cli.base_interval_secs {
        config.base_interval = Duration::from_secs(secs);
    }
    config.validate()?;
    config.log_summary();

    let evaluator = Arc::new(LoggingEvaluator {
        delay: Duration::from_millis(cli.eval_delay_ms),
    });
    let mut dispatcher = Dispatcher::new(config, evaluator, AtomicSequence::shared());
    let source = FileRuleSource::new(&cli.rules);

    let lifecycle = dispatcher.lifecycle().clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping dispatcher");
                lifecycle.cancel(StopReason::SchedulerStopped);
            }
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    info!(rules = %cli.rules, "rule-dispatcher starting");
    dispatcher.run(&source).await;
    let exited = dispatcher.shutdown(StopReason::SchedulerStopped).await;

    let snapshot = serde_json::to_string(&dispatcher.metrics().snapshot())?;
    info!(
        routines = exited,
        metrics = %snapshot,
        "rule-dispatcher exited cleanly"
    );
    Ok(())
}
