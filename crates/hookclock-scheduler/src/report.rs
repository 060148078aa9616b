//! Error and outcome reporting for the generator and processor loops.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::EventKind;

/// How processing of one claimed event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Delivered,
    /// Failed, back to `scheduled` with a retry time.
    Retrying,
    /// Failed with no retries left.
    Errored,
    /// Too stale to deliver.
    Dead,
    /// Released without an attempt (missing trigger, store failure).
    Skipped,
}

/// Sink for engine errors and per-event outcomes.
pub trait EngineReporter: Send + Sync {
    /// A failure the engine survived: store errors, inconsistent snapshots.
    fn internal_error(&self, context: &str, message: &str);

    fn event_finished(&self, kind: EventKind, id: &str, outcome: EventOutcome);

    fn stats(&self) -> EngineStats {
        EngineStats::default()
    }
}

/// Counters since start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub delivered: u64,
    pub retried: u64,
    pub errored: u64,
    pub dead: u64,
    pub skipped: u64,
    pub internal_errors: u64,
}

/// Logs through `tracing` and keeps [`EngineStats`].
#[derive(Debug, Default)]
pub struct TracingReporter {
    delivered: AtomicU64,
    retried: AtomicU64,
    errored: AtomicU64,
    dead: AtomicU64,
    skipped: AtomicU64,
    internal_errors: AtomicU64,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngineReporter for TracingReporter {
    fn internal_error(&self, context: &str, message: &str) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!("❌ {context}: {message}");
    }

    fn event_finished(&self, kind: EventKind, id: &str, outcome: EventOutcome) {
        let counter = match outcome {
            EventOutcome::Delivered => &self.delivered,
            EventOutcome::Retrying => &self.retried,
            EventOutcome::Errored => &self.errored,
            EventOutcome::Dead => &self.dead,
            EventOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        match outcome {
            EventOutcome::Delivered => tracing::info!("✅ {kind} event {id} delivered"),
            EventOutcome::Retrying => tracing::info!("🔁 {kind} event {id} scheduled for retry"),
            EventOutcome::Errored => tracing::warn!("⚠️ {kind} event {id} failed, no retries left"),
            EventOutcome::Dead => tracing::warn!("💀 {kind} event {id} dead, past its tolerance"),
            EventOutcome::Skipped => tracing::debug!("⏭️ {kind} event {id} skipped"),
        }
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let reporter = TracingReporter::new();
        reporter.event_finished(EventKind::Cron, "a", EventOutcome::Delivered);
        reporter.event_finished(EventKind::OneOff, "b", EventOutcome::Delivered);
        reporter.event_finished(EventKind::Cron, "c", EventOutcome::Dead);
        reporter.internal_error("generator", "trigger missing");

        let stats = reporter.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.internal_errors, 1);
        assert_eq!(stats.retried, 0);
    }
}
