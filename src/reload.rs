//! Trigger file reload loop.
//!
//! Re-reads the trigger file on an interval and swaps the shared snapshot.
//! Future events of triggers that were removed or rescheduled are purged so
//! the generator rebuilds their buffer from the new definition.

use hookclock_core::{SharedTriggers, TriggerFile, TriggerSnapshot};
use hookclock_scheduler::{Clock, CronPurgeSelector, EventStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct TriggerReloader {
    path: PathBuf,
    triggers: Arc<SharedTriggers>,
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl TriggerReloader {
    pub fn new(
        path: PathBuf,
        triggers: Arc<SharedTriggers>,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self { path, triggers, store, clock, interval }
    }

    /// Reload once. Returns the names whose future events were purged.
    pub async fn reload_once(&self) -> anyhow::Result<Vec<String>> {
        let file = TriggerFile::load(&self.path)?;
        let previous = self.triggers.replace(file.cron_triggers);
        let current = hookclock_core::TriggerSource::snapshot(self.triggers.as_ref());

        let stale = stale_triggers(&previous, &current);
        if stale.is_empty() {
            return Ok(stale);
        }
        let purged = self
            .store
            .purge_future_cron_events(&CronPurgeSelector::Triggers(stale.clone()), self.clock.now())
            .await?;
        tracing::info!(
            "🔄 Triggers changed: {} ({} future events purged)",
            stale.join(", "),
            purged
        );
        Ok(stale)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and main already loaded the file.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.reload_once().await {
                        tracing::warn!("⚠️ Trigger reload failed, keeping previous set: {e}");
                    }
                }
            }
        }
        tracing::debug!("Trigger reload loop stopped");
    }
}

/// Triggers present before that are gone now or run on a different schedule.
fn stale_triggers(previous: &TriggerSnapshot, current: &TriggerSnapshot) -> Vec<String> {
    let mut names: Vec<String> = previous
        .values()
        .filter(|old| {
            current
                .get(&old.name)
                .is_none_or(|new| new.schedule != old.schedule)
        })
        .map(|old| old.name.clone())
        .collect();
    names.sort();
    names
}
