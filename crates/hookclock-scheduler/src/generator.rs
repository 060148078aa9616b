//! Cron event generator: keeps a rolling buffer of future events per trigger.

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cron::{CronSchedule, generate_schedule_times};
use crate::engine::EngineContext;
use crate::error::Result;
use crate::events::{CRON_EVENT_BUFFER, CronEventSeed};

pub struct CronGenerator {
    ctx: EngineContext,
    interval: Duration,
}

impl CronGenerator {
    pub fn new(ctx: EngineContext, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    /// One top-up pass. Returns the number of events inserted.
    pub async fn run_cycle(&self) -> Result<usize> {
        let snapshot = self.ctx.triggers.snapshot();
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut names: Vec<String> = snapshot.keys().cloned().collect();
        names.sort();
        let now = self.ctx.clock.now();
        let candidates = self.ctx.store.top_up_candidates(&names, now).await?;

        let mut seeds = Vec::new();
        for candidate in candidates {
            let Some(trigger) = snapshot.get(&candidate.trigger_name) else {
                self.ctx.reporter.internal_error(
                    "cron generator",
                    &format!("trigger '{}' is not in the current snapshot", candidate.trigger_name),
                );
                continue;
            };
            let schedule = match CronSchedule::parse(&trigger.schedule) {
                Ok(schedule) => schedule,
                Err(e) => {
                    self.ctx
                        .reporter
                        .internal_error("cron generator", &format!("trigger '{}': {e}", trigger.name));
                    continue;
                }
            };
            let times =
                generate_schedule_times(candidate.max_scheduled_time, CRON_EVENT_BUFFER, &schedule);
            tracing::debug!(
                "🗓️ Topping up '{}' ({} upcoming, +{})",
                trigger.name,
                candidate.upcoming_events_count,
                times.len()
            );
            seeds.extend(times.into_iter().map(|scheduled_time| CronEventSeed {
                trigger_name: trigger.name.clone(),
                scheduled_time,
            }));
        }

        if seeds.is_empty() {
            return Ok(0);
        }
        let inserted = self.ctx.store.insert_cron_events(&seeds).await?;
        if inserted > 0 {
            tracing::info!("🗓️ Generated {inserted} cron events");
        }
        Ok(inserted)
    }

    /// Loop until `cancel` fires. A cycle in progress always runs to completion.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("⏰ Cron generator started (every {}s)", self.interval.as_secs());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_cycle().await {
                self.ctx.reporter.internal_error("cron generator", &e.to_string());
            }
        }
        tracing::info!("🛑 Cron generator stopped");
    }
}
