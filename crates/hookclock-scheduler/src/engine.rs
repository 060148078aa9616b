//! Engine wiring: builds the shared context, runs the start-up sweep,
//! spawns the generator and processor loops and unlocks leftovers on shutdown.

use hookclock_core::TriggerSource;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::dispatch::WebhookDispatcher;
use crate::error::Result;
use crate::events::EventKind;
use crate::generator::CronGenerator;
use crate::locked::LockedEvents;
use crate::processor::EventProcessor;
use crate::report::{EngineReporter, TracingReporter};
use crate::resolve::{EnvResolver, WebhookResolver};
use crate::store::EventStore;

/// Collaborators shared by the generator and the processor.
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn EventStore>,
    pub triggers: Arc<dyn TriggerSource>,
    pub resolver: Arc<dyn WebhookResolver>,
    pub dispatcher: WebhookDispatcher,
    pub reporter: Arc<dyn EngineReporter>,
    pub clock: Arc<dyn Clock>,
    pub locked: Arc<LockedEvents>,
}

/// Builder for a running engine.
///
/// ```ignore
/// let handle = ScheduledEventEngine::new(store, triggers)?
///     .with_config(EngineConfig::from(&config))
///     .start()
///     .await?;
/// // ...
/// handle.shutdown().await?;
/// ```
pub struct ScheduledEventEngine {
    ctx: EngineContext,
    config: EngineConfig,
}

impl ScheduledEventEngine {
    pub fn new(store: Arc<dyn EventStore>, triggers: Arc<dyn TriggerSource>) -> Result<Self> {
        Ok(Self {
            ctx: EngineContext {
                store,
                triggers,
                resolver: Arc::new(EnvResolver::new()),
                dispatcher: WebhookDispatcher::new()?,
                reporter: Arc::new(TracingReporter::new()),
                clock: Arc::new(SystemClock),
                locked: Arc::new(LockedEvents::new()),
            },
            config: EngineConfig::default(),
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn WebhookResolver>) -> Self {
        self.ctx.resolver = resolver;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn EngineReporter>) -> Self {
        self.ctx.reporter = reporter;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: WebhookDispatcher) -> Self {
        self.ctx.dispatcher = dispatcher;
        self
    }

    pub fn locked(&self) -> Arc<LockedEvents> {
        self.ctx.locked.clone()
    }

    pub fn reporter(&self) -> Arc<dyn EngineReporter> {
        self.ctx.reporter.clone()
    }

    /// A generator sharing this engine's collaborators, for driving cycles by hand.
    pub fn generator(&self) -> CronGenerator {
        CronGenerator::new(self.ctx.clone(), self.config.generator_interval)
    }

    /// A processor sharing this engine's collaborators, for driving cycles by hand.
    pub fn processor(&self) -> EventProcessor {
        EventProcessor::new(
            self.ctx.clone(),
            self.config.processor_interval,
            self.config.max_concurrent_dispatches,
        )
    }

    /// Release locks left behind by a crashed instance, then spawn both loops.
    ///
    /// A failing start-up sweep is fatal.
    pub async fn start(self) -> Result<EngineHandle> {
        for kind in [EventKind::Cron, EventKind::OneOff] {
            let released = self.ctx.store.unlock_all(kind).await?;
            if released > 0 {
                tracing::warn!("🔓 Released {released} stale locked {kind} events");
            }
        }

        let cancel = CancellationToken::new();
        let generator = tokio::spawn(self.generator().run(cancel.clone()));
        let processor = tokio::spawn(self.processor().run(cancel.clone()));
        tracing::info!("🚀 Scheduled event engine started");

        Ok(EngineHandle {
            ctx: self.ctx,
            cancel,
            generator,
            processor,
        })
    }
}

/// A running engine.
pub struct EngineHandle {
    ctx: EngineContext,
    cancel: CancellationToken,
    generator: JoinHandle<()>,
    processor: JoinHandle<()>,
}

impl EngineHandle {
    pub fn locked(&self) -> Arc<LockedEvents> {
        self.ctx.locked.clone()
    }

    pub fn reporter(&self) -> Arc<dyn EngineReporter> {
        self.ctx.reporter.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop both loops, wait for in-flight work, then unlock whatever this
    /// instance still holds. Returns the number of events unlocked.
    pub async fn shutdown(self) -> Result<usize> {
        tracing::info!("🛑 Shutting down scheduled event engine...");
        self.cancel.cancel();
        for (name, task) in [("generator", self.generator), ("processor", self.processor)] {
            if let Err(e) = task.await {
                tracing::error!("❌ {name} task ended abnormally: {e}");
            }
        }

        let mut unlocked = 0;
        let mut first_error = None;
        for kind in [EventKind::Cron, EventKind::OneOff] {
            let ids = self.ctx.locked.drain(kind);
            if ids.is_empty() {
                continue;
            }
            match self.ctx.store.unlock(kind, &ids).await {
                Ok(n) => unlocked += n,
                Err(e) => {
                    tracing::error!("❌ Failed to unlock {} {kind} events on shutdown: {e}", ids.len());
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        if unlocked > 0 {
            tracing::info!("🔓 Unlocked {unlocked} in-flight events");
        }
        Ok(unlocked)
    }
}
