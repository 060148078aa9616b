//! Due-event processor: claims due events, delivers them and settles each
//! one through the retry policy.

use futures::StreamExt;
use hookclock_core::{CronTrigger, HeaderConf, RetryConf, WebhookRef};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchOutcome, WebhookEnvelope, request_json};
use crate::engine::EngineContext;
use crate::error::{Result, SchedulerError};
use crate::events::{CronEvent, EventKind, NewInvocation, OneOffEvent, StateUpdate};
use crate::report::EventOutcome;
use crate::retry;

/// A claimed event of either kind, with everything needed to deliver it.
#[derive(Debug, Clone)]
pub enum DueEvent {
    Cron { event: CronEvent, trigger: CronTrigger },
    OneOff(OneOffEvent),
}

impl DueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DueEvent::Cron { .. } => EventKind::Cron,
            DueEvent::OneOff(_) => EventKind::OneOff,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            DueEvent::Cron { event, .. } => &event.id,
            DueEvent::OneOff(event) => &event.id,
        }
    }

    pub fn scheduled_time(&self) -> chrono::DateTime<chrono::Utc> {
        match self {
            DueEvent::Cron { event, .. } => event.scheduled_time,
            DueEvent::OneOff(event) => event.scheduled_time,
        }
    }

    pub fn tries(&self) -> u32 {
        match self {
            DueEvent::Cron { event, .. } => event.tries,
            DueEvent::OneOff(event) => event.tries,
        }
    }

    pub fn retry_conf(&self) -> &RetryConf {
        match self {
            DueEvent::Cron { trigger, .. } => &trigger.retry_conf,
            DueEvent::OneOff(event) => &event.retry_conf,
        }
    }

    fn webhook(&self) -> &WebhookRef {
        match self {
            DueEvent::Cron { trigger, .. } => &trigger.webhook,
            DueEvent::OneOff(event) => &event.webhook,
        }
    }

    fn headers(&self) -> &[HeaderConf] {
        match self {
            DueEvent::Cron { trigger, .. } => &trigger.headers,
            DueEvent::OneOff(event) => &event.headers,
        }
    }

    pub fn envelope(&self) -> WebhookEnvelope {
        match self {
            DueEvent::Cron { event, trigger } => WebhookEnvelope {
                id: event.id.clone(),
                name: Some(trigger.name.clone()),
                scheduled_time: event.scheduled_time,
                payload: trigger.payload.clone().unwrap_or_default(),
                comment: trigger.comment.clone(),
                created_at: None,
            },
            DueEvent::OneOff(event) => WebhookEnvelope {
                id: event.id.clone(),
                name: None,
                scheduled_time: event.scheduled_time,
                payload: event.payload.clone().unwrap_or_default(),
                comment: event.comment.clone(),
                created_at: Some(event.created_at),
            },
        }
    }
}

fn outcome_of(update: StateUpdate) -> EventOutcome {
    match update {
        StateUpdate::Delivered => EventOutcome::Delivered,
        StateUpdate::Error => EventOutcome::Errored,
        StateUpdate::Dead => EventOutcome::Dead,
        StateUpdate::RetryAt(_) => EventOutcome::Retrying,
    }
}

pub struct EventProcessor {
    ctx: EngineContext,
    interval: Duration,
    max_concurrent: usize,
}

impl EventProcessor {
    pub fn new(ctx: EngineContext, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            ctx,
            interval,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// One fetch-and-deliver pass. Returns how many events were settled or released.
    ///
    /// Events not started before `cancel` fires stay locked and tracked, as do
    /// cron events whose trigger is no longer in the snapshot.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize> {
        let due = self.ctx.store.fetch_and_lock_due(self.ctx.clock.now()).await?;
        if due.is_empty() {
            return Ok(0);
        }
        tracing::info!(
            "📬 Fetched {} due events ({} cron, {} one-off)",
            due.len(),
            due.cron.len(),
            due.one_off.len()
        );
        self.ctx
            .locked
            .add_all(EventKind::Cron, due.cron.iter().map(|e| e.id.clone()));
        self.ctx
            .locked
            .add_all(EventKind::OneOff, due.one_off.iter().map(|e| e.id.clone()));

        let snapshot = self.ctx.triggers.snapshot();
        let mut cron_batch = Vec::with_capacity(due.cron.len());
        for event in due.cron {
            match snapshot.get(&event.trigger_name) {
                Some(trigger) => cron_batch.push(DueEvent::Cron {
                    trigger: trigger.clone(),
                    event,
                }),
                // Stays locked and tracked until shutdown so it is not refetched every cycle.
                None => self.ctx.reporter.internal_error(
                    "event processor",
                    &format!(
                        "cron trigger '{}' not found for event {}, holding it until shutdown",
                        event.trigger_name, event.id
                    ),
                ),
            }
        }

        // Cron events first, then one-off events.
        let cron_done = self.process_batch(cron_batch, cancel).await;
        let one_off_batch = due.one_off.into_iter().map(DueEvent::OneOff).collect();
        let one_off_done = self.process_batch(one_off_batch, cancel).await;
        Ok(cron_done + one_off_done)
    }

    async fn process_batch(&self, events: Vec<DueEvent>, cancel: &CancellationToken) -> usize {
        futures::stream::iter(events)
            .map(|event| async move {
                if cancel.is_cancelled() {
                    return false;
                }
                self.process_event(event).await;
                true
            })
            .buffer_unordered(self.max_concurrent)
            .filter(|started| futures::future::ready(*started))
            .count()
            .await
    }

    async fn process_event(&self, event: DueEvent) {
        let kind = event.kind();
        let id = event.id().to_string();
        let conf = event.retry_conf().clone();

        if retry::is_expired(self.ctx.clock.now(), event.scheduled_time(), conf.tolerance_seconds) {
            self.settle(kind, &id, StateUpdate::Dead).await;
            return;
        }

        let envelope = event.envelope();
        let (outcome, request) = match self.resolve(&event) {
            Ok((url, headers)) => {
                tracing::debug!("🌐 Delivering {kind} event {id}");
                let timeout = Duration::from_secs(conf.timeout_seconds);
                let outcome = self.ctx.dispatcher.dispatch(&url, &headers, &envelope, timeout).await;
                (outcome, request_json(&envelope, &headers))
            }
            Err(e) => (DispatchOutcome::Resolve(e.to_string()), request_json(&envelope, &[])),
        };

        let now = self.ctx.clock.now();
        let invocation = NewInvocation {
            kind,
            event_id: id.clone(),
            status: outcome.status_code(),
            request,
            response: outcome.response_json(),
            created_at: now,
        };
        if let Err(e) = self.ctx.store.record_invocation(&invocation).await {
            self.recover(kind, &id, e).await;
            return;
        }

        let update = retry::decide(&outcome, event.tries(), &conf, now);
        self.settle(kind, &id, update).await;
    }

    fn resolve(&self, event: &DueEvent) -> Result<(String, Vec<crate::resolve::ResolvedHeader>)> {
        let url = self.ctx.resolver.resolve_url(event.webhook())?;
        let headers = self.ctx.resolver.resolve_headers(event.headers())?;
        Ok((url, headers))
    }

    async fn settle(&self, kind: EventKind, id: &str, update: StateUpdate) {
        match self.ctx.store.set_state(kind, id, update).await {
            Ok(()) => {
                self.ctx.locked.remove(kind, id);
                self.ctx.reporter.event_finished(kind, id, outcome_of(update));
            }
            Err(e) => self.recover(kind, id, e).await,
        }
    }

    /// Store write failed: hand the event back now. If even that fails it
    /// stays tracked and the shutdown sweep tries again.
    async fn recover(&self, kind: EventKind, id: &str, error: SchedulerError) {
        self.ctx.reporter.internal_error(
            "event processor",
            &format!("storing result of {kind} event {id}: {error}"),
        );
        match self.ctx.store.unlock(kind, &[id.to_string()]).await {
            Ok(_) => {
                self.ctx.locked.remove(kind, id);
                self.ctx.reporter.event_finished(kind, id, EventOutcome::Skipped);
            }
            Err(e) => self.ctx.reporter.internal_error(
                "event processor",
                &format!("unlocking {kind} event {id}: {e}"),
            ),
        }
    }

    /// Loop until `cancel` fires. In-flight deliveries finish first.
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(
            "⏰ Event processor started (every {}s, {} concurrent)",
            self.interval.as_secs(),
            self.max_concurrent
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.run_cycle(&cancel).await {
                self.ctx.reporter.internal_error("event processor", &e.to_string());
            }
        }
        tracing::info!("🛑 Event processor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::ScheduledEventEngine;
    use crate::events::{
        CronEventFilter, CronEventSeed, EventStatus, InvocationFilter, NewOneOffEvent,
        OneOffEventFilter, Pagination,
    };
    use crate::report::{EngineReporter, TracingReporter};
    use crate::resolve::EnvResolver;
    use crate::store::{EventStore, SqliteEventStore};
    use chrono::{DateTime, TimeZone, Utc};
    use hookclock_core::SharedTriggers;
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<SqliteEventStore>,
        reporter: Arc<TracingReporter>,
        clock: Arc<ManualClock>,
        engine: ScheduledEventEngine,
    }

    fn fixture(triggers: Vec<CronTrigger>) -> Fixture {
        let store = Arc::new(SqliteEventStore::open_in_memory().unwrap());
        let reporter = Arc::new(TracingReporter::new());
        let clock = Arc::new(ManualClock::new(noon()));
        let engine = ScheduledEventEngine::new(store.clone(), Arc::new(SharedTriggers::new(triggers)))
            .unwrap()
            .with_reporter(reporter.clone())
            .with_clock(clock.clone())
            .with_resolver(Arc::new(EnvResolver::with_vars([("HOOK_TOKEN", "t0k")])));
        Fixture { store, reporter, clock, engine }
    }

    fn one_off(url: &str, at: DateTime<Utc>, retry_conf: RetryConf) -> NewOneOffEvent {
        NewOneOffEvent {
            webhook: WebhookRef::Url(url.into()),
            scheduled_time: at,
            retry_conf,
            payload: None,
            headers: vec![],
            comment: None,
        }
    }

    async fn one_off_status(store: &SqliteEventStore, id: &str) -> (EventStatus, u32) {
        let page = store
            .list_one_off_events(&OneOffEventFilter::default(), Pagination::default())
            .await
            .unwrap();
        let event = page.rows.into_iter().find(|e| e.id == id).unwrap();
        (event.status, event.tries)
    }

    #[tokio::test]
    async fn test_missing_trigger_is_held_not_refetched() {
        let f = fixture(vec![]);
        f.store
            .insert_cron_events(&[CronEventSeed {
                trigger_name: "gone".into(),
                scheduled_time: noon(),
            }])
            .await
            .unwrap();

        let processor = f.engine.processor();
        for _ in 0..3 {
            assert_eq!(processor.run_cycle(&CancellationToken::new()).await.unwrap(), 0);
            f.clock.advance(chrono::Duration::seconds(10));
        }

        let page = f
            .store
            .list_cron_events(&CronEventFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.rows[0].status, EventStatus::Locked);
        assert_eq!(page.rows[0].tries, 0);
        assert_eq!(f.reporter.stats().internal_errors, 1);
        assert!(f.engine.locked().contains(EventKind::Cron, &page.rows[0].id));
    }

    #[tokio::test]
    async fn test_resolution_failure_goes_through_retry() {
        let f = fixture(vec![]);
        let mut event = one_off("http://localhost/", noon(), RetryConf { num_retries: 2, ..Default::default() });
        event.webhook = WebhookRef::FromEnv { from_env: "HOOKCLOCK_SURELY_UNSET_URL".into() };
        let created = f.store.create_one_off_event(event, noon()).await.unwrap();

        f.engine.processor().run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(one_off_status(&f.store, &created.id).await, (EventStatus::Scheduled, 1));

        let filter = InvocationFilter::Event { kind: EventKind::OneOff, event_id: created.id.clone() };
        let logs = f.store.list_invocations(&filter, Pagination::default()).await.unwrap();
        assert_eq!(logs.rows[0].status, 500);
        assert_eq!(logs.rows[0].response["type"], "resolve_error");

        f.clock.advance(chrono::Duration::seconds(10));
        f.engine.processor().run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(one_off_status(&f.store, &created.id).await, (EventStatus::Error, 2));
    }

    #[tokio::test]
    async fn test_cancelled_cycle_leaves_events_tracked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let f = fixture(vec![]);
        let created = f
            .store
            .create_one_off_event(one_off(&server.uri(), noon(), RetryConf::default()), noon())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(f.engine.processor().run_cycle(&cancel).await.unwrap(), 0);
        assert!(f.engine.locked().contains(EventKind::OneOff, &created.id));
        assert_eq!(one_off_status(&f.store, &created.id).await.0, EventStatus::Locked);
    }

    #[tokio::test]
    async fn test_cron_envelope_carries_trigger_name_and_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(wiremock::matchers::header("x-token", "t0k"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({
                "name": "hourly",
                "payload": {"kind": "ping"},
                "comment": "hourly ping"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let trigger = CronTrigger {
            name: "hourly".into(),
            schedule: "0 * * * *".into(),
            webhook: WebhookRef::Url(server.uri()),
            payload: Some(serde_json::json!({"kind": "ping"})),
            headers: vec![HeaderConf::FromEnv {
                name: "X-Token".into(),
                value_from_env: "HOOK_TOKEN".into(),
            }],
            retry_conf: RetryConf::default(),
            comment: Some("hourly ping".into()),
            include_in_metadata: true,
        };
        let f = fixture(vec![trigger]);
        f.store
            .insert_cron_events(&[CronEventSeed {
                trigger_name: "hourly".into(),
                scheduled_time: noon(),
            }])
            .await
            .unwrap();

        f.engine.processor().run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(f.reporter.stats().delivered, 1);

        let filter = InvocationFilter::Kind { kind: EventKind::Cron, trigger_name: None };
        let logs = f.store.list_invocations(&filter, Pagination::default()).await.unwrap();
        assert_eq!(logs.rows[0].request["headers"][0]["value"], "<redacted>");
    }
}
