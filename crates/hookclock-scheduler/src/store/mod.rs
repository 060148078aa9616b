//! Persistent event store: durable cron events, one-off events and
//! invocation logs shared by every running instance.
//!
//! Two backends:
//! - [`SqliteEventStore`]: single file, WAL mode (default)
//! - [`PgEventStore`]: Postgres, claims rows with `FOR UPDATE SKIP LOCKED`

pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::events::{
    CronEvent, CronEventFilter, CronEventSeed, CronPurgeSelector, CronTriggerStats, DueEvents,
    EventKind, Invocation, InvocationFilter, NewInvocation, NewOneOffEvent, OneOffEvent,
    OneOffEventFilter, Page, Pagination, StateUpdate,
};

pub use postgres::PgEventStore;
pub use sqlite::SqliteEventStore;

/// Storage operations the engine and the inspection API need.
///
/// Every method is atomic with respect to concurrent callers, including
/// other processes sharing the same database.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Triggers (among `trigger_names`) holding fewer than
    /// [`CRON_EVENT_BUFFER`](crate::events::CRON_EVENT_BUFFER) untried
    /// `scheduled` events.
    async fn top_up_candidates(
        &self,
        trigger_names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<CronTriggerStats>>;

    /// Insert cron events, ignoring `(trigger_name, scheduled_time)` duplicates.
    /// Returns the number of rows actually inserted.
    async fn insert_cron_events(&self, seeds: &[CronEventSeed]) -> Result<usize>;

    /// Claim every due `scheduled` event and mark it `locked`.
    /// Rows claimed by a concurrent caller are never returned twice.
    async fn fetch_and_lock_due(&self, now: DateTime<Utc>) -> Result<DueEvents>;

    /// Append an invocation log row and bump the event's `tries`.
    async fn record_invocation(&self, invocation: &NewInvocation) -> Result<()>;

    /// Move a `locked` event to its next state.
    async fn set_state(&self, kind: EventKind, id: &str, update: StateUpdate) -> Result<()>;

    /// `locked -> scheduled` for the given ids. Rows that already moved on are skipped.
    async fn unlock(&self, kind: EventKind, ids: &[String]) -> Result<usize>;

    /// `locked -> scheduled` for every row of the kind.
    async fn unlock_all(&self, kind: EventKind) -> Result<usize>;

    /// Delete untried future cron events of the selected triggers.
    async fn purge_future_cron_events(
        &self,
        selector: &CronPurgeSelector,
        now: DateTime<Utc>,
    ) -> Result<usize>;

    async fn create_one_off_event(
        &self,
        event: NewOneOffEvent,
        now: DateTime<Utc>,
    ) -> Result<OneOffEvent>;

    /// Delete a one-off event and its invocation logs. `Ok(false)` when it
    /// does not exist; an error when it is currently locked.
    async fn delete_one_off_event(&self, id: &str) -> Result<bool>;

    async fn list_cron_events(
        &self,
        filter: &CronEventFilter,
        page: Pagination,
    ) -> Result<Page<CronEvent>>;

    async fn list_one_off_events(
        &self,
        filter: &OneOffEventFilter,
        page: Pagination,
    ) -> Result<Page<OneOffEvent>>;

    async fn list_invocations(
        &self,
        filter: &InvocationFilter,
        page: Pagination,
    ) -> Result<Page<Invocation>>;

    /// Drop invocation logs older than `before`.
    async fn purge_invocations(&self, kind: EventKind, before: DateTime<Utc>) -> Result<usize>;
}
