//! # Hookclock Scheduler
//!
//! Scheduled-event engine: delivers cron and one-off webhook events from a
//! store shared by any number of running instances.
//!
//! ## Architecture
//! ```text
//! CronGenerator (tokio interval)
//!   └── under-buffered triggers → next 100 fire times → insert (idempotent)
//!
//! EventProcessor (tokio interval)
//!   ├── fetch_and_lock_due   scheduled → locked
//!   ├── LockedEvents         ids this instance holds
//!   ├── WebhookDispatcher    POST envelope, classify outcome
//!   └── retry::decide        delivered | scheduled (retry) | error | dead
//!
//! EventStore
//!   ├── SqliteEventStore     BEGIN IMMEDIATE
//!   └── PgEventStore         FOR UPDATE SKIP LOCKED
//! ```
//!
//! Lifecycle: `scheduled → locked → delivered | error | dead`, with
//! `locked → scheduled` on retry, on shutdown and on the start-up sweep.

pub mod clock;
pub mod config;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod generator;
pub mod locked;
pub mod processor;
pub mod report;
pub mod resolve;
pub mod retry;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use cron::{CronSchedule, generate_schedule_times};
pub use dispatch::{DispatchOutcome, WebhookDispatcher};
pub use engine::{EngineContext, EngineHandle, ScheduledEventEngine};
pub use error::{Result, SchedulerError};
pub use events::{
    CRON_EVENT_BUFFER, CronEvent, CronPurgeSelector, EventKind, EventStatus, Invocation,
    NewOneOffEvent, OneOffEvent, Page, Pagination, StateUpdate,
};
pub use generator::CronGenerator;
pub use locked::LockedEvents;
pub use processor::EventProcessor;
pub use report::{EngineReporter, EngineStats, EventOutcome, TracingReporter};
pub use resolve::{EnvResolver, WebhookResolver};
pub use store::{EventStore, PgEventStore, SqliteEventStore};
