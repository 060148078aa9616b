//! Scheduled event definitions: the data model shared by the store, the
//! generator and the processor.

use chrono::{DateTime, Utc};
use hookclock_core::{HeaderConf, RetryConf, WebhookRef};
use serde::{Deserialize, Serialize};

/// Number of untried future events the generator keeps per cron trigger.
pub const CRON_EVENT_BUFFER: usize = 100;

/// The two kinds of scheduled events. Selects the tables an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Cron,
    OneOff,
}

impl EventKind {
    pub fn events_table(&self) -> &'static str {
        match self {
            EventKind::Cron => "cron_events",
            EventKind::OneOff => "one_off_events",
        }
    }

    pub fn logs_table(&self) -> &'static str {
        match self {
            EventKind::Cron => "cron_event_invocation_logs",
            EventKind::OneOff => "one_off_event_invocation_logs",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Cron => write!(f, "cron"),
            EventKind::OneOff => write!(f, "one_off"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cron" => Ok(EventKind::Cron),
            "one_off" | "one-off" | "oneoff" => Ok(EventKind::OneOff),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// Lifecycle state of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting for its scheduled time (or `next_retry_at`).
    Scheduled,
    /// Claimed by one instance for in-flight processing.
    Locked,
    /// Webhook answered 2xx.
    Delivered,
    /// Failed and out of retries.
    Error,
    /// Abandoned because it was too stale to deliver.
    Dead,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Delivered | EventStatus::Error | EventStatus::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Locked => "locked",
            EventStatus::Delivered => "delivered",
            EventStatus::Error => "error",
            EventStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(EventStatus::Scheduled),
            "locked" => Ok(EventStatus::Locked),
            "delivered" => Ok(EventStatus::Delivered),
            "error" => Ok(EventStatus::Error),
            "dead" => Ok(EventStatus::Dead),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// One concrete firing of a cron trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronEvent {
    pub id: String,
    pub trigger_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub status: EventStatus,
    pub tries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// A single scheduled webhook call that carries its own configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneOffEvent {
    pub id: String,
    pub webhook: WebhookRef,
    pub scheduled_time: DateTime<Utc>,
    pub retry_conf: RetryConf,
    pub payload: Option<serde_json::Value>,
    pub headers: Vec<HeaderConf>,
    pub comment: Option<String>,
    pub status: EventStatus,
    pub tries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a one-off event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOneOffEvent {
    pub webhook: WebhookRef,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default)]
    pub retry_conf: RetryConf,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: Vec<HeaderConf>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// `(trigger, time)` pair the generator asks the store to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEventSeed {
    pub trigger_name: String,
    pub scheduled_time: DateTime<Utc>,
}

/// Buffer state of one under-filled cron trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronTriggerStats {
    pub trigger_name: String,
    pub upcoming_events_count: usize,
    /// Latest scheduled time among untried events, or "now" when there are none.
    pub max_scheduled_time: DateTime<Utc>,
}

/// Everything `fetch_and_lock_due` claimed in one round-trip.
#[derive(Debug, Clone, Default)]
pub struct DueEvents {
    pub cron: Vec<CronEvent>,
    pub one_off: Vec<OneOffEvent>,
}

impl DueEvents {
    pub fn is_empty(&self) -> bool {
        self.cron.is_empty() && self.one_off.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cron.len() + self.one_off.len()
    }
}

/// Where a locked event goes after processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Delivered,
    Error,
    Dead,
    /// Back to `scheduled`, due again at the given time.
    RetryAt(DateTime<Utc>),
}

impl StateUpdate {
    pub fn status(&self) -> EventStatus {
        match self {
            StateUpdate::Delivered => EventStatus::Delivered,
            StateUpdate::Error => EventStatus::Error,
            StateUpdate::Dead => EventStatus::Dead,
            StateUpdate::RetryAt(_) => EventStatus::Scheduled,
        }
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StateUpdate::RetryAt(at) => Some(*at),
            _ => None,
        }
    }
}

/// One delivery attempt, as written to the invocation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: String,
    pub event_id: String,
    pub kind: EventKind,
    /// HTTP status, or 1000 (transport), 1001 (response parse), 500 (other).
    pub status: i32,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An attempt about to be appended to the invocation log.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvocation {
    pub kind: EventKind,
    pub event_id: String,
    pub status: i32,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Which future cron events to purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronPurgeSelector {
    Trigger(String),
    Triggers(Vec<String>),
}

impl CronPurgeSelector {
    pub fn names(&self) -> Vec<String> {
        match self {
            CronPurgeSelector::Trigger(name) => vec![name.clone()],
            CronPurgeSelector::Triggers(names) => names.clone(),
        }
    }
}

/// Limit/offset paging for the inspection reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

/// A page of rows plus the total row count ignoring limit/offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CronEventFilter {
    pub trigger_name: Option<String>,
    /// Empty means any status.
    pub statuses: Vec<EventStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct OneOffEventFilter {
    pub statuses: Vec<EventStatus>,
}

/// Invocation lookup: by event, or by kind (optionally narrowed to a trigger).
#[derive(Debug, Clone)]
pub enum InvocationFilter {
    Event { kind: EventKind, event_id: String },
    Kind { kind: EventKind, trigger_name: Option<String> },
}

impl InvocationFilter {
    pub fn kind(&self) -> EventKind {
        match self {
            InvocationFilter::Event { kind, .. } | InvocationFilter::Kind { kind, .. } => *kind,
        }
    }
}
