use thiserror::Error;

use crate::events::EventKind;

/// Errors that can occur within the scheduled-event engine.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Underlying Postgres / sqlx error.
    #[error("Postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cron expression could not be parsed or never fires.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Webhook URL or header could not be resolved.
    #[error("Resolve error: {0}")]
    Resolve(String),

    /// A state transition was requested for an event that is not `locked`.
    #[error("{kind} event {id} is not locked")]
    NotLocked { kind: EventKind, id: String },

    /// The event is in flight and cannot be removed.
    #[error("{kind} event {id} is locked")]
    Locked { kind: EventKind, id: String },

    /// A stored value did not decode (bad timestamp, unknown status, ...).
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
