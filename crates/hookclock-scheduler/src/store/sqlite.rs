//! SQLite-backed event store.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (microseconds, `Z`
//! suffix) so lexical order equals chronological order. JSON columns are TEXT.
//! `fetch_and_lock_due` runs under `BEGIN IMMEDIATE`, which takes the database
//! write lock before reading: a second connection, even from another process,
//! blocks until the first commits and then only sees rows that are still
//! `scheduled`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::EventStore;
use crate::error::{Result, SchedulerError};
use crate::events::{
    CRON_EVENT_BUFFER, CronEvent, CronEventFilter, CronEventSeed, CronPurgeSelector,
    CronTriggerStats, DueEvents, EventKind, EventStatus, Invocation, InvocationFilter,
    NewInvocation, NewOneOffEvent, OneOffEvent, OneOffEventFilter, Page, Pagination, StateUpdate,
};

const CRON_COLUMNS: &str = "id, trigger_name, scheduled_time, status, tries, next_retry_at";
const ONE_OFF_COLUMNS: &str = "id, webhook_conf, scheduled_time, retry_conf, payload, header_conf, \
     status, tries, next_retry_at, comment, created_at";

/// Event store over a single SQLite file.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open or create the event database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SchedulerError::Other(format!("DB dir: {e}")))?;
            }
        }
        let conn = Connection::open(path)?;
        // Readers keep going while one instance holds the write lock.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// Private in-memory database (tests, throwaway runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS cron_events (
                id TEXT PRIMARY KEY,
                trigger_name TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',   -- scheduled, locked, delivered, error, dead
                tries INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT,
                UNIQUE (trigger_name, scheduled_time)
            );
            CREATE INDEX IF NOT EXISTS cron_events_status_time
                ON cron_events (status, scheduled_time);

            CREATE TABLE IF NOT EXISTS cron_event_invocation_logs (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                request TEXT NOT NULL,      -- JSON
                response TEXT NOT NULL,     -- JSON
                created_at TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES cron_events(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS cron_event_invocation_logs_event
                ON cron_event_invocation_logs (event_id);

            CREATE TABLE IF NOT EXISTS one_off_events (
                id TEXT PRIMARY KEY,
                webhook_conf TEXT NOT NULL,     -- JSON
                scheduled_time TEXT NOT NULL,
                retry_conf TEXT NOT NULL,       -- JSON
                payload TEXT,                   -- JSON
                header_conf TEXT NOT NULL,      -- JSON array
                status TEXT NOT NULL DEFAULT 'scheduled',
                tries INTEGER NOT NULL DEFAULT 0,
                next_retry_at TEXT,
                comment TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS one_off_events_status_time
                ON one_off_events (status, scheduled_time);

            CREATE TABLE IF NOT EXISTS one_off_event_invocation_logs (
                id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                request TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (event_id) REFERENCES one_off_events(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS one_off_event_invocation_logs_event
                ON one_off_event_invocation_logs (event_id);
            ",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedulerError::Other(format!("Lock: {e}")))
    }
}

// ─── Row mapping ──────────────────────────────────────────────

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::CorruptRow(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_status(raw: &str) -> Result<EventStatus> {
    raw.parse().map_err(SchedulerError::CorruptRow)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

struct CronRow {
    id: String,
    trigger_name: String,
    scheduled_time: String,
    status: String,
    tries: i64,
    next_retry_at: Option<String>,
}

impl CronRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            trigger_name: row.get(1)?,
            scheduled_time: row.get(2)?,
            status: row.get(3)?,
            tries: row.get(4)?,
            next_retry_at: row.get(5)?,
        })
    }

    fn into_event(self) -> Result<CronEvent> {
        Ok(CronEvent {
            id: self.id,
            trigger_name: self.trigger_name,
            scheduled_time: parse_ts(&self.scheduled_time)?,
            status: parse_status(&self.status)?,
            tries: self.tries as u32,
            next_retry_at: self.next_retry_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

struct OneOffRow {
    id: String,
    webhook_conf: String,
    scheduled_time: String,
    retry_conf: String,
    payload: Option<String>,
    header_conf: String,
    status: String,
    tries: i64,
    next_retry_at: Option<String>,
    comment: Option<String>,
    created_at: String,
}

impl OneOffRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            webhook_conf: row.get(1)?,
            scheduled_time: row.get(2)?,
            retry_conf: row.get(3)?,
            payload: row.get(4)?,
            header_conf: row.get(5)?,
            status: row.get(6)?,
            tries: row.get(7)?,
            next_retry_at: row.get(8)?,
            comment: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_event(self) -> Result<OneOffEvent> {
        Ok(OneOffEvent {
            id: self.id,
            webhook: serde_json::from_str(&self.webhook_conf)?,
            scheduled_time: parse_ts(&self.scheduled_time)?,
            retry_conf: serde_json::from_str(&self.retry_conf)?,
            payload: self.payload.as_deref().map(serde_json::from_str).transpose()?,
            headers: serde_json::from_str(&self.header_conf)?,
            comment: self.comment,
            status: parse_status(&self.status)?,
            tries: self.tries as u32,
            next_retry_at: self.next_retry_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct InvocationRow {
    id: String,
    event_id: String,
    status: i64,
    request: String,
    response: String,
    created_at: String,
}

impl InvocationRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            status: row.get(2)?,
            request: row.get(3)?,
            response: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_invocation(self, kind: EventKind) -> Result<Invocation> {
        Ok(Invocation {
            id: self.id,
            event_id: self.event_id,
            kind,
            status: self.status as i32,
            request: serde_json::from_str(&self.request)?,
            response: serde_json::from_str(&self.response)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// `status IN (...)` clause for a status filter; empty when unfiltered.
fn status_clause(statuses: &[EventStatus], column: &str, args: &mut Vec<SqlValue>) -> Option<String> {
    if statuses.is_empty() {
        return None;
    }
    args.extend(statuses.iter().map(|s| SqlValue::Text(s.as_str().to_string())));
    Some(format!("{column} IN ({})", placeholders(statuses.len())))
}

fn where_sql(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn top_up_candidates(
        &self,
        trigger_names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<CronTriggerStats>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT COUNT(*), MAX(scheduled_time) FROM cron_events
             WHERE trigger_name = ?1 AND status = 'scheduled' AND tries = 0",
        )?;

        let mut candidates = Vec::new();
        for name in trigger_names {
            let (count, max): (i64, Option<String>) =
                stmt.query_row(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let count = count as usize;
            if count >= CRON_EVENT_BUFFER {
                continue;
            }
            let max_scheduled_time = match max {
                Some(raw) => parse_ts(&raw)?,
                None => now,
            };
            candidates.push(CronTriggerStats {
                trigger_name: name.clone(),
                upcoming_events_count: count,
                max_scheduled_time,
            });
        }
        Ok(candidates)
    }

    async fn insert_cron_events(&self, seeds: &[CronEventSeed]) -> Result<usize> {
        if seeds.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cron_events (id, trigger_name, scheduled_time, status, tries)
                 VALUES (?1, ?2, ?3, 'scheduled', 0)
                 ON CONFLICT (trigger_name, scheduled_time) DO NOTHING",
            )?;
            for seed in seeds {
                inserted += stmt.execute(params![
                    uuid::Uuid::new_v4().to_string(),
                    seed.trigger_name,
                    ts(seed.scheduled_time),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    async fn fetch_and_lock_due(&self, now: DateTime<Utc>) -> Result<DueEvents> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = ts(now);

        let cron_rows = {
            let mut stmt = tx.prepare(&format!(
                "UPDATE cron_events SET status = 'locked'
                 WHERE status = 'scheduled' AND COALESCE(next_retry_at, scheduled_time) <= ?1
                 RETURNING {CRON_COLUMNS}"
            ))?;
            let rows = stmt.query_map(params![now], CronRow::read)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let one_off_rows = {
            let mut stmt = tx.prepare(&format!(
                "UPDATE one_off_events SET status = 'locked'
                 WHERE status = 'scheduled' AND COALESCE(next_retry_at, scheduled_time) <= ?1
                 RETURNING {ONE_OFF_COLUMNS}"
            ))?;
            let rows = stmt.query_map(params![now], OneOffRow::read)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.commit()?;

        let mut cron = cron_rows
            .into_iter()
            .map(CronRow::into_event)
            .collect::<Result<Vec<_>>>()?;
        let mut one_off = one_off_rows
            .into_iter()
            .map(OneOffRow::into_event)
            .collect::<Result<Vec<_>>>()?;
        // RETURNING order is unspecified.
        cron.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
        one_off.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
        Ok(DueEvents { cron, one_off })
    }

    async fn record_invocation(&self, invocation: &NewInvocation) -> Result<()> {
        let kind = invocation.kind;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {} (id, event_id, status, request, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                kind.logs_table()
            ),
            params![
                uuid::Uuid::new_v4().to_string(),
                invocation.event_id,
                invocation.status,
                serde_json::to_string(&invocation.request)?,
                serde_json::to_string(&invocation.response)?,
                ts(invocation.created_at),
            ],
        )?;
        tx.execute(
            &format!("UPDATE {} SET tries = tries + 1 WHERE id = ?1", kind.events_table()),
            params![invocation.event_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn set_state(&self, kind: EventKind, id: &str, update: StateUpdate) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = ?1, next_retry_at = ?2 WHERE id = ?3 AND status = 'locked'",
                kind.events_table()
            ),
            params![update.status().as_str(), update.next_retry_at().map(ts), id],
        )?;
        if changed == 0 {
            return Err(SchedulerError::NotLocked { kind, id: id.to_string() });
        }
        Ok(())
    }

    async fn unlock(&self, kind: EventKind, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = 'scheduled' WHERE status = 'locked' AND id IN ({})",
                kind.events_table(),
                placeholders(ids.len())
            ),
            params_from_iter(ids.iter()),
        )?;
        Ok(changed)
    }

    async fn unlock_all(&self, kind: EventKind) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET status = 'scheduled' WHERE status = 'locked'",
                kind.events_table()
            ),
            [],
        )?;
        Ok(changed)
    }

    async fn purge_future_cron_events(
        &self,
        selector: &CronPurgeSelector,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let names = selector.names();
        if names.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<SqlValue> = vec![SqlValue::Text(ts(now))];
        args.extend(names.into_iter().map(SqlValue::Text));
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!(
                "DELETE FROM cron_events
                 WHERE scheduled_time > ? AND status = 'scheduled' AND tries = 0
                   AND trigger_name IN ({})",
                placeholders(args.len() - 1)
            ),
            params_from_iter(args.iter()),
        )?;
        Ok(deleted)
    }

    async fn create_one_off_event(
        &self,
        event: NewOneOffEvent,
        now: DateTime<Utc>,
    ) -> Result<OneOffEvent> {
        let created = OneOffEvent {
            id: uuid::Uuid::new_v4().to_string(),
            webhook: event.webhook,
            scheduled_time: event.scheduled_time,
            retry_conf: event.retry_conf,
            payload: event.payload,
            headers: event.headers,
            comment: event.comment,
            status: EventStatus::Scheduled,
            tries: 0,
            next_retry_at: None,
            created_at: now,
        };
        let payload = created.payload.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO one_off_events ({ONE_OFF_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'scheduled', 0, NULL, ?7, ?8)"
            ),
            params![
                created.id,
                serde_json::to_string(&created.webhook)?,
                ts(created.scheduled_time),
                serde_json::to_string(&created.retry_conf)?,
                payload,
                serde_json::to_string(&created.headers)?,
                created.comment,
                ts(created.created_at),
            ],
        )?;
        Ok(created)
    }

    async fn delete_one_off_event(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM one_off_events WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Ok(false);
        };
        if parse_status(&status)? == EventStatus::Locked {
            return Err(SchedulerError::Locked { kind: EventKind::OneOff, id: id.to_string() });
        }
        tx.execute("DELETE FROM one_off_events WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    async fn list_cron_events(
        &self,
        filter: &CronEventFilter,
        page: Pagination,
    ) -> Result<Page<CronEvent>> {
        let mut args = Vec::new();
        let mut clauses = Vec::new();
        if let Some(name) = &filter.trigger_name {
            clauses.push("trigger_name = ?".to_string());
            args.push(SqlValue::Text(name.clone()));
        }
        clauses.extend(status_clause(&filter.statuses, "status", &mut args));
        let where_sql = where_sql(&clauses);

        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM cron_events{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        args.push(SqlValue::Integer(page.limit as i64));
        args.push(SqlValue::Integer(page.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {CRON_COLUMNS} FROM cron_events{where_sql}
             ORDER BY scheduled_time ASC, id ASC LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), CronRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            rows: rows.into_iter().map(CronRow::into_event).collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn list_one_off_events(
        &self,
        filter: &OneOffEventFilter,
        page: Pagination,
    ) -> Result<Page<OneOffEvent>> {
        let mut args = Vec::new();
        let clauses: Vec<String> = status_clause(&filter.statuses, "status", &mut args)
            .into_iter()
            .collect();
        let where_sql = where_sql(&clauses);

        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM one_off_events{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        args.push(SqlValue::Integer(page.limit as i64));
        args.push(SqlValue::Integer(page.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {ONE_OFF_COLUMNS} FROM one_off_events{where_sql}
             ORDER BY scheduled_time ASC, id ASC LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), OneOffRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            rows: rows.into_iter().map(OneOffRow::into_event).collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn list_invocations(
        &self,
        filter: &InvocationFilter,
        page: Pagination,
    ) -> Result<Page<Invocation>> {
        let kind = filter.kind();
        let mut args = Vec::new();
        let mut from = format!("{} l", kind.logs_table());
        let mut clauses = Vec::new();
        match filter {
            InvocationFilter::Event { event_id, .. } => {
                clauses.push("l.event_id = ?".to_string());
                args.push(SqlValue::Text(event_id.clone()));
            }
            InvocationFilter::Kind { trigger_name: Some(name), kind: EventKind::Cron } => {
                from.push_str(" JOIN cron_events e ON e.id = l.event_id");
                clauses.push("e.trigger_name = ?".to_string());
                args.push(SqlValue::Text(name.clone()));
            }
            InvocationFilter::Kind { .. } => {}
        }
        let where_sql = where_sql(&clauses);

        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {from}{where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get(0),
        )?;
        args.push(SqlValue::Integer(page.limit as i64));
        args.push(SqlValue::Integer(page.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT l.id, l.event_id, l.status, l.request, l.response, l.created_at
             FROM {from}{where_sql}
             ORDER BY l.created_at DESC, l.id ASC LIMIT ? OFFSET ?"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), InvocationRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            rows: rows
                .into_iter()
                .map(|r| r.into_invocation(kind))
                .collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn purge_invocations(&self, kind: EventKind, before: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE created_at < ?1", kind.logs_table()),
            params![ts(before)],
        )?;
        Ok(deleted)
    }
}
