//! Postgres-backed event store (sqlx).
//!
//! `fetch_and_lock_due` claims rows with `SELECT ... FOR UPDATE SKIP LOCKED`
//! inside one transaction, so concurrent instances never receive the same
//! event: rows another transaction is claiming are skipped, not waited on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

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

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cron_events (
    id TEXT PRIMARY KEY,
    trigger_name TEXT NOT NULL,
    scheduled_time TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    tries INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMPTZ,
    UNIQUE (trigger_name, scheduled_time)
);
CREATE INDEX IF NOT EXISTS cron_events_status_time ON cron_events (status, scheduled_time);

CREATE TABLE IF NOT EXISTS cron_event_invocation_logs (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES cron_events (id) ON DELETE CASCADE,
    status INTEGER NOT NULL,
    request JSONB NOT NULL,
    response JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS cron_event_invocation_logs_event ON cron_event_invocation_logs (event_id);

CREATE TABLE IF NOT EXISTS one_off_events (
    id TEXT PRIMARY KEY,
    webhook_conf JSONB NOT NULL,
    scheduled_time TIMESTAMPTZ NOT NULL,
    retry_conf JSONB NOT NULL,
    payload JSONB,
    header_conf JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    tries INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMPTZ,
    comment TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS one_off_events_status_time ON one_off_events (status, scheduled_time);

CREATE TABLE IF NOT EXISTS one_off_event_invocation_logs (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES one_off_events (id) ON DELETE CASCADE,
    status INTEGER NOT NULL,
    request JSONB NOT NULL,
    response JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS one_off_event_invocation_logs_event ON one_off_event_invocation_logs (event_id);
";

/// Event store over a Postgres connection pool.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Connect and create the tables if they do not exist yet.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<EventStatus> {
    raw.parse().map_err(SchedulerError::CorruptRow)
}

fn cron_from_row(row: &PgRow) -> Result<CronEvent> {
    let status: String = row.try_get("status")?;
    let tries: i32 = row.try_get("tries")?;
    Ok(CronEvent {
        id: row.try_get("id")?,
        trigger_name: row.try_get("trigger_name")?,
        scheduled_time: row.try_get("scheduled_time")?,
        status: parse_status(&status)?,
        tries: tries as u32,
        next_retry_at: row.try_get("next_retry_at")?,
    })
}

fn one_off_from_row(row: &PgRow) -> Result<OneOffEvent> {
    let status: String = row.try_get("status")?;
    let tries: i32 = row.try_get("tries")?;
    let webhook: serde_json::Value = row.try_get("webhook_conf")?;
    let retry_conf: serde_json::Value = row.try_get("retry_conf")?;
    let headers: serde_json::Value = row.try_get("header_conf")?;
    Ok(OneOffEvent {
        id: row.try_get("id")?,
        webhook: serde_json::from_value(webhook)?,
        scheduled_time: row.try_get("scheduled_time")?,
        retry_conf: serde_json::from_value(retry_conf)?,
        payload: row.try_get("payload")?,
        headers: serde_json::from_value(headers)?,
        comment: row.try_get("comment")?,
        status: parse_status(&status)?,
        tries: tries as u32,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn invocation_from_row(row: &PgRow, kind: EventKind) -> Result<Invocation> {
    Ok(Invocation {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        kind,
        status: row.try_get("status")?,
        request: row.try_get("request")?,
        response: row.try_get("response")?,
        created_at: row.try_get("created_at")?,
    })
}

fn status_strings(statuses: &[EventStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn top_up_candidates(
        &self,
        trigger_names: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<CronTriggerStats>> {
        if trigger_names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT t.name AS trigger_name,
                    COUNT(e.id) AS upcoming,
                    MAX(e.scheduled_time) AS max_scheduled_time
             FROM UNNEST($1::text[]) AS t(name)
             LEFT JOIN cron_events e
               ON e.trigger_name = t.name AND e.status = 'scheduled' AND e.tries = 0
             GROUP BY t.name
             HAVING COUNT(e.id) < $2",
        )
        .bind(trigger_names)
        .bind(CRON_EVENT_BUFFER as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<CronTriggerStats> {
                let upcoming: i64 = row.try_get("upcoming")?;
                let max: Option<DateTime<Utc>> = row.try_get("max_scheduled_time")?;
                Ok(CronTriggerStats {
                    trigger_name: row.try_get("trigger_name")?,
                    upcoming_events_count: upcoming as usize,
                    max_scheduled_time: max.unwrap_or(now),
                })
            })
            .collect()
    }

    async fn insert_cron_events(&self, seeds: &[CronEventSeed]) -> Result<usize> {
        if seeds.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = seeds.iter().map(|_| uuid::Uuid::new_v4().to_string()).collect();
        let names: Vec<String> = seeds.iter().map(|s| s.trigger_name.clone()).collect();
        let times: Vec<DateTime<Utc>> = seeds.iter().map(|s| s.scheduled_time).collect();
        let result = sqlx::query(
            "INSERT INTO cron_events (id, trigger_name, scheduled_time)
             SELECT * FROM UNNEST($1::text[], $2::text[], $3::timestamptz[])
             ON CONFLICT (trigger_name, scheduled_time) DO NOTHING",
        )
        .bind(&ids)
        .bind(&names)
        .bind(&times)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn fetch_and_lock_due(&self, now: DateTime<Utc>) -> Result<DueEvents> {
        let mut tx = self.pool.begin().await?;

        let cron_rows = sqlx::query(&format!(
            "UPDATE cron_events SET status = 'locked'
             WHERE id IN (
                 SELECT id FROM cron_events
                 WHERE status = 'scheduled' AND COALESCE(next_retry_at, scheduled_time) <= $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {CRON_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let one_off_rows = sqlx::query(&format!(
            "UPDATE one_off_events SET status = 'locked'
             WHERE id IN (
                 SELECT id FROM one_off_events
                 WHERE status = 'scheduled' AND COALESCE(next_retry_at, scheduled_time) <= $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {ONE_OFF_COLUMNS}"
        ))
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut cron = cron_rows.iter().map(cron_from_row).collect::<Result<Vec<_>>>()?;
        let mut one_off = one_off_rows.iter().map(one_off_from_row).collect::<Result<Vec<_>>>()?;
        cron.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
        one_off.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then_with(|| a.id.cmp(&b.id)));
        Ok(DueEvents { cron, one_off })
    }

    async fn record_invocation(&self, invocation: &NewInvocation) -> Result<()> {
        let kind = invocation.kind;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {} (id, event_id, status, request, response, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            kind.logs_table()
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&invocation.event_id)
        .bind(invocation.status)
        .bind(&invocation.request)
        .bind(&invocation.response)
        .bind(invocation.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "UPDATE {} SET tries = tries + 1 WHERE id = $1",
            kind.events_table()
        ))
        .bind(&invocation.event_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_state(&self, kind: EventKind, id: &str, update: StateUpdate) -> Result<()> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = $1, next_retry_at = $2 WHERE id = $3 AND status = 'locked'",
            kind.events_table()
        ))
        .bind(update.status().as_str())
        .bind(update.next_retry_at())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SchedulerError::NotLocked { kind, id: id.to_string() });
        }
        Ok(())
    }

    async fn unlock(&self, kind: EventKind, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = 'scheduled' WHERE status = 'locked' AND id = ANY($1)",
            kind.events_table()
        ))
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn unlock_all(&self, kind: EventKind) -> Result<usize> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET status = 'scheduled' WHERE status = 'locked'",
            kind.events_table()
        ))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
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
        let result = sqlx::query(
            "DELETE FROM cron_events
             WHERE trigger_name = ANY($1) AND scheduled_time > $2
               AND status = 'scheduled' AND tries = 0",
        )
        .bind(&names)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn create_one_off_event(
        &self,
        event: NewOneOffEvent,
        now: DateTime<Utc>,
    ) -> Result<OneOffEvent> {
        let row = sqlx::query(&format!(
            "INSERT INTO one_off_events
                 (id, webhook_conf, scheduled_time, retry_conf, payload, header_conf, comment, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {ONE_OFF_COLUMNS}"
        ))
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(serde_json::to_value(&event.webhook)?)
        .bind(event.scheduled_time)
        .bind(serde_json::to_value(&event.retry_conf)?)
        .bind(&event.payload)
        .bind(serde_json::to_value(&event.headers)?)
        .bind(&event.comment)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        one_off_from_row(&row)
    }

    async fn delete_one_off_event(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM one_off_events WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(status) = status else {
            return Ok(false);
        };
        if parse_status(&status)? == EventStatus::Locked {
            return Err(SchedulerError::Locked { kind: EventKind::OneOff, id: id.to_string() });
        }
        sqlx::query("DELETE FROM one_off_events WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_cron_events(
        &self,
        filter: &CronEventFilter,
        page: Pagination,
    ) -> Result<Page<CronEvent>> {
        let statuses = status_strings(&filter.statuses);
        let where_sql = "WHERE ($1::text IS NULL OR trigger_name = $1)
                           AND (cardinality($2::text[]) = 0 OR status = ANY($2))";

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM cron_events {where_sql}"))
            .bind(&filter.trigger_name)
            .bind(&statuses)
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(&format!(
            "SELECT {CRON_COLUMNS} FROM cron_events {where_sql}
             ORDER BY scheduled_time ASC, id ASC LIMIT $3 OFFSET $4"
        ))
        .bind(&filter.trigger_name)
        .bind(&statuses)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            rows: rows.iter().map(cron_from_row).collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn list_one_off_events(
        &self,
        filter: &OneOffEventFilter,
        page: Pagination,
    ) -> Result<Page<OneOffEvent>> {
        let statuses = status_strings(&filter.statuses);
        let where_sql = "WHERE cardinality($1::text[]) = 0 OR status = ANY($1)";

        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM one_off_events {where_sql}"))
                .bind(&statuses)
                .fetch_one(&self.pool)
                .await?;
        let rows = sqlx::query(&format!(
            "SELECT {ONE_OFF_COLUMNS} FROM one_off_events {where_sql}
             ORDER BY scheduled_time ASC, id ASC LIMIT $2 OFFSET $3"
        ))
        .bind(&statuses)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            rows: rows.iter().map(one_off_from_row).collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn list_invocations(
        &self,
        filter: &InvocationFilter,
        page: Pagination,
    ) -> Result<Page<Invocation>> {
        let kind = filter.kind();
        let logs = kind.logs_table();
        let (from, where_sql, key) = match filter {
            InvocationFilter::Event { event_id, .. } => (
                format!("{logs} l"),
                "WHERE l.event_id = $1",
                Some(event_id.clone()),
            ),
            InvocationFilter::Kind { trigger_name: Some(name), kind: EventKind::Cron } => (
                format!("{logs} l JOIN cron_events e ON e.id = l.event_id"),
                "WHERE e.trigger_name = $1",
                Some(name.clone()),
            ),
            InvocationFilter::Kind { .. } => (
                format!("{logs} l"),
                "WHERE $1::text IS NULL",
                None,
            ),
        };

        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {from} {where_sql}"))
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query(&format!(
            "SELECT l.id, l.event_id, l.status, l.request, l.response, l.created_at
             FROM {from} {where_sql}
             ORDER BY l.created_at DESC, l.id ASC LIMIT $2 OFFSET $3"
        ))
        .bind(&key)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            rows: rows
                .iter()
                .map(|row| invocation_from_row(row, kind))
                .collect::<Result<_>>()?,
            count: count as u64,
        })
    }

    async fn purge_invocations(&self, kind: EventKind, before: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE created_at < $1",
            kind.logs_table()
        ))
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, SubsecRound};
    use hookclock_core::{RetryConf, WebhookRef};
    use std::collections::HashSet;

    // Every test truncates the same tables.
    static SCRATCH: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    /// Runs only when `HOOKCLOCK_TEST_PG_URL` points at a scratch database.
    async fn scratch_store() -> Option<PgEventStore> {
        let url = std::env::var("HOOKCLOCK_TEST_PG_URL").ok()?;
        let store = PgEventStore::connect(&url, 4).await.unwrap();
        sqlx::query(
            "TRUNCATE cron_events, cron_event_invocation_logs,
                      one_off_events, one_off_event_invocation_logs",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        Some(store)
    }

    fn seeds(name: &str, from: DateTime<Utc>, n: i64) -> Vec<CronEventSeed> {
        (0..n)
            .map(|i| CronEventSeed {
                trigger_name: name.into(),
                scheduled_time: from - ChronoDuration::minutes(i),
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_skip_locked_fetches_are_disjoint() {
        let _guard = SCRATCH.lock().await;
        let Some(store) = scratch_store().await else {
            return;
        };
        let now = Utc::now().trunc_subsecs(0);
        let batch = seeds("pg-hourly", now, 200);
        assert_eq!(store.insert_cron_events(&batch).await.unwrap(), 200);
        assert_eq!(store.insert_cron_events(&batch).await.unwrap(), 0);

        let a = store.clone();
        let b = store.clone();
        let left = tokio::spawn(async move { a.fetch_and_lock_due(now).await });
        let right = tokio::spawn(async move { b.fetch_and_lock_due(now).await });
        let left = left.await.unwrap().unwrap();
        let right = right.await.unwrap().unwrap();

        let ids: HashSet<_> = left.cron.iter().map(|e| e.id.clone()).collect();
        assert!(right.cron.iter().all(|e| !ids.contains(&e.id)));
        assert_eq!(left.cron.len() + right.cron.len(), 200);
    }

    #[tokio::test]
    async fn test_fetch_skips_row_locked_by_other_transaction() {
        let _guard = SCRATCH.lock().await;
        let Some(store) = scratch_store().await else {
            return;
        };
        let now = Utc::now().trunc_subsecs(0);
        store.insert_cron_events(&seeds("pg-hourly", now, 3)).await.unwrap();

        let held: String = sqlx::query_scalar("SELECT id FROM cron_events ORDER BY scheduled_time LIMIT 1")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let mut tx = store.pool.begin().await.unwrap();
        sqlx::query("SELECT id FROM cron_events WHERE id = $1 FOR UPDATE")
            .bind(&held)
            .execute(&mut *tx)
            .await
            .unwrap();

        let due = tokio::time::timeout(std::time::Duration::from_secs(5), store.fetch_and_lock_due(now))
            .await
            .expect("fetch blocked on a locked row")
            .unwrap();
        assert_eq!(due.cron.len(), 2);
        assert!(due.cron.iter().all(|e| e.id != held));
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_top_up_candidates_filters_full_buffers() {
        let _guard = SCRATCH.lock().await;
        let Some(store) = scratch_store().await else {
            return;
        };
        let now = Utc::now().trunc_subsecs(0);
        let future = now + ChronoDuration::days(30);
        store
            .insert_cron_events(&seeds("full", future, CRON_EVENT_BUFFER as i64))
            .await
            .unwrap();
        store.insert_cron_events(&seeds("partial", future, 5)).await.unwrap();

        let names = vec!["full".to_string(), "partial".to_string(), "empty".to_string()];
        let mut stats = store.top_up_candidates(&names, now).await.unwrap();
        stats.sort_by(|a, b| a.trigger_name.cmp(&b.trigger_name));

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].trigger_name, "empty");
        assert_eq!(stats[0].upcoming_events_count, 0);
        assert_eq!(stats[0].max_scheduled_time, now);
        assert_eq!(stats[1].trigger_name, "partial");
        assert_eq!(stats[1].upcoming_events_count, 5);
        assert_eq!(stats[1].max_scheduled_time, future);
    }

    #[tokio::test]
    async fn test_unlock_only_touches_named_locked_rows() {
        let _guard = SCRATCH.lock().await;
        let Some(store) = scratch_store().await else {
            return;
        };
        let now = Utc::now().trunc_subsecs(0);
        store.insert_cron_events(&seeds("pg-hourly", now, 4)).await.unwrap();
        let due = store.fetch_and_lock_due(now).await.unwrap();
        assert_eq!(due.cron.len(), 4);

        let ids: Vec<String> = due.cron.iter().take(2).map(|e| e.id.clone()).collect();
        let unknown = vec!["missing".to_string()];
        assert_eq!(store.unlock(EventKind::Cron, &ids).await.unwrap(), 2);
        assert_eq!(store.unlock(EventKind::Cron, &ids).await.unwrap(), 0);
        assert_eq!(store.unlock(EventKind::Cron, &unknown).await.unwrap(), 0);
        assert_eq!(store.unlock_all(EventKind::Cron).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invocation_counts_tries_and_terminal_state_is_final() {
        let _guard = SCRATCH.lock().await;
        let Some(store) = scratch_store().await else {
            return;
        };
        let now = Utc::now().trunc_subsecs(0);
        let event = store
            .create_one_off_event(
                NewOneOffEvent {
                    webhook: WebhookRef::Url("http://localhost/once".into()),
                    scheduled_time: now,
                    retry_conf: RetryConf::default(),
                    payload: None,
                    headers: vec![],
                    comment: None,
                },
                now,
            )
            .await
            .unwrap();
        let due = store.fetch_and_lock_due(now).await.unwrap();
        assert_eq!(due.one_off.len(), 1);
        assert!(matches!(
            store.delete_one_off_event(&event.id).await,
            Err(SchedulerError::Locked { .. })
        ));

        store
            .record_invocation(&NewInvocation {
                kind: EventKind::OneOff,
                event_id: event.id.clone(),
                status: 200,
                request: serde_json::json!({}),
                response: serde_json::json!({}),
                created_at: now,
            })
            .await
            .unwrap();
        store.set_state(EventKind::OneOff, &event.id, StateUpdate::Delivered).await.unwrap();

        let page = store
            .list_one_off_events(&OneOffEventFilter::default(), Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.rows[0].status, EventStatus::Delivered);
        assert_eq!(page.rows[0].tries, 1);
        assert_eq!(store.unlock_all(EventKind::OneOff).await.unwrap(), 0);
        assert!(store.fetch_and_lock_due(now).await.unwrap().is_empty());
    }
}
