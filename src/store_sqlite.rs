//! Durable SQLite [`Store`] backend.
//!
//! Single-writer pool in WAL mode. Events and sessions carry their
//! natural keys as primary keys and are written with INSERT OR IGNORE;
//! timestamps are stored as RFC 3339 text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::models::{Event, IngestAudit, Session, SourceStatus};
use crate::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening store at {}", db_path.display()))?;

        Ok(Self { pool })
    }
}

fn to_json(value: &Map<String, Value>) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn opt_to_json(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp in store: {raw}"))?
        .with_timezone(&Utc))
}

#[async_trait]
impl Store for SqliteStore {
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                source TEXT NOT NULL,
                session_id TEXT NOT NULL,
                turn_index INTEGER NOT NULL,
                actor TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_name TEXT,
                tool_status TEXT,
                tool_args_json TEXT,
                tool_result_json TEXT,
                meta_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                start_ts TEXT NOT NULL,
                end_ts TEXT NOT NULL,
                summary TEXT NOT NULL,
                event_count INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS source_status (
                source TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                last_poll_ts TEXT NOT NULL,
                records_seen INTEGER NOT NULL,
                records_ingested INTEGER NOT NULL,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ingest_audit (
                audit_id TEXT PRIMARY KEY,
                ts TEXT NOT NULL,
                source TEXT NOT NULL,
                event_count INTEGER NOT NULL,
                session_count INTEGER NOT NULL,
                details_json TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_source_ts ON events(source, ts)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_source_ts ON ingest_audit(source, ts)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> Result<u64> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for event in events {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO events (
                    event_id, ts, source, session_id, turn_index, actor, content,
                    tool_name, tool_status, tool_args_json, tool_result_json, meta_json
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.event_id)
            .bind(event.ts.to_rfc3339())
            .bind(&event.source)
            .bind(&event.session_id)
            .bind(event.turn_index as i64)
            .bind(&event.actor)
            .bind(&event.content)
            .bind(&event.tool_name)
            .bind(&event.tool_status)
            .bind(opt_to_json(&event.tool_args))
            .bind(opt_to_json(&event.tool_result))
            .bind(to_json(&event.meta))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn save_sessions(&self, sessions: &[Session]) -> Result<u64> {
        if sessions.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for session in sessions {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO sessions (
                    session_key, source, start_ts, end_ts, summary, event_count
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.session_key)
            .bind(&session.source)
            .bind(session.start_ts.to_rfc3339())
            .bind(session.end_ts.to_rfc3339())
            .bind(&session.summary)
            .bind(session.event_count as i64)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn save_source_status(&self, status: &SourceStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_status (
                source, status, last_poll_ts, records_seen, records_ingested, error_message
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                status = excluded.status,
                last_poll_ts = excluded.last_poll_ts,
                records_seen = excluded.records_seen,
                records_ingested = excluded.records_ingested,
                error_message = excluded.error_message
            "#,
        )
        .bind(&status.source)
        .bind(&status.status)
        .bind(status.last_poll_ts.to_rfc3339())
        .bind(status.records_seen as i64)
        .bind(status.records_ingested as i64)
        .bind(&status.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_source_status(&self) -> Result<Vec<SourceStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT source, status, last_poll_ts, records_seen, records_ingested, error_message
            FROM source_status
            ORDER BY source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in rows {
            let ts_raw: String = row.try_get("last_poll_ts")?;
            statuses.push(SourceStatus {
                source: row.try_get("source")?,
                status: row.try_get("status")?,
                last_poll_ts: parse_ts(&ts_raw)?,
                records_seen: row.try_get::<i64, _>("records_seen")? as u64,
                records_ingested: row.try_get::<i64, _>("records_ingested")? as u64,
                error_message: row.try_get("error_message")?,
            });
        }
        Ok(statuses)
    }

    async fn append_ingest_audit(&self, audit: &IngestAudit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_audit (
                audit_id, ts, source, event_count, session_count, details_json
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&audit.audit_id)
        .bind(audit.ts.to_rfc3339())
        .bind(&audit.source)
        .bind(audit.event_count as i64)
        .bind(audit.session_count as i64)
        .bind(to_json(&audit.details))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_events_for_source(
        &self,
        source: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let since_text = since.map(|ts| ts.to_rfc3339());
        let rows = sqlx::query(
            r#"
            SELECT event_id, ts, source, session_id, turn_index, actor, content,
                   tool_name, tool_status, tool_args_json, tool_result_json, meta_json
            FROM events
            WHERE source = ?
              AND (? IS NULL OR ts >= ?)
            ORDER BY ts, turn_index
            LIMIT ?
            "#,
        )
        .bind(source)
        .bind(&since_text)
        .bind(&since_text)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let ts_raw: String = row.try_get("ts")?;
            let meta_raw: String = row.try_get("meta_json")?;
            let tool_args_raw: Option<String> = row.try_get("tool_args_json")?;
            let tool_result_raw: Option<String> = row.try_get("tool_result_json")?;
            events.push(Event {
                event_id: row.try_get("event_id")?,
                ts: parse_ts(&ts_raw)?,
                source: row.try_get("source")?,
                session_id: row.try_get("session_id")?,
                turn_index: row.try_get::<i64, _>("turn_index")? as u64,
                actor: row.try_get("actor")?,
                content: row.try_get("content")?,
                tool_name: row.try_get("tool_name")?,
                tool_status: row.try_get("tool_status")?,
                tool_args: tool_args_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
                tool_result: tool_result_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
                meta: serde_json::from_str(&meta_raw).unwrap_or_default(),
            });
        }
        Ok(events)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::normalize::normalize_records;
    use crate::sessionize::sessionize_events;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::connect(&tmp.path().join("act.sqlite"))
            .await
            .unwrap();
        store.init_schema().await.unwrap();
        (tmp, store)
    }

    fn batch() -> (Vec<Event>, Vec<Session>) {
        let mut records = Vec::new();
        for i in 0..3 {
            let mut r = RawRecord::new("chat", "/f", i + 1, &format!("msg {i}"));
            r.session_hint = Some("s1".to_string());
            r.ts = Some(Utc.with_ymd_and_hms(2026, 2, 1, 10, i as u32, 0).unwrap());
            records.push(r);
        }
        let events = normalize_records(&records);
        let sessions = sessionize_events(&events);
        (events, sessions)
    }

    #[tokio::test]
    async fn duplicate_events_are_absorbed() {
        let (_tmp, store) = store().await;
        let (events, _) = batch();

        assert_eq!(store.save_events(&events).await.unwrap(), 3);
        assert_eq!(store.save_events(&events).await.unwrap(), 0);

        let listed = store
            .list_events_for_source("chat", None, 100)
            .await
            .unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].content, "msg 0");
        assert_eq!(listed[0].turn_index, 0);
    }

    #[tokio::test]
    async fn session_conflict_keeps_original_row() {
        let (_tmp, store) = store().await;
        let (_, sessions) = batch();

        assert_eq!(store.save_sessions(&sessions).await.unwrap(), 1);

        let mut widened = sessions.clone();
        widened[0].end_ts = widened[0].end_ts + chrono::Duration::hours(2);
        assert_eq!(store.save_sessions(&widened).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn source_status_is_upserted() {
        let (_tmp, store) = store().await;
        let mut status = SourceStatus {
            source: "chat".to_string(),
            status: "ingesting".to_string(),
            last_poll_ts: Utc::now(),
            records_seen: 5,
            records_ingested: 5,
            error_message: None,
        };
        store.save_source_status(&status).await.unwrap();

        status.status = "error".to_string();
        status.error_message = Some("boom".to_string());
        store.save_source_status(&status).await.unwrap();

        let listed = store.list_source_status().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, "error");
        assert_eq!(listed[0].error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn since_bound_filters_listed_events() {
        let (_tmp, store) = store().await;
        let (events, _) = batch();
        store.save_events(&events).await.unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 2, 1, 10, 1, 0).unwrap();
        let listed = store
            .list_events_for_source("chat", Some(cutoff), 100)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
    }
}
