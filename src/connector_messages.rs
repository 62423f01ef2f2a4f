//! External message-database connector.
//!
//! Polls a foreign, read-only SQLite message store using a monotonically
//! increasing row-id watermark instead of byte offsets. A `jsonl` mode
//! reads exported message files through the file-drop path instead, for
//! hosts where the live database is not readable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::Row;

use crate::connector::{ConnectorSettings, SourceConnector, SourcePollResult};
use crate::connector_drop::FileDropConnector;
use crate::models::RawRecord;
use crate::record_line;

pub struct MessageDbConnector {
    settings: ConnectorSettings,
}

impl MessageDbConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }

    async fn poll_sqlite(&self, state: &Value) -> Result<SourcePollResult> {
        let last_rowid = state
            .get("last_rowid")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let db_path = self
            .settings
            .options
            .db_path
            .as_ref()
            .map(|p| crate::connector::expand_home(p))
            .context("messages source requires options.db_path")?;

        if !db_path.exists() {
            // Absent database is a soft condition, not a poll failure:
            // the watermark is carried forward untouched.
            let mut result =
                SourcePollResult::new(Vec::new(), json!({ "last_rowid": last_rowid }));
            result
                .details
                .insert("db_path".to_string(), json!(db_path.display().to_string()));
            result.details.insert("db_missing".to_string(), json!(true));
            return Ok(result);
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("opening message db {}", db_path.display()))?;

        let rows = sqlx::query(
            r#"
            SELECT id, ts, chat_id, sender, text, service
            FROM messages
            WHERE id > ?
              AND text IS NOT NULL
              AND TRIM(text) != ''
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(last_rowid)
        .bind(self.settings.options.limit)
        .fetch_all(&pool)
        .await?;

        let db_path_str = db_path.display().to_string();
        let mut max_rowid = last_rowid;
        let mut records: Vec<RawRecord> = Vec::new();

        for row in &rows {
            let rowid: i64 = row.try_get("id")?;
            max_rowid = max_rowid.max(rowid);

            let chat_id: Option<String> = row.try_get("chat_id")?;
            let chat_id = chat_id.unwrap_or_else(|| "unknown_chat".to_string());
            let sender: Option<String> = row.try_get("sender")?;
            let text: String = row.try_get("text")?;
            let ts_raw: Option<String> = row.try_get("ts")?;
            let service: Option<String> = row.try_get("service")?;

            let mut record =
                RawRecord::new(self.source_name(), &db_path_str, rowid as u64, &text);
            record.ts = ts_raw.as_deref().and_then(record_line::parse_ts);
            record.session_hint = Some(chat_id.clone());
            record.group_hint = Some(chat_id);
            record.actor = sender.unwrap_or_else(|| "contact".to_string());
            record
                .metadata
                .insert("rowid".to_string(), json!(rowid));
            record
                .metadata
                .insert("db_path".to_string(), json!(db_path_str.clone()));
            if let Some(service) = service {
                record.metadata.insert("service".to_string(), json!(service));
            }
            records.push(record);
        }

        pool.close().await;

        let mut result = SourcePollResult::new(records, json!({ "last_rowid": max_rowid }));
        result
            .details
            .insert("db_path".to_string(), json!(db_path_str));
        result.details.insert("db_missing".to_string(), json!(false));
        Ok(result)
    }

    async fn poll_jsonl(&self, state: &Value) -> Result<SourcePollResult> {
        let inner = FileDropConnector::new(self.settings.clone());
        let mut result = inner.poll(state).await?;
        // Exported rows key sessions by chat; a record without an
        // explicit session hint inherits its group hint.
        for record in &mut result.records {
            record.source = self.source_name().to_string();
            if record.session_hint.is_none() {
                record.session_hint = record.group_hint.clone();
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl SourceConnector for MessageDbConnector {
    fn source_name(&self) -> &str {
        &self.settings.source_name
    }

    async fn poll(&self, state: &Value) -> Result<SourcePollResult> {
        match self.settings.options.mode.as_str() {
            "jsonl" => self.poll_jsonl(state).await,
            _ => self.poll_sqlite(state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceOptions;
    use sqlx::sqlite::SqlitePool;
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn seed_db(path: &std::path::Path, rows: &[(i64, &str, &str, &str)]) {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
                .unwrap()
                .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await.unwrap();
        sqlx::query(
            "CREATE TABLE messages (id INTEGER PRIMARY KEY, ts TEXT, chat_id TEXT, sender TEXT, text TEXT, service TEXT)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, chat, sender, text) in rows {
            sqlx::query("INSERT INTO messages (id, ts, chat_id, sender, text) VALUES (?, ?, ?, ?, ?)")
                .bind(id)
                .bind("2026-03-01T09:00:00Z")
                .bind(chat)
                .bind(sender)
                .bind(text)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;
    }

    fn connector(db_path: std::path::PathBuf) -> MessageDbConnector {
        MessageDbConnector::new(ConnectorSettings {
            source_name: "imessage".to_string(),
            root_path: std::path::PathBuf::new(),
            pattern: "**/*.jsonl".to_string(),
            options: SourceOptions {
                db_path: Some(db_path),
                ..SourceOptions::default()
            },
        })
    }

    #[tokio::test]
    async fn watermark_advances_past_consumed_rows() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("chat.db");
        seed_db(&db, &[(1, "c1", "me", "hello"), (2, "c1", "contact", "hi"), (3, "c2", "me", "yo")]).await;

        let c = connector(db);
        let first = c.poll(&Value::Null).await.unwrap();
        assert_eq!(first.records.len(), 3);
        assert_eq!(first.state, json!({ "last_rowid": 3 }));
        assert_eq!(first.stats.groups_seen, 2);
        assert_eq!(first.records[0].session_hint.as_deref(), Some("c1"));
        assert_eq!(first.records[0].actor, "me");
        assert!(first.records[0].ts.is_some());

        let second = c.poll(&first.state).await.unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.state, first.state);
    }

    #[tokio::test]
    async fn blank_rows_are_skipped_by_query() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("chat.db");
        seed_db(&db, &[(1, "c1", "me", "  "), (2, "c1", "me", "real")]).await;

        let c = connector(db);
        let result = c.poll(&Value::Null).await.unwrap();
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].content, "real");
        // Watermark still covers the skipped row.
        assert_eq!(result.state, json!({ "last_rowid": 2 }));
    }

    #[tokio::test]
    async fn missing_db_is_a_soft_empty_poll() {
        let tmp = TempDir::new().unwrap();
        let c = connector(tmp.path().join("absent.db"));
        let result = c.poll(&json!({ "last_rowid": 7 })).await.unwrap();
        assert!(result.records.is_empty());
        assert_eq!(result.state, json!({ "last_rowid": 7 }));
        assert_eq!(result.details.get("db_missing"), Some(&json!(true)));
    }
}
