//! Persistence port for the ingestion pipeline.
//!
//! `save_*` return the number of rows actually inserted: rows that
//! already existed under their natural key (content-hash event id,
//! session key) are silently absorbed, never double-counted. Source
//! status rows are upsert-with-overwrite; audit rows are append-only.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::models::{Event, IngestAudit, Session, SourceStatus};
use crate::store_memory::MemoryStore;
use crate::store_sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables and indexes. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Insert events, ignoring already-present event ids. Returns the
    /// count of rows actually inserted.
    async fn save_events(&self, events: &[Event]) -> Result<u64>;

    /// Insert sessions, keeping the existing row on key conflict.
    async fn save_sessions(&self, sessions: &[Session]) -> Result<u64>;

    /// Upsert the latest health snapshot for a source.
    async fn save_source_status(&self, status: &SourceStatus) -> Result<()>;

    /// All known source statuses, ordered by source name.
    async fn list_source_status(&self) -> Result<Vec<SourceStatus>>;

    /// Append one audit row. Never mutated afterwards.
    async fn append_ingest_audit(&self, audit: &IngestAudit) -> Result<()>;

    /// Events for one source ordered by (ts, turn_index), for the
    /// read-side collaborators.
    async fn list_events_for_source(
        &self,
        source: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Event>>;

    async fn close(&self);
}

/// Construct the configured backend.
pub async fn build_store(config: &StoreConfig) -> Result<Box<dyn Store>> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(MemoryStore::new())),
        _ => Ok(Box::new(SqliteStore::connect(&config.path).await?)),
    }
}
