//! In-memory [`Store`] implementation for tests.
//!
//! Keyed maps behind `std::sync::RwLock`, mirroring the SQLite
//! backend's insert-or-ignore and upsert semantics.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{Event, IngestAudit, Session, SourceStatus};
use crate::store::Store;

#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, Event>>,
    sessions: RwLock<HashMap<String, Session>>,
    statuses: RwLock<HashMap<String, SourceStatus>>,
    audits: RwLock<Vec<IngestAudit>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_count(&self) -> usize {
        self.audits.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn save_events(&self, events: &[Event]) -> Result<u64> {
        let mut stored = self.events.write().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0;
        for event in events {
            if !stored.contains_key(&event.event_id) {
                stored.insert(event.event_id.clone(), event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn save_sessions(&self, sessions: &[Session]) -> Result<u64> {
        let mut stored = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let mut inserted = 0;
        for session in sessions {
            if !stored.contains_key(&session.session_key) {
                stored.insert(session.session_key.clone(), session.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn save_source_status(&self, status: &SourceStatus) -> Result<()> {
        self.statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(status.source.clone(), status.clone());
        Ok(())
    }

    async fn list_source_status(&self) -> Result<Vec<SourceStatus>> {
        let mut statuses: Vec<SourceStatus> =
            self.statuses.read().unwrap_or_else(|e| e.into_inner()).values().cloned().collect();
        statuses.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(statuses)
    }

    async fn append_ingest_audit(&self, audit: &IngestAudit) -> Result<()> {
        self.audits.write().unwrap_or_else(|e| e.into_inner()).push(audit.clone());
        Ok(())
    }

    async fn list_events_for_source(
        &self,
        source: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|e| e.source == source)
            .filter(|e| since.map(|cutoff| e.ts >= cutoff).unwrap_or(true))
            .cloned()
            .collect();
        events.sort_by(|a, b| (a.ts, a.turn_index).cmp(&(b.ts, b.turn_index)));
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::normalize::normalize_records;

    #[tokio::test]
    async fn insert_or_ignore_counting_matches_sqlite_semantics() {
        let store = MemoryStore::new();
        let events = normalize_records(&[
            RawRecord::new("s", "/f", 1, "a"),
            RawRecord::new("s", "/f", 2, "b"),
        ]);

        assert_eq!(store.save_events(&events).await.unwrap(), 2);
        assert_eq!(store.save_events(&events).await.unwrap(), 0);

        let listed = store.list_events_for_source("s", None, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
