//! Core data models used throughout Activity Harness.
//!
//! These types represent the raw records, canonical events, and sessions
//! that flow through the ingestion pipeline, plus the status and audit
//! rows the daemon maintains per source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw unit of source activity produced by a connector before
/// normalization. Ephemeral — never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub file_path: String,
    pub line_number: u64,
    pub content: String,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(default)]
    pub session_hint: Option<String>,
    #[serde(default)]
    pub group_hint: Option<String>,
    #[serde(default = "default_actor")]
    pub actor: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_status: Option<String>,
    #[serde(default)]
    pub tool_args: Option<Value>,
    #[serde(default)]
    pub tool_result: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_actor() -> String {
    "user".to_string()
}

impl RawRecord {
    /// Minimal record with defaults for the optional fields.
    pub fn new(source: &str, file_path: &str, line_number: u64, content: &str) -> Self {
        Self {
            source: source.to_string(),
            file_path: file_path.to_string(),
            line_number,
            content: content.to_string(),
            ts: None,
            session_hint: None,
            group_hint: None,
            actor: default_actor(),
            tool_name: None,
            tool_status: None,
            tool_args: None,
            tool_result: None,
            metadata: Map::new(),
        }
    }
}

/// Canonical, deduplicated event. The `event_id` is content-addressed
/// (sha256 of `source|file_path|line_number|content`), so re-ingesting
/// identical bytes is a no-op at the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub source: String,
    pub session_id: String,
    pub turn_index: u64,
    pub actor: String,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_status: Option<String>,
    pub tool_args: Option<Value>,
    pub tool_result: Option<Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

/// Aggregate over the events of one batch that share a session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_key: String,
    pub source: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub summary: String,
    pub event_count: u64,
}

/// Latest-known health snapshot for one source. Upserted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    pub status: String,
    pub last_poll_ts: DateTime<Utc>,
    pub records_seen: u64,
    pub records_ingested: u64,
    pub error_message: Option<String>,
}

/// One append-only audit row per (source, cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestAudit {
    pub audit_id: String,
    pub ts: DateTime<Utc>,
    pub source: String,
    pub event_count: u64,
    pub session_count: u64,
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Per-source outcome of one daemon run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRunSummary {
    pub source: String,
    pub status: String,
    pub records_seen: u64,
    pub records_ingested: u64,
    pub records_filtered: u64,
    pub inserted_events: u64,
    pub inserted_sessions: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SourceRunSummary {
    pub fn error(source: &str, message: String) -> Self {
        Self {
            source: source.to_string(),
            status: STATUS_ERROR.to_string(),
            records_seen: 0,
            records_ingested: 0,
            records_filtered: 0,
            inserted_events: 0,
            inserted_sessions: 0,
            error_message: Some(message),
        }
    }
}

/// End-of-run summary consumed by the CLI and export collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub once: bool,
    pub source_summaries: Vec<SourceRunSummary>,
}

impl RunSummary {
    pub fn total_records_seen(&self) -> u64 {
        self.source_summaries.iter().map(|s| s.records_seen).sum()
    }

    pub fn total_events(&self) -> u64 {
        self.source_summaries.iter().map(|s| s.inserted_events).sum()
    }

    pub fn total_sessions(&self) -> u64 {
        self.source_summaries
            .iter()
            .map(|s| s.inserted_sessions)
            .sum()
    }

    pub fn error_count(&self) -> usize {
        self.source_summaries
            .iter()
            .filter(|s| s.status == STATUS_ERROR)
            .count()
    }
}

pub const STATUS_IDLE: &str = "idle";
pub const STATUS_INGESTING: &str = "ingesting";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_NEVER_RUN: &str = "never-run";
