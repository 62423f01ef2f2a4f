//! Daemon loop: repeated polling cycles across all configured sources
//! with per-source fault isolation and durable checkpoint state.
//!
//! A raised failure from one source's poll-to-persist path is caught,
//! recorded as that source's status, and never aborts the cycle for the
//! remaining sources. Only persistence and startup failures halt the
//! daemon. The per-source opaque state map is written exactly once per
//! cycle, after all sources have been attempted.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connector::{build_connectors, SourceConnector};
use crate::error::IngestError;
use crate::filters::FilterPipeline;
use crate::hooks::{HookRegistry, PipelineContext, PluginSet};
use crate::models::{
    IngestAudit, RunSummary, SourceRunSummary, SourceStatus, STATUS_ERROR, STATUS_IDLE,
    STATUS_INGESTING, STATUS_NEVER_RUN,
};
use crate::normalize::normalize_records;
use crate::sessionize::sessionize_events;
use crate::store::Store;

/// Per-source opaque state blobs, persisted wholesale between cycles as
/// pretty-printed JSON so checkpoint advances stay human-diffable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeState {
    #[serde(default)]
    pub per_source: BTreeMap<String, Value>,
}

/// Load persisted state. Unreadable state degrades to empty — a full
/// re-read — and is never fatal.
pub fn load_state(path: &Path) -> RuntimeState {
    if !path.exists() {
        return RuntimeState::default();
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            let corruption = IngestError::CheckpointCorruption {
                path: path.display().to_string(),
                message: err.to_string(),
            };
            warn!("{corruption}; starting from empty state");
            return RuntimeState::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(err) => {
            let corruption = IngestError::CheckpointCorruption {
                path: path.display().to_string(),
                message: err.to_string(),
            };
            warn!("{corruption}; starting from empty state");
            RuntimeState::default()
        }
    }
}

pub fn save_state(path: &Path, state: &RuntimeState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let payload = serde_json::to_string_pretty(state)?;
    std::fs::write(path, payload)
        .with_context(|| format!("writing state file {}", path.display()))
}

pub struct Daemon {
    config: Config,
    connectors: Vec<Box<dyn SourceConnector>>,
    filters: HashMap<String, FilterPipeline>,
    hooks: HookRegistry,
    store: Box<dyn Store>,
    state: RuntimeState,
    stop: Arc<AtomicBool>,
}

impl Daemon {
    /// Build a daemon from config, a store backend, and the plugin set
    /// the embedding application registered. Plugin resolution failures
    /// are fatal here, before any cycle starts.
    pub fn new(
        config: Config,
        store: Box<dyn Store>,
        plugins: &PluginSet,
        reset_state: bool,
    ) -> Result<Self> {
        let connectors = build_connectors(&config.sources)?;

        let mut filters = HashMap::new();
        for source in &config.sources {
            if source.enabled && !source.filters.is_empty() {
                filters.insert(source.name.clone(), FilterPipeline::from_config(&source.filters));
            }
        }

        let mut hooks = HookRegistry::new();
        plugins.load(&config.hooks.plugins, &mut hooks)?;

        let state = if reset_state {
            RuntimeState::default()
        } else {
            load_state(&config.daemon.state_path)
        };

        Ok(Self {
            config,
            connectors,
            filters,
            hooks,
            store,
            state,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag observed at the top of each cycle; a cycle always completes
    /// cleanly once started.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn run(&mut self, once: bool) -> Result<RunSummary> {
        self.store.init_schema().await?;
        let started = Utc::now();
        let mut cycle_summary: Vec<SourceRunSummary> = Vec::new();

        let source_names: Vec<&str> = self
            .connectors
            .iter()
            .map(|c| c.source_name())
            .collect();
        info!(once, sources = ?source_names, "starting ingestion run");

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let mut total_records: u64 = 0;
            cycle_summary.clear();

            for connector in &self.connectors {
                let source = connector.source_name();
                let state_blob = self
                    .state
                    .per_source
                    .get(source)
                    .cloned()
                    .unwrap_or(Value::Null);
                let now = Utc::now();

                match process_source(
                    connector.as_ref(),
                    &state_blob,
                    self.filters.get(source),
                    &self.hooks,
                    self.store.as_ref(),
                )
                .await
                {
                    Ok((summary, new_state)) => {
                        self.state.per_source.insert(source.to_string(), new_state);
                        total_records += summary.records_ingested;

                        self.store
                            .save_source_status(&SourceStatus {
                                source: source.to_string(),
                                status: summary.status.clone(),
                                last_poll_ts: now,
                                records_seen: summary.records_seen,
                                records_ingested: summary.records_ingested,
                                error_message: None,
                            })
                            .await?;
                        debug!(
                            source,
                            status = %summary.status,
                            seen = summary.records_seen,
                            inserted_events = summary.inserted_events,
                            "source polled"
                        );
                        cycle_summary.push(summary);
                    }
                    Err(err @ IngestError::Persistence(_)) => {
                        // Durable-store failures halt the run before the
                        // checkpoint advances; replay next start is safe.
                        return Err(err.into());
                    }
                    Err(err) => {
                        error!(source, "connector failure: {err}");
                        let message = err.to_string();
                        cycle_summary.push(SourceRunSummary::error(source, message.clone()));
                        if let Err(status_err) = self
                            .store
                            .save_source_status(&SourceStatus {
                                source: source.to_string(),
                                status: STATUS_ERROR.to_string(),
                                last_poll_ts: now,
                                records_seen: 0,
                                records_ingested: 0,
                                error_message: Some(message),
                            })
                            .await
                        {
                            return Err(IngestError::Persistence(status_err.to_string()).into());
                        }
                    }
                }
            }

            save_state(&self.config.daemon.state_path, &self.state)?;

            if once {
                break;
            }

            if total_records == 0 {
                debug!(
                    "no new records; sleeping {}s",
                    self.config.daemon.poll_interval_seconds
                );
                tokio::time::sleep(Duration::from_secs(
                    self.config.daemon.poll_interval_seconds,
                ))
                .await;
            } else {
                info!(total_records, "processed records across sources");
            }
        }

        self.store.close().await;
        let summary = RunSummary {
            started_at: started,
            ended_at: Utc::now(),
            once,
            source_summaries: cycle_summary,
        };
        info!(
            records_seen = summary.total_records_seen(),
            events = summary.total_events(),
            sessions = summary.total_sessions(),
            errors = summary.error_count(),
            "ingestion finished"
        );
        Ok(summary)
    }

    /// Print the live status listing, including configured sources that
    /// have never run.
    pub async fn print_source_status(&self) -> Result<()> {
        self.store.init_schema().await?;
        let statuses = self.store.list_source_status().await?;
        let known: std::collections::HashSet<&str> =
            statuses.iter().map(|s| s.source.as_str()).collect();

        for status in &statuses {
            println!(
                "{:<12} status={:<10} seen={:<5} ingested={:<5} last={}{}",
                status.source,
                status.status,
                status.records_seen,
                status.records_ingested,
                status.last_poll_ts.to_rfc3339(),
                status
                    .error_message
                    .as_deref()
                    .map(|m| format!(" error={m}"))
                    .unwrap_or_default()
            );
        }

        for connector in &self.connectors {
            if !known.contains(connector.source_name()) {
                println!("{:<12} status={}", connector.source_name(), STATUS_NEVER_RUN);
            }
        }

        self.store.close().await;
        Ok(())
    }
}

/// Poll one source and run its batch through the pipeline. The explicit
/// `Result` is the isolation boundary: the caller pattern-matches on it
/// instead of letting a failure cross into other sources.
async fn process_source(
    connector: &dyn SourceConnector,
    state: &Value,
    filters: Option<&FilterPipeline>,
    hooks: &HookRegistry,
    store: &dyn Store,
) -> Result<(SourceRunSummary, Value), IngestError> {
    let source = connector.source_name();

    let poll = connector
        .poll(state)
        .await
        .map_err(|err| IngestError::poll(source, err))?;

    let records_seen = poll.stats.items_seen;
    let (kept, dropped) = match filters {
        Some(pipeline) => pipeline.apply(poll.records),
        None => (poll.records, 0),
    };
    let records_ingested = kept.len() as u64;

    if kept.is_empty() {
        let summary = SourceRunSummary {
            source: source.to_string(),
            status: STATUS_IDLE.to_string(),
            records_seen,
            records_ingested: 0,
            records_filtered: dropped,
            inserted_events: 0,
            inserted_sessions: 0,
            error_message: None,
        };
        return Ok((summary, poll.state));
    }

    let mut ctx = PipelineContext {
        records: kept,
        ..PipelineContext::default()
    };

    ctx = HookRegistry::run(&hooks.pre_normalize, ctx);
    ctx.events = normalize_records(&ctx.records);
    ctx = HookRegistry::run(&hooks.post_normalize, ctx);
    ctx.sessions = sessionize_events(&ctx.events);
    ctx = HookRegistry::run(&hooks.post_sessionize, ctx);

    let inserted_events = store
        .save_events(&ctx.events)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;
    let inserted_sessions = store
        .save_sessions(&ctx.sessions)
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;

    let mut details = poll.details;
    details.insert("records".to_string(), json!(records_ingested));
    details.insert("records_filtered".to_string(), json!(dropped));
    details.insert("groups_seen".to_string(), json!(poll.stats.groups_seen));
    details.insert(
        "item_counts_by_group".to_string(),
        json!(poll.stats.item_counts_by_group),
    );
    store
        .append_ingest_audit(&IngestAudit {
            audit_id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            source: source.to_string(),
            event_count: inserted_events,
            session_count: inserted_sessions,
            details,
        })
        .await
        .map_err(|err| IngestError::Persistence(err.to_string()))?;

    let summary = SourceRunSummary {
        source: source.to_string(),
        status: STATUS_INGESTING.to_string(),
        records_seen,
        records_ingested,
        records_filtered: dropped,
        inserted_events,
        inserted_sessions,
        error_message: None,
    };
    Ok((summary, poll.state))
}

/// Human-readable end-of-run table.
pub fn print_run_summary(summary: &RunSummary) {
    println!(
        "run {} -> {}",
        summary.started_at.to_rfc3339(),
        summary.ended_at.to_rfc3339()
    );
    for source in &summary.source_summaries {
        println!(
            "  {:<12} status={:<10} seen={:<5} ingested={:<5} filtered={:<5} events={:<5} sessions={}{}",
            source.source,
            source.status,
            source.records_seen,
            source.records_ingested,
            source.records_filtered,
            source.inserted_events,
            source.inserted_sessions,
            source
                .error_message
                .as_deref()
                .map(|m| format!(" error={m}"))
                .unwrap_or_default()
        );
    }
    println!(
        "  totals: records={} events={} sessions={} errors={}",
        summary.total_records_seen(),
        summary.total_events(),
        summary.total_sessions(),
        summary.error_count()
    );
}

/// Machine-readable summary for export collaborators.
pub fn print_run_summary_json(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn state_round_trips_and_tolerates_corruption() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state.json");

        let mut state = RuntimeState::default();
        state
            .per_source
            .insert("chat".to_string(), json!({"last_rowid": 42}));
        save_state(&path, &state).unwrap();

        let loaded = load_state(&path);
        assert_eq!(loaded.per_source.get("chat"), Some(&json!({"last_rowid": 42})));

        std::fs::write(&path, "{ not json").unwrap();
        let fallback = load_state(&path);
        assert!(fallback.per_source.is_empty());
    }

    #[test]
    fn missing_state_file_is_empty_state() {
        let tmp = TempDir::new().unwrap();
        let state = load_state(&tmp.path().join("absent.json"));
        assert!(state.per_source.is_empty());
    }
}
