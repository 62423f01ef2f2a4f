//! Source connector contract and registry.
//!
//! Every source kind exposes the same capability: given an opaque state
//! blob, return newly observed records plus the updated state and poll
//! statistics. The daemon holds a slice of boxed [`SourceConnector`]s
//! and never switches on concrete kind after construction.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{SourceConfig, SourceOptions};
use crate::connector_drop::FileDropConnector;
use crate::connector_messages::MessageDbConnector;
use crate::connector_trawl::TrawlConnector;
use crate::models::RawRecord;

/// Per-poll statistics: items seen, distinct groups, and item counts
/// keyed by group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePollStats {
    pub items_seen: u64,
    pub groups_seen: u64,
    pub item_counts_by_group: BTreeMap<String, u64>,
}

impl SourcePollStats {
    /// Tally records by group hint, falling back to session hint, then
    /// originating file.
    pub fn tally(records: &[RawRecord]) -> Self {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for record in records {
            let key = record
                .group_hint
                .clone()
                .or_else(|| record.session_hint.clone())
                .unwrap_or_else(|| record.file_path.clone());
            *counts.entry(key).or_insert(0) += 1;
        }
        Self {
            items_seen: records.len() as u64,
            groups_seen: counts.len() as u64,
            item_counts_by_group: counts,
        }
    }
}

/// Everything a poll returns. `state` replaces the blob the daemon
/// stored for this source; `details` feeds the ingest audit row.
#[derive(Debug, Clone)]
pub struct SourcePollResult {
    pub records: Vec<RawRecord>,
    pub state: Value,
    pub stats: SourcePollStats,
    pub details: Map<String, Value>,
}

impl SourcePollResult {
    pub fn new(records: Vec<RawRecord>, state: Value) -> Self {
        let stats = SourcePollStats::tally(&records);
        Self {
            records,
            state,
            stats,
            details: Map::new(),
        }
    }
}

/// A data source that can be polled for new activity records.
///
/// `poll` must be safe to call repeatedly with the same state: with no
/// new bytes written it returns the same yet-unconsumed records and an
/// equivalent state. Connectors never mutate on-disk checkpoint data —
/// progress travels only through the returned state blob, so a mid-poll
/// crash cannot silently discard unflushed progress.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Name of the configured source this connector reads.
    fn source_name(&self) -> &str;

    /// Poll for newly observed records since `state`.
    async fn poll(&self, state: &Value) -> Result<SourcePollResult>;
}

/// Shared construction inputs for the built-in connectors.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub source_name: String,
    pub root_path: PathBuf,
    pub pattern: String,
    pub options: SourceOptions,
}

impl ConnectorSettings {
    fn from_config(source: &SourceConfig) -> Self {
        Self {
            source_name: source.name.clone(),
            root_path: expand_home(&source.root),
            pattern: source.pattern.clone(),
            options: source.options.clone(),
        }
    }
}

/// Construct one connector per enabled source. This is the only place
/// that inspects the configured `kind`.
pub fn build_connectors(sources: &[SourceConfig]) -> Result<Vec<Box<dyn SourceConnector>>> {
    let mut connectors: Vec<Box<dyn SourceConnector>> = Vec::new();

    for source in sources {
        if !source.enabled {
            continue;
        }
        let settings = ConnectorSettings::from_config(source);
        match source.kind.as_str() {
            "trawl" => connectors.push(Box::new(TrawlConnector::new(settings))),
            "messages" => connectors.push(Box::new(MessageDbConnector::new(settings))),
            _ => connectors.push(Box::new(FileDropConnector::new(settings))),
        }
    }

    Ok(connectors)
}

/// Expand a leading `~` against the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_groups_by_hint_then_file() {
        let mut a = RawRecord::new("s", "/f1", 1, "x");
        a.group_hint = Some("g1".to_string());
        let mut b = RawRecord::new("s", "/f1", 2, "y");
        b.session_hint = Some("sess".to_string());
        let c = RawRecord::new("s", "/f2", 1, "z");

        let stats = SourcePollStats::tally(&[a, b, c]);
        assert_eq!(stats.items_seen, 3);
        assert_eq!(stats.groups_seen, 3);
        assert_eq!(stats.item_counts_by_group.get("g1"), Some(&1));
        assert_eq!(stats.item_counts_by_group.get("/f2"), Some(&1));
    }

    #[test]
    fn build_skips_disabled_sources() {
        let config: crate::config::Config = toml::from_str(
            r#"
            [[sources]]
            name = "on"
            kind = "file-drop"

            [[sources]]
            name = "off"
            enabled = false
            "#,
        )
        .unwrap();

        let connectors = build_connectors(&config.sources).unwrap();
        assert_eq!(connectors.len(), 1);
        assert_eq!(connectors[0].source_name(), "on");
    }
}
