//! Incremental-trawl connector: byte-offset checkpoints with rotation
//! detection, backed by [`IncrementalFileTrawler`].

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::connector::{ConnectorSettings, SourceConnector, SourcePollResult};
use crate::trawl::{IncrementalFileTrawler, TrawlState};

pub struct TrawlConnector {
    settings: ConnectorSettings,
    trawler: IncrementalFileTrawler,
}

impl TrawlConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        let trawler = IncrementalFileTrawler::new(
            &settings.source_name,
            &settings.root_path,
            &settings.pattern,
            settings.options.max_line_bytes,
        );
        Self { settings, trawler }
    }
}

#[async_trait]
impl SourceConnector for TrawlConnector {
    fn source_name(&self) -> &str {
        &self.settings.source_name
    }

    async fn poll(&self, state: &Value) -> Result<SourcePollResult> {
        let before = TrawlState::from_value(state);
        let mut after = before.clone();

        let records = self
            .trawler
            .read_new_records(&mut after, self.settings.options.limit_records)?;

        let stats =
            IncrementalFileTrawler::collect_stats(&before, &after, records.len() as u64);

        let mut result = SourcePollResult::new(records, after.to_value()?);
        result.details.insert(
            "files_scanned".to_string(),
            json!(stats.files_scanned),
        );
        result.details.insert(
            "files_changed".to_string(),
            json!(stats.files_changed),
        );
        result
            .details
            .insert("bytes_read".to_string(), json!(stats.bytes_read));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceOptions;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn connector(root: &std::path::Path) -> TrawlConnector {
        TrawlConnector::new(ConnectorSettings {
            source_name: "codex".to_string(),
            root_path: root.to_path_buf(),
            pattern: "**/*.jsonl".to_string(),
            options: SourceOptions::default(),
        })
    }

    #[tokio::test]
    async fn idempotent_re_poll_and_resume() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.jsonl");
        fs::write(&path, "{\"content\":\"a\"}\n").unwrap();

        let c = connector(tmp.path());
        let first = c.poll(&Value::Null).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.details.get("bytes_read").unwrap().as_u64().unwrap(), 16);

        let second = c.poll(&first.state).await.unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.state, first.state);

        let mut fh = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(fh, "{{\"content\":\"b\"}}").unwrap();
        let third = c.poll(&second.state).await.unwrap();
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.records[0].content, "b");
    }

    #[tokio::test]
    async fn corrupt_state_blob_degrades_to_full_read() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("s.jsonl"), "{\"content\":\"a\"}\n").unwrap();

        let c = connector(tmp.path());
        let result = c.poll(&json!({"files": "garbage"})).await.unwrap();
        assert_eq!(result.records.len(), 1);
    }
}
