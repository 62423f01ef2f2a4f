//! File-drop connector: whole-line ingestion with line-count state.
//!
//! The simplest file-based variant. Progress is tracked as the count of
//! lines already consumed per file, which is enough for drop directories
//! where files are only ever appended or replaced wholesale.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSetBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use walkdir::WalkDir;

use crate::connector::{ConnectorSettings, SourceConnector, SourcePollResult};
use crate::models::RawRecord;
use crate::record_line;

pub struct FileDropConnector {
    settings: ConnectorSettings,
}

impl FileDropConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self { settings }
    }

    fn candidate_files(&self) -> Result<Vec<PathBuf>> {
        let root = &self.settings.root_path;
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut builder = GlobSetBuilder::new();
        builder.add(Glob::new(&self.settings.pattern)?);
        let include = builder.build()?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if include.is_match(relative.to_string_lossy().as_ref()) {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl SourceConnector for FileDropConnector {
    fn source_name(&self) -> &str {
        &self.settings.source_name
    }

    async fn poll(&self, state: &Value) -> Result<SourcePollResult> {
        // State: map of file path -> count of lines already consumed.
        let mut consumed: BTreeMap<String, u64> = state
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_u64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .unwrap_or_default();

        let mut records: Vec<RawRecord> = Vec::new();

        for file_path in self.candidate_files()? {
            let key = file_path.display().to_string();
            let last_line = consumed.get(&key).copied().unwrap_or(0);

            let file = File::open(&file_path)
                .with_context(|| format!("open failed for {}", file_path.display()))?;
            let reader = BufReader::new(file);

            let mut processed = last_line;
            for (idx, line) in reader.lines().enumerate() {
                let line_number = idx as u64 + 1;
                if line_number <= last_line {
                    continue;
                }
                let line = line?;
                if let Some(record) = record_line::parse_line(
                    self.source_name(),
                    &file_path,
                    line_number,
                    &line,
                ) {
                    records.push(record);
                }
                processed = line_number;
            }

            if processed > last_line {
                consumed.insert(key, processed);
            }
        }

        let new_state = serde_json::to_value(&consumed)?;
        Ok(SourcePollResult::new(records, new_state))
    }
}
