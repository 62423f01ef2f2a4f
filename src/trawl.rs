//! Incremental file trawling for high-volume ingestion.
//!
//! Tracks a byte offset, inode, size, and mtime per file so that growth,
//! truncation (logrotate copy-truncate), and replacement (new inode,
//! same name) are all handled without filesystem change notifications.
//! A file whose inode changed, or whose size shrank below the recorded
//! offset, is treated as new and re-read from zero.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::RawRecord;
use crate::record_line;

/// Durable per-file progress record. Owned exclusively by the trawler
/// that reads the file; persisted inside the per-source state blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileCheckpoint {
    pub path: String,
    pub offset: u64,
    pub size: u64,
    pub mtime_ns: i64,
    pub inode: u64,
    /// Complete lines consumed up to `offset`; keeps line numbers (and
    /// therefore event identity) stable across resumed polls.
    #[serde(default)]
    pub lines: u64,
    pub digest: String,
}

impl FileCheckpoint {
    fn for_position(
        path: &Path,
        offset: u64,
        size: u64,
        mtime_ns: i64,
        inode: u64,
        lines: u64,
    ) -> Self {
        let seed = format!("{}:{}:{}:{}:{}", path.display(), inode, size, mtime_ns, offset);
        let digest = format!("{:x}", Sha256::digest(seed.as_bytes()));
        Self {
            path: path.display().to_string(),
            offset,
            size,
            mtime_ns,
            inode,
            lines,
            digest: digest[..16].to_string(),
        }
    }
}

/// The trawler's opaque state: one checkpoint per tracked file path.
/// Round-trips through the per-source JSON state blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrawlState {
    #[serde(default)]
    pub files: BTreeMap<String, FileCheckpoint>,
}

impl TrawlState {
    /// Decode from an opaque state blob. Unreadable blobs degrade to an
    /// empty state (full re-read) rather than failing the poll.
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("serializing trawl state")
    }
}

/// Per-poll read statistics, derived by diffing two states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrawlStats {
    pub files_scanned: u64,
    pub files_changed: u64,
    pub bytes_read: u64,
    pub records_emitted: u64,
}

/// Reads complete new lines from every file under `root` matching
/// `pattern`, resuming from per-file checkpoints.
pub struct IncrementalFileTrawler {
    source_name: String,
    root_path: PathBuf,
    pattern: String,
    max_line_bytes: usize,
}

impl IncrementalFileTrawler {
    pub fn new(source_name: &str, root_path: &Path, pattern: &str, max_line_bytes: usize) -> Self {
        Self {
            source_name: source_name.to_string(),
            root_path: root_path.to_path_buf(),
            pattern: pattern.to_string(),
            max_line_bytes,
        }
    }

    /// Read newly appended records, mutating `state` in place. When
    /// `limit_records` fires mid-file, the checkpoint is written at the
    /// exact stream position reached so the remainder is picked up on
    /// the next call.
    pub fn read_new_records(
        &self,
        state: &mut TrawlState,
        limit_records: Option<usize>,
    ) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();

        for file_path in self.candidate_files()? {
            let key = file_path.display().to_string();
            let meta = std::fs::metadata(&file_path)
                .with_context(|| format!("stat failed for {}", file_path.display()))?;
            let size = meta.len();
            let inode = file_identity(&meta);
            let mtime_ns = mtime_nanos(&meta);

            // Inode change or size shrink means rotation/truncation:
            // start over at zero.
            let (start_offset, start_lines) = match state.files.get(&key) {
                Some(cp) if cp.inode == inode && cp.size <= size => (cp.offset, cp.lines),
                _ => (0, 0),
            };

            if start_offset >= size {
                state.files.insert(
                    key,
                    FileCheckpoint::for_position(&file_path, size, size, mtime_ns, inode, start_lines),
                );
                continue;
            }

            let file = File::open(&file_path)
                .with_context(|| format!("open failed for {}", file_path.display()))?;
            let mut reader = BufReader::new(file);
            reader.seek(SeekFrom::Start(start_offset))?;

            let mut pos = start_offset;
            let mut line_count: u64 = 0;
            let mut buf: Vec<u8> = Vec::new();

            loop {
                buf.clear();
                let n = reader.read_until(b'\n', &mut buf)?;
                if n == 0 {
                    break;
                }
                if !buf.ends_with(b"\n") {
                    // Incomplete trailing line: leave it for the next poll.
                    break;
                }
                pos += n as u64;
                line_count += 1;
                if n > self.max_line_bytes {
                    // Oversized line: dropped whole, but the position
                    // still advances past it so it is never re-read.
                    continue;
                }

                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\r', '\n']);
                let Some(record) = record_line::parse_line(
                    &self.source_name,
                    &file_path,
                    start_lines + line_count,
                    line,
                ) else {
                    continue;
                };
                records.push(record);

                if let Some(limit) = limit_records {
                    if records.len() >= limit {
                        state.files.insert(
                            key,
                            FileCheckpoint::for_position(
                                &file_path,
                                pos,
                                size,
                                mtime_ns,
                                inode,
                                start_lines + line_count,
                            ),
                        );
                        return Ok(records);
                    }
                }
            }

            state.files.insert(
                key,
                FileCheckpoint::for_position(
                    &file_path,
                    pos,
                    size,
                    mtime_ns,
                    inode,
                    start_lines + line_count,
                ),
            );
        }

        Ok(records)
    }

    /// Diff a pre-poll and post-poll state into read statistics.
    pub fn collect_stats(before: &TrawlState, after: &TrawlState, records_emitted: u64) -> TrawlStats {
        let mut files_changed = 0;
        let mut bytes_read = 0;
        for (path, cp) in &after.files {
            let before_offset = before.files.get(path).map(|b| b.offset).unwrap_or(0);
            let delta = cp.offset.saturating_sub(before_offset);
            if delta > 0 {
                files_changed += 1;
                bytes_read += delta;
            }
        }
        TrawlStats {
            files_scanned: after.files.len() as u64,
            files_changed,
            bytes_read,
            records_emitted,
        }
    }

    fn candidate_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let include = build_globset(&self.pattern)?;
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root_path) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&self.root_path).unwrap_or(path);
            if include.is_match(relative.to_string_lossy().as_ref()) {
                files.push(path.to_path_buf());
            }
        }
        // Sorted for deterministic emission order across polls.
        files.sort();
        Ok(files)
    }
}

fn build_globset(pattern: &str) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(pattern)?);
    Ok(builder.build()?)
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> u64 {
    0
}

fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
