//! Bounded JSONL spool decoupling file reads from processing.
//!
//! Records from a trawl pass can be staged to disk in fixed-size
//! segments before the rest of the pipeline runs. Segments are deleted
//! only after the consuming stage completes; a segment left behind
//! after a crash is evidence of incomplete processing and safe to
//! replay because downstream deduplication is idempotent.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::models::RawRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolSegment {
    pub path: PathBuf,
    pub record_count: u64,
}

pub struct JsonlSpool {
    root: PathBuf,
    max_records_per_segment: u64,
}

impl JsonlSpool {
    pub fn new(root: &Path, max_records_per_segment: u64) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("creating spool dir {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            max_records_per_segment: max_records_per_segment.max(1),
        })
    }

    /// Serialize records into one or more segment files.
    pub fn write_records(&self, records: &[RawRecord]) -> Result<Vec<SpoolSegment>> {
        let mut segments = Vec::new();

        for chunk in records.chunks(self.max_records_per_segment as usize) {
            let path = self
                .root
                .join(format!("segment_{}.jsonl", Uuid::new_v4().simple()));
            let file = File::create(&path)
                .with_context(|| format!("creating spool segment {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            for record in chunk {
                serde_json::to_writer(&mut writer, record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            segments.push(SpoolSegment {
                path,
                record_count: chunk.len() as u64,
            });
        }

        Ok(segments)
    }

    /// Replay segment files back into records, in segment order.
    pub fn read_segments(&self, segments: &[SpoolSegment]) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for segment in segments {
            let file = File::open(&segment.path)
                .with_context(|| format!("opening spool segment {}", segment.path.display()))?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                records.push(serde_json::from_str(&line)?);
            }
        }
        Ok(records)
    }

    /// Segments left behind by a previous run, oldest first.
    pub fn pending_segments(&self) -> Result<Vec<SpoolSegment>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                let record_count = BufReader::new(File::open(&path)?)
                    .lines()
                    .map_while(|l| l.ok())
                    .filter(|l| !l.trim().is_empty())
                    .count() as u64;
                segments.push(SpoolSegment { path, record_count });
            }
        }
        segments.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(segments)
    }

    /// Delete consumed segments. Missing files are ignored.
    pub fn cleanup(&self, segments: &[SpoolSegment]) {
        for segment in segments {
            let _ = fs::remove_file(&segment.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records(n: u64) -> Vec<RawRecord> {
        (0..n)
            .map(|i| RawRecord::new("s", "/f", i + 1, &format!("line {i}")))
            .collect()
    }

    #[test]
    fn round_trips_records_through_segments() {
        let tmp = TempDir::new().unwrap();
        let spool = JsonlSpool::new(tmp.path(), 10).unwrap();

        let original = records(3);
        let segments = spool.write_records(&original).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].record_count, 3);

        let replayed = spool.read_segments(&segments).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[2].content, "line 2");
        assert_eq!(replayed[2].line_number, 3);
    }

    #[test]
    fn splits_into_bounded_segments() {
        let tmp = TempDir::new().unwrap();
        let spool = JsonlSpool::new(tmp.path(), 2).unwrap();

        let segments = spool.write_records(&records(5)).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].record_count, 1);
    }

    #[test]
    fn leftover_segments_are_discoverable_after_crash() {
        let tmp = TempDir::new().unwrap();
        let spool = JsonlSpool::new(tmp.path(), 10).unwrap();
        spool.write_records(&records(2)).unwrap();

        // A fresh spool over the same root sees the unconsumed work.
        let recovered = JsonlSpool::new(tmp.path(), 10).unwrap();
        let pending = recovered.pending_segments().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_count, 2);

        let replayed = recovered.read_segments(&pending).unwrap();
        assert_eq!(replayed.len(), 2);

        recovered.cleanup(&pending);
        assert!(recovered.pending_segments().unwrap().is_empty());
    }
}
