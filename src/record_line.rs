//! Per-line parsing shared by the file-based connectors.
//!
//! A line that looks like a JSON object is decoded into structured
//! record fields; anything else becomes a plain-text record with
//! inferred defaults.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::Path;

use crate::models::RawRecord;

/// Parse one line into a [`RawRecord`]. Blank lines yield `None`.
pub fn parse_line(
    source: &str,
    file_path: &Path,
    line_number: u64,
    line: &str,
) -> Option<RawRecord> {
    if line.trim().is_empty() {
        return None;
    }

    let parsed: Option<Map<String, Value>> = if line.starts_with('{') {
        serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
    } else {
        None
    };

    let mut record = RawRecord::new(source, &file_path.display().to_string(), line_number, line);
    record
        .metadata
        .insert("path".to_string(), Value::String(file_path.display().to_string()));

    let Some(obj) = parsed else {
        return Some(record);
    };

    if let Some(content) = obj.get("content").and_then(Value::as_str) {
        record.content = content.to_string();
    }
    if let Some(actor) = obj.get("actor").and_then(Value::as_str) {
        record.actor = actor.to_string();
    }
    record.session_hint = obj
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    record.group_hint = obj
        .get("group_id")
        .or_else(|| obj.get("chat_id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    record.tool_name = obj
        .get("tool_name")
        .and_then(Value::as_str)
        .map(str::to_string);
    record.tool_status = obj
        .get("tool_status")
        .and_then(Value::as_str)
        .map(str::to_string);
    record.tool_args = obj.get("tool_args").cloned();
    record.tool_result = obj.get("tool_result").cloned();

    if let Some(Value::Object(meta)) = obj.get("meta") {
        for (key, value) in meta {
            record.metadata.insert(key.clone(), value.clone());
        }
    }

    if let Some(ts_raw) = obj.get("ts").and_then(Value::as_str) {
        record.ts = parse_ts(ts_raw);
    }

    Some(record)
}

/// Parse an ISO-8601 / RFC 3339 timestamp; naive values are assumed UTC.
pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn plain_text_line_gets_defaults() {
        let path = PathBuf::from("/tmp/a.log");
        let record = parse_line("term", &path, 3, "ls -la").unwrap();
        assert_eq!(record.content, "ls -la");
        assert_eq!(record.actor, "user");
        assert_eq!(record.line_number, 3);
        assert!(record.ts.is_none());
        assert_eq!(
            record.metadata.get("path").unwrap().as_str().unwrap(),
            "/tmp/a.log"
        );
    }

    #[test]
    fn json_line_maps_structured_fields() {
        let path = PathBuf::from("/tmp/a.jsonl");
        let line = r#"{"content":"hi","actor":"assistant","session_id":"s1","chat_id":"c9","ts":"2026-02-01T10:00:00Z","meta":{"k":"v"}}"#;
        let record = parse_line("chat", &path, 1, line).unwrap();
        assert_eq!(record.content, "hi");
        assert_eq!(record.actor, "assistant");
        assert_eq!(record.session_hint.as_deref(), Some("s1"));
        assert_eq!(record.group_hint.as_deref(), Some("c9"));
        assert!(record.ts.is_some());
        assert_eq!(record.metadata.get("k").unwrap().as_str().unwrap(), "v");
    }

    #[test]
    fn malformed_json_falls_back_to_raw_content() {
        let path = PathBuf::from("/tmp/a.jsonl");
        let record = parse_line("chat", &path, 1, "{not json").unwrap();
        assert_eq!(record.content, "{not json");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let path = PathBuf::from("/tmp/a.log");
        assert!(parse_line("term", &path, 1, "   ").is_none());
    }

    #[test]
    fn naive_timestamps_are_assumed_utc() {
        let ts = parse_ts("2026-02-01T10:00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-02-01T10:00:00+00:00");
    }
}
