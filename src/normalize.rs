//! Canonicalization of raw records into deduplicated events.
//!
//! Event identity is content-addressed: re-reading identical bytes from
//! the same place yields the same identifier, making replays a no-op at
//! the persistence layer. Turn indices are assigned in emission order
//! within the in-flight batch only; callers must not interleave
//! concurrent batches for the same session.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::models::{Event, RawRecord};

pub fn normalize_records(records: &[RawRecord]) -> Vec<Event> {
    let mut events = Vec::with_capacity(records.len());
    let mut turn_counters: HashMap<String, u64> = HashMap::new();

    for record in records {
        let ts = record.ts.unwrap_or_else(Utc::now);

        let raw_session = record.session_hint.clone().unwrap_or_else(|| {
            stable_session_id(&format!("{}:{}", record.source, record.file_path))
        });
        let session_id = format!("{}:{}", record.source, raw_session);

        let counter = turn_counters.entry(session_id.clone()).or_insert(0);
        let turn_index = *counter;
        *counter += 1;

        let event_id = stable_event_id(
            &record.source,
            &record.file_path,
            record.line_number,
            &record.content,
        );

        events.push(Event {
            event_id,
            ts,
            source: record.source.clone(),
            session_id,
            turn_index,
            actor: record.actor.clone(),
            content: record.content.clone(),
            tool_name: record.tool_name.clone(),
            tool_status: record.tool_status.clone(),
            tool_args: record.tool_args.clone(),
            tool_result: record.tool_result.clone(),
            meta: record.metadata.clone(),
        });
    }

    events
}

/// Deterministic event identifier over `source|file_path|line_number|content`.
pub fn stable_event_id(source: &str, file_path: &str, line_number: u64, content: &str) -> String {
    let seed = format!("{source}|{file_path}|{line_number}|{content}");
    format!("{:x}", Sha256::digest(seed.as_bytes()))
}

/// Short stable hash used when a record carries no session hint.
pub fn stable_session_id(seed: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(seed.as_bytes()));
    digest[..16].to_string()
}
