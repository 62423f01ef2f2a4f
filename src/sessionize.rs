//! Grouping of a batch of events into session summaries.
//!
//! A session is built from the current batch only. Continuity across
//! batches happens at the persistence layer, whose insert-or-ignore
//! keeps the first-seen row for a session key, so a session's end
//! timestamp can under-report when later batches add events to the
//! same key.

use std::collections::BTreeMap;

use crate::models::{Event, Session};

const SUMMARY_MAX_CHARS: usize = 160;

pub fn sessionize_events(events: &[Event]) -> Vec<Session> {
    let mut grouped: BTreeMap<(String, String), Vec<&Event>> = BTreeMap::new();
    for event in events {
        grouped
            .entry((event.source.clone(), event.session_id.clone()))
            .or_default()
            .push(event);
    }

    let mut sessions = Vec::with_capacity(grouped.len());
    for ((source, session_id), mut members) in grouped {
        members.sort_by(|a, b| (a.ts, a.turn_index).cmp(&(b.ts, b.turn_index)));

        let first = members[0];
        let last = members[members.len() - 1];
        let summary: String = first.content.chars().take(SUMMARY_MAX_CHARS).collect();

        sessions.push(Session {
            session_key: session_id,
            source,
            start_ts: first.ts,
            end_ts: last.ts,
            summary,
            event_count: members.len() as u64,
        });
    }

    sessions
}
