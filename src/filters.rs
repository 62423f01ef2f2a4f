//! Record filter pipeline.
//!
//! An ordered list of predicates applied after polling and before
//! normalization. A record is kept only if every predicate accepts it;
//! the pipeline reports the kept records and a dropped count. Predicates
//! over optional fields treat a missing required field as a drop.

use chrono::{DateTime, Utc};

use crate::config::FilterConfig;
use crate::models::RawRecord;

pub type RecordFilter = Box<dyn Fn(&RawRecord) -> bool + Send + Sync>;

#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<RecordFilter>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, filter: RecordFilter) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all predicates (logical AND) and return the kept records
    /// plus the count of dropped ones.
    pub fn apply(&self, records: Vec<RawRecord>) -> (Vec<RawRecord>, u64) {
        if self.filters.is_empty() {
            return (records, 0);
        }

        let mut kept = Vec::with_capacity(records.len());
        let mut dropped = 0;
        for record in records {
            if self.filters.iter().all(|predicate| predicate(&record)) {
                kept.push(record);
            } else {
                dropped += 1;
            }
        }
        (kept, dropped)
    }

    /// Assemble a pipeline from per-source filter terms. Empty term
    /// lists contribute no predicate.
    pub fn from_config(config: &FilterConfig) -> Self {
        let mut pipeline = Self::new();

        if !config.include_contains.is_empty() {
            pipeline.add(include_contains(config.include_contains.clone()));
        }
        if !config.exclude_contains.is_empty() {
            pipeline.add(exclude_contains(config.exclude_contains.clone()));
        }
        if !config.include_actors.is_empty() {
            pipeline.add(include_actors(config.include_actors.clone()));
        }
        if !config.exclude_actors.is_empty() {
            pipeline.add(exclude_actors(config.exclude_actors.clone()));
        }
        if !config.include_groups.is_empty() {
            pipeline.add(include_groups(config.include_groups.clone()));
        }
        if !config.exclude_groups.is_empty() {
            pipeline.add(exclude_groups(config.exclude_groups.clone()));
        }
        if let Some(since) = config.since {
            pipeline.add(since_filter(since));
        }
        if let Some(until) = config.until {
            pipeline.add(until_filter(until));
        }

        pipeline
    }
}

fn lowered(terms: Vec<String>) -> Vec<String> {
    terms
        .into_iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Keep records whose content contains any of the needles.
pub fn include_contains(needles: Vec<String>) -> RecordFilter {
    let needles = lowered(needles);
    Box::new(move |record| {
        if needles.is_empty() {
            return true;
        }
        let content = record.content.to_lowercase();
        needles.iter().any(|needle| content.contains(needle))
    })
}

/// Drop records whose content contains any of the needles.
pub fn exclude_contains(needles: Vec<String>) -> RecordFilter {
    let needles = lowered(needles);
    Box::new(move |record| {
        if needles.is_empty() {
            return true;
        }
        let content = record.content.to_lowercase();
        !needles.iter().any(|needle| content.contains(needle))
    })
}

/// Keep records whose actor is in the list.
pub fn include_actors(actors: Vec<String>) -> RecordFilter {
    let actors = lowered(actors);
    Box::new(move |record| actors.is_empty() || actors.contains(&record.actor.to_lowercase()))
}

/// Drop records whose actor is in the list.
pub fn exclude_actors(actors: Vec<String>) -> RecordFilter {
    let actors = lowered(actors);
    Box::new(move |record| actors.is_empty() || !actors.contains(&record.actor.to_lowercase()))
}

fn record_group(record: &RawRecord) -> Option<String> {
    record
        .group_hint
        .clone()
        .or_else(|| record.session_hint.clone())
        .map(|g| g.to_lowercase())
}

/// Keep records whose group (or session hint) is in the list. A record
/// with no group at all is dropped.
pub fn include_groups(groups: Vec<String>) -> RecordFilter {
    let groups = lowered(groups);
    Box::new(move |record| {
        if groups.is_empty() {
            return true;
        }
        match record_group(record) {
            Some(group) => groups.contains(&group),
            None => false,
        }
    })
}

/// Drop records whose group (or session hint) is in the list.
pub fn exclude_groups(groups: Vec<String>) -> RecordFilter {
    let groups = lowered(groups);
    Box::new(move |record| {
        if groups.is_empty() {
            return true;
        }
        match record_group(record) {
            Some(group) => !groups.contains(&group),
            None => true,
        }
    })
}

/// Keep records at or after `since`. Records with no timestamp fail.
pub fn since_filter(since: DateTime<Utc>) -> RecordFilter {
    Box::new(move |record| match record.ts {
        Some(ts) => ts >= since,
        None => false,
    })
}

/// Keep records at or before `until`. Records with no timestamp fail.
pub fn until_filter(until: DateTime<Utc>) -> RecordFilter {
    Box::new(move |record| match record.ts {
        Some(ts) => ts <= until,
        None => false,
    })
}
