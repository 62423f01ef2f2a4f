//! # Activity Harness
//!
//! A local-first activity ingestion daemon for personal data streams.
//!
//! Activity Harness polls heterogeneous sources (dropped log files,
//! incrementally trawled directories, external message databases),
//! normalizes their records into content-addressed events, groups
//! events into sessions, and persists everything to SQLite. Checkpoint
//! state makes every poll incremental and every replay idempotent.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────┐   ┌──────────┐
//! │  Connectors  │──▶│     Pipeline       │──▶│  SQLite   │
//! │ drop/trawl/  │   │ filter+normalize+ │   │ events+   │
//! │ messages     │   │ sessionize+hooks  │   │ sessions  │
//! └──────────────┘   └───────────────────┘   └────┬─────┘
//!        ▲                                        │
//!        │            ┌──────────┐                ▼
//!   state blobs ◀─────│  Daemon  │──────▶ status + audit
//!   (JSON file)       │  (act)   │
//!                     └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! act init-config               # write a commented example config
//! act init                      # create the database
//! act run --once                # single ingestion cycle
//! act run                       # poll continuously
//! act sources                   # per-source health status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connector`] | Source connector contract and registry |
//! | [`connector_drop`] | Whole-file drop directory connector |
//! | [`connector_trawl`] | Incremental file trawl connector |
//! | [`connector_messages`] | External message database connector |
//! | [`trawl`] | Checkpointed incremental file reading |
//! | [`filters`] | Record filter pipeline |
//! | [`normalize`] | Raw records to canonical events |
//! | [`sessionize`] | Events to session aggregates |
//! | [`hooks`] | Pipeline extension points |
//! | [`spool`] | JSONL staging segments |
//! | [`daemon`] | Polling loop and fault isolation |
//! | [`store`] | Persistence port |

pub mod config;
pub mod connector;
pub mod connector_drop;
pub mod connector_messages;
pub mod connector_trawl;
pub mod daemon;
pub mod error;
pub mod filters;
pub mod hooks;
pub mod models;
pub mod normalize;
pub mod record_line;
pub mod sessionize;
pub mod spool;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod trawl;
