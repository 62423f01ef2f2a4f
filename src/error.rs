//! Error taxonomy for the ingestion core.
//!
//! Failures local to one source ([`IngestError::ConnectorPoll`]) never
//! cross into other sources' processing; only persistence or startup
//! failures are allowed to halt the daemon.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// I/O or parse failure inside one source's poll. Isolated: logged,
    /// reflected in that source's status, the cycle continues.
    #[error("connector poll failed for source '{source_name}': {message}")]
    ConnectorPoll { source_name: String, message: String },

    /// Persisted daemon state was unreadable. Never fatal — the caller
    /// falls back to empty state, which means a full re-read.
    #[error("checkpoint state unreadable at {path}: {message}")]
    CheckpointCorruption { path: String, message: String },

    /// Write failure against the durable store. Aborts the current
    /// source's remaining persistence; replay on the next cycle is safe
    /// because event identifiers are content-addressed.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A hook plugin reference could not be resolved. Fatal at startup.
    #[error("plugin resolution failed: {0}")]
    PluginResolution(String),
}

impl IngestError {
    pub fn poll(source: &str, err: impl std::fmt::Display) -> Self {
        Self::ConnectorPoll {
            source_name: source.to_string(),
            message: err.to_string(),
        }
    }
}
