use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub hooks: HooksConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub root: PathBuf,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub options: SourceOptions,
    #[serde(default)]
    pub filters: FilterConfig,
}

fn default_enabled() -> bool {
    true
}
fn default_kind() -> String {
    "file-drop".to_string()
}
fn default_pattern() -> String {
    "**/*.log".to_string()
}

/// Free-form knobs a connector may consume; the daemon never reads these.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceOptions {
    /// Message-db connector only: `sqlite` (default) or `jsonl` export mode.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Message-db connector only: path to the foreign SQLite database.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Message-db connector only: max rows fetched per poll.
    #[serde(default = "default_db_limit")]
    pub limit: i64,
    /// Trawl connector only: lines longer than this are dropped whole.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Trawl connector only: stop a poll after this many emitted records.
    #[serde(default)]
    pub limit_records: Option<usize>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            db_path: None,
            limit: default_db_limit(),
            max_line_bytes: default_max_line_bytes(),
            limit_records: None,
        }
    }
}

fn default_mode() -> String {
    "sqlite".to_string()
}
fn default_db_limit() -> i64 {
    500
}
fn default_max_line_bytes() -> usize {
    1024 * 1024
}

/// Per-source record filter terms. Empty lists accept everything.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub include_contains: Vec<String>,
    #[serde(default)]
    pub exclude_contains: Vec<String>,
    #[serde(default)]
    pub include_actors: Vec<String>,
    #[serde(default)]
    pub exclude_actors: Vec<String>,
    #[serde(default)]
    pub include_groups: Vec<String>,
    #[serde(default)]
    pub exclude_groups: Vec<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include_contains.is_empty()
            && self.exclude_contains.is_empty()
            && self.include_actors.is_empty()
            && self.exclude_actors.is_empty()
            && self.include_groups.is_empty()
            && self.exclude_groups.is_empty()
            && self.since.is_none()
            && self.until.is_none()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/activity.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
            state_path: default_state_path(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_state_path() -> PathBuf {
    PathBuf::from(".activity_state.json")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct HooksConfig {
    /// Plugin references of the form `registry_key:entry`, resolved at
    /// startup against the plugin set handed to the daemon builder.
    #[serde(default)]
    pub plugins: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.daemon.poll_interval_seconds == 0 {
        anyhow::bail!("daemon.poll_interval_seconds must be > 0");
    }

    match config.store.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!("Unknown store backend: '{}'. Must be sqlite or memory.", other),
    }

    let mut seen = std::collections::HashSet::new();
    for source in &config.sources {
        if source.name.trim().is_empty() {
            anyhow::bail!("source name must not be empty");
        }
        if !seen.insert(source.name.clone()) {
            anyhow::bail!("duplicate source name: '{}'", source.name);
        }
        match source.kind.as_str() {
            "file-drop" | "trawl" | "messages" => {}
            other => anyhow::bail!(
                "Unknown source kind '{}' for source '{}'. Must be file-drop, trawl, or messages.",
                other,
                source.name
            ),
        }
    }

    Ok(config)
}

/// Commented example config written by `act init-config`.
pub fn example_toml() -> &'static str {
    r#"[daemon]
poll_interval_seconds = 5
state_path = ".activity_state.json"

[store]
backend = "sqlite"
path = "./data/activity.sqlite"

[logging]
level = "info"

[hooks]
# Plugin references of the form "registry_key:entry".
plugins = []

[[sources]]
name = "codex"
kind = "trawl"
root = "./ingest/codex"
pattern = "**/*.jsonl"

[[sources]]
name = "terminal"
kind = "file-drop"
root = "./ingest/terminal"
pattern = "**/*.log"

[[sources]]
name = "imessage"
kind = "messages"
enabled = false

[sources.options]
db_path = "~/Library/Messages/chat.db"
limit = 500
"#
}
