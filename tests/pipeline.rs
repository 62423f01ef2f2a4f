//! End-to-end pipeline tests driving the daemon through the library API.

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use activity_harness::config::{load_config, Config};
use activity_harness::daemon::Daemon;
use activity_harness::hooks::PluginSet;
use activity_harness::models::{STATUS_ERROR, STATUS_IDLE, STATUS_INGESTING};
use activity_harness::store::build_store;

fn write_config(root: &Path, body: &str) -> Config {
    let path = root.join("act.toml");
    fs::write(&path, body).unwrap();
    load_config(&path).unwrap()
}

fn drop_source_config(root: &Path) -> Config {
    write_config(
        root,
        &format!(
            r#"[daemon]
poll_interval_seconds = 1
state_path = "{root}/state.json"

[store]
backend = "sqlite"
path = "{root}/data/activity.sqlite"

[[sources]]
name = "terminal"
kind = "file-drop"
root = "{root}/drop"
pattern = "**/*.log"

[sources.filters]
exclude_contains = ["noise"]
"#,
            root = root.display()
        ),
    )
}

#[tokio::test]
async fn file_drop_cycle_persists_events_and_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let drop_dir = root.join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    fs::write(
        drop_dir.join("session.log"),
        "{\"content\":\"alpha\",\"actor\":\"assistant\"}\nnoise line\nbeta\n",
    )
    .unwrap();

    let cfg = drop_source_config(root);
    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg.clone(), store, &PluginSet::new(), false).unwrap();
    let summary = daemon.run(true).await.unwrap();

    assert_eq!(summary.source_summaries.len(), 1);
    let source = &summary.source_summaries[0];
    assert_eq!(source.source, "terminal");
    assert_eq!(source.status, STATUS_INGESTING);
    assert_eq!(source.records_seen, 3);
    assert_eq!(source.records_filtered, 1);
    assert_eq!(source.records_ingested, 2);
    assert_eq!(source.inserted_events, 2);
    assert_eq!(source.inserted_sessions, 1);

    // The checkpoint file survives the run and names the source.
    let state: Value =
        serde_json::from_str(&fs::read_to_string(root.join("state.json")).unwrap()).unwrap();
    assert!(state["per_source"]["terminal"].is_object());

    // Events landed in the durable store, ordered and session-keyed.
    let store = build_store(&cfg.store).await.unwrap();
    let events = store
        .list_events_for_source("terminal", None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].content, "alpha");
    assert_eq!(events[0].actor, "assistant");
    assert_eq!(events[1].content, "beta");
    assert_eq!(events[0].session_id, events[1].session_id);
    assert_eq!(events[0].turn_index, 0);
    assert_eq!(events[1].turn_index, 1);
    store.close().await;

    // A second cycle over unchanged files sees nothing new.
    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg, store, &PluginSet::new(), false).unwrap();
    let summary = daemon.run(true).await.unwrap();
    assert_eq!(summary.source_summaries[0].status, STATUS_IDLE);
    assert_eq!(summary.source_summaries[0].records_seen, 0);
}

#[tokio::test]
async fn source_failure_never_stops_other_sources() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let drop_dir = root.join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    fs::write(drop_dir.join("a.log"), "hello\n").unwrap();

    // The messages source is misconfigured: sqlite mode with no db_path.
    let cfg = write_config(
        root,
        &format!(
            r#"[daemon]
poll_interval_seconds = 1
state_path = "{root}/state.json"

[store]
backend = "memory"

[[sources]]
name = "terminal"
kind = "file-drop"
root = "{root}/drop"
pattern = "**/*.log"

[[sources]]
name = "imessage"
kind = "messages"
"#,
            root = root.display()
        ),
    );

    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg, store, &PluginSet::new(), false).unwrap();
    let summary = daemon.run(true).await.unwrap();

    assert_eq!(summary.error_count(), 1);
    let by_name = |name: &str| {
        summary
            .source_summaries
            .iter()
            .find(|s| s.source == name)
            .unwrap()
    };
    assert_eq!(by_name("terminal").status, STATUS_INGESTING);
    assert_eq!(by_name("terminal").inserted_events, 1);
    let failed = by_name("imessage");
    assert_eq!(failed.status, STATUS_ERROR);
    assert!(failed
        .error_message
        .as_deref()
        .unwrap()
        .contains("db_path"));

    // Only the healthy source advanced its checkpoint.
    let state: Value =
        serde_json::from_str(&fs::read_to_string(root.join("state.json")).unwrap()).unwrap();
    assert!(state["per_source"]["terminal"].is_object());
    assert!(state["per_source"].get("imessage").is_none());
}

#[tokio::test]
async fn reset_state_replays_without_duplicating_events() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let drop_dir = root.join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    fs::write(drop_dir.join("a.log"), "one\ntwo\n").unwrap();

    let cfg = drop_source_config(root);

    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg.clone(), store, &PluginSet::new(), false).unwrap();
    let first = daemon.run(true).await.unwrap();
    assert_eq!(first.total_events(), 2);

    // Re-reading from scratch re-polls everything, but the
    // content-addressed event ids absorb every duplicate.
    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg, store, &PluginSet::new(), true).unwrap();
    let replay = daemon.run(true).await.unwrap();
    assert_eq!(replay.total_records_seen(), 2);
    assert_eq!(replay.total_events(), 0);
    assert_eq!(replay.total_sessions(), 0);
}

#[tokio::test]
async fn configured_plugins_transform_the_batch() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let drop_dir = root.join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    fs::write(drop_dir.join("a.log"), "quiet words\n").unwrap();

    let cfg = write_config(
        root,
        &format!(
            r#"[daemon]
poll_interval_seconds = 1
state_path = "{root}/state.json"

[store]
backend = "sqlite"
path = "{root}/data/activity.sqlite"

[hooks]
plugins = ["demo:shout"]

[[sources]]
name = "terminal"
kind = "file-drop"
root = "{root}/drop"
pattern = "**/*.log"
"#,
            root = root.display()
        ),
    );

    let mut plugins = PluginSet::new();
    plugins.register(
        "demo:shout",
        Box::new(|registry| {
            registry.post_normalize.push(Box::new(|mut ctx| {
                for event in &mut ctx.events {
                    event.content = event.content.to_uppercase();
                }
                ctx
            }));
        }),
    );

    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg.clone(), store, &plugins, false).unwrap();
    daemon.run(true).await.unwrap();

    let store = build_store(&cfg.store).await.unwrap();
    let events = store
        .list_events_for_source("terminal", None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].content, "QUIET WORDS");
    store.close().await;
}

#[tokio::test]
async fn unresolved_plugin_reference_fails_at_startup() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let cfg = write_config(
        root,
        &format!(
            r#"[store]
backend = "memory"

[hooks]
plugins = ["ghost:install"]

[daemon]
state_path = "{root}/state.json"
"#,
            root = root.display()
        ),
    );

    let store = build_store(&cfg.store).await.unwrap();
    let err = Daemon::new(cfg, store, &PluginSet::new(), false)
        .err()
        .unwrap();
    assert!(err.to_string().contains("ghost:install"));
}

#[tokio::test]
async fn appended_lines_are_picked_up_on_the_next_cycle() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let drop_dir = root.join("drop");
    fs::create_dir_all(&drop_dir).unwrap();
    let log = drop_dir.join("a.log");
    fs::write(&log, "first\n").unwrap();

    let cfg = drop_source_config(root);

    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg.clone(), store, &PluginSet::new(), false).unwrap();
    assert_eq!(daemon.run(true).await.unwrap().total_events(), 1);

    let mut contents = fs::read_to_string(&log).unwrap();
    contents.push_str("second\n");
    fs::write(&log, contents).unwrap();

    let store = build_store(&cfg.store).await.unwrap();
    let mut daemon = Daemon::new(cfg.clone(), store, &PluginSet::new(), false).unwrap();
    let summary = daemon.run(true).await.unwrap();
    assert_eq!(summary.total_records_seen(), 1);
    assert_eq!(summary.total_events(), 1);

    let store = build_store(&cfg.store).await.unwrap();
    let events = store
        .list_events_for_source("terminal", None, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    store.close().await;

    // Sanity: the checkpoint blob tracks the consumed line count.
    let state: Value =
        serde_json::from_str(&fs::read_to_string(root.join("state.json")).unwrap()).unwrap();
    assert_eq!(
        state["per_source"]["terminal"][log.display().to_string()],
        json!(2)
    );
}
