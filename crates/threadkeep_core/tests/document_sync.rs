use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use threadkeep_core::document::{fragment, lock_state_of};
use threadkeep_core::prelude::*;
use threadkeep_core::{DocumentSettings, DocumentSyncFeature, MemoryRecordStore};

const CONTROL: StreamId = StreamId(9000);

struct Harness {
    dir: TempDir,
    store: Arc<MemoryRecordStore>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(MemoryRecordStore::default())
    }

    fn with_store(store: MemoryRecordStore) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: Arc::new(store),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.json"))
    }

    async fn write(&self, name: &str, value: Value) {
        tokio::fs::write(self.path(name), serde_json::to_string(&value).unwrap())
            .await
            .unwrap();
    }

    async fn read(&self, name: &str) -> String {
        tokio::fs::read_to_string(self.path(name)).await.unwrap()
    }

    fn settings(&self) -> DocumentSettings {
        DocumentSettings::new(self.dir.path(), CONTROL).with_names(["settings"])
    }

    /// A fresh engine over the shared store, as after a restart
    fn engine(&self) -> Arc<DocumentEngine> {
        self.engine_with(self.settings())
    }

    fn engine_with(&self, settings: DocumentSettings) -> Arc<DocumentEngine> {
        let cache = Arc::new(StreamCache::new(self.store.clone()));
        Arc::new(DocumentEngine::new(cache, settings))
    }

    /// Unwrapped fragment texts in the sub-stream, oldest first
    fn remote_fragments(&self, substream: StreamId) -> Vec<String> {
        self.store
            .records(substream)
            .iter()
            .filter_map(|r| r.text())
            .filter_map(fragment::unwrap_fragment)
            .map(str::to_string)
            .collect()
    }

    fn cards(&self, substream: StreamId) -> Vec<LockState> {
        self.store
            .records(substream)
            .iter()
            .filter_map(lock_state_of)
            .collect()
    }

    fn backups(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(" ("))
            .collect();
        names.sort();
        names
    }
}

fn canonical(value: &Value) -> String {
    fragment::to_canonical(value).unwrap()
}

#[tokio::test]
async fn test_new_document_is_published() {
    let h = Harness::new();
    let value = json!({
        "channels": {"general": 1, "welcome": 2},
        "facts": ["one", "two", "three"],
    });
    h.write("settings", value.clone()).await;
    let settings = h.settings().with_max_fragment_len(24);
    let engine = h.engine_with(settings);

    let doc = engine.initialize("settings").await.unwrap();

    // one locator in the control stream, carrying the sub-stream
    let control = h.store.records(CONTROL);
    assert_eq!(control.len(), 1);
    assert_eq!(control[0].text(), Some("📄 settings"));
    assert!(control[0].has_substream);
    assert_eq!(doc.locator_id, control[0].id);

    // fragments in order, then the control card
    let records = h.store.records(doc.substream_id);
    assert!(doc.fragments.len() > 1);
    assert_eq!(records.len(), doc.fragments.len() + 1);
    assert_eq!(h.remote_fragments(doc.substream_id), doc.fragments);
    assert_eq!(doc.fragments.concat(), canonical(&value));
    let card = records.last().unwrap();
    assert_eq!(lock_state_of(card), Some(LockState::Unlocked));
    assert_eq!(doc.control_record_id, Some(card.id));
    assert_eq!(doc.lock_state, LockState::Unlocked);
    assert_eq!(doc.values, value);

    // the local file is left alone
    assert!(h.backups().is_empty());
}

#[tokio::test]
async fn test_restart_finds_existing_document() {
    let h = Harness::new();
    h.write("settings", json!({"a": 1})).await;
    let first = h.engine().initialize("settings").await.unwrap();
    let creates = h.store.create_count();

    let second = h.engine().initialize("settings").await.unwrap();
    assert_eq!(second, first);
    assert_eq!(h.store.create_count(), creates);
    assert_eq!(h.store.delete_count(), 0);
}

#[tokio::test]
async fn test_unlocked_local_change_is_pushed() {
    let h = Harness::new();
    h.write("settings", json!({"greeting": "hello"})).await;
    let engine = h.engine();
    let before = engine.initialize("settings").await.unwrap();

    let changed = json!({"greeting": "hi there", "extra": [1, 2]});
    h.write("settings", changed.clone()).await;
    let doc = engine.initialize("settings").await.unwrap();

    assert_eq!(doc.substream_id, before.substream_id);
    assert_eq!(h.remote_fragments(doc.substream_id), doc.fragments);
    assert_eq!(doc.fragments.concat(), canonical(&changed));
    assert_eq!(doc.values, changed);
    // old fragment and old control card
    assert_eq!(h.store.delete_count(), 2);
    assert!(h.backups().is_empty());

    // a restarted engine agrees without touching anything
    let deletes = h.store.delete_count();
    h.engine().initialize("settings").await.unwrap();
    assert_eq!(h.store.delete_count(), deletes);
}

#[tokio::test]
async fn test_locked_remote_change_is_pulled() {
    let h = Harness::new();
    h.write("settings", json!({"limit": 1, "name": "bot"})).await;
    let engine = h.engine();
    engine.initialize("settings").await.unwrap();
    let doc = engine.lock("settings").await.unwrap();
    assert_eq!(doc.lock_state, LockState::Locked);

    // someone edits the remote fragment
    let remote = json!({"limit": 5, "name": "bot"});
    let fragment_record = h.store.records(doc.substream_id)[0].clone();
    let edited = h
        .store
        .edit_record(
            doc.substream_id,
            fragment_record.id,
            RecordContent::text(fragment::wrap(&canonical(&remote))),
        )
        .await
        .unwrap();
    let dispatcher = EventDispatcher::new(engine.cache().clone());
    dispatcher.record_updated(&edited).await;

    let pulled = engine.initialize("settings").await.unwrap();

    assert_eq!(pulled.lock_state, LockState::Locked);
    assert_eq!(pulled.values, remote);
    assert_eq!(h.read("settings").await, canonical(&remote));
    assert_eq!(h.backups(), vec!["settings (1).json".to_string()]);
    let backup = tokio::fs::read_to_string(h.dir.path().join("settings (1).json"))
        .await
        .unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&backup).unwrap(),
        json!({"limit": 1, "name": "bot"})
    );
    // nothing was republished
    assert_eq!(h.store.delete_count(), 0);
}

#[tokio::test]
async fn test_locked_pull_uses_next_backup_suffix() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    std::fs::write(h.dir.path().join("settings (3).json"), "{}").unwrap();
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();
    engine.lock("settings").await.unwrap();

    h.write("settings", json!({"v": 2})).await;
    engine.initialize("settings").await.unwrap();

    assert_eq!(
        h.backups(),
        vec!["settings (3).json".to_string(), "settings (4).json".to_string()]
    );
    assert_eq!(h.read("settings").await, doc.canonical_form);
}

#[tokio::test]
async fn test_lock_state_survives_restart() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();

    engine.lock("settings").await.unwrap();
    let again = engine.lock("settings").await.unwrap();
    assert_eq!(again.control_record_id, doc.control_record_id);

    let cards: Vec<_> = h
        .store
        .records(doc.substream_id)
        .into_iter()
        .filter_map(|r| lock_state_of(&r))
        .collect();
    assert_eq!(cards, vec![LockState::Locked]);

    let restarted = h.engine().initialize("settings").await.unwrap();
    assert_eq!(restarted.lock_state, LockState::Locked);

    let unlocked = engine.unlock("settings").await.unwrap();
    assert_eq!(unlocked.lock_state, LockState::Unlocked);
    assert_eq!(
        h.engine().initialize("settings").await.unwrap().lock_state,
        LockState::Unlocked
    );
}

#[tokio::test]
async fn test_lock_during_initialize_is_not_lost() {
    let h = Harness::with_store(
        MemoryRecordStore::default().with_latency(Duration::from_millis(5)),
    );
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();
    h.write("settings", json!({"v": 2})).await;

    let (locked, synced) = tokio::join!(engine.lock("settings"), engine.initialize("settings"));
    assert_eq!(locked.unwrap().lock_state, LockState::Locked);
    synced.unwrap();

    assert_eq!(h.cards(doc.substream_id), vec![LockState::Locked]);
    assert_eq!(
        engine.document("settings").unwrap().lock_state,
        LockState::Locked
    );
    let restarted = h.engine().initialize("settings").await.unwrap();
    assert_eq!(restarted.lock_state, LockState::Locked);
}

#[tokio::test]
async fn test_missing_control_card_means_unlocked() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let doc = h.engine().initialize("settings").await.unwrap();
    let control_id = doc.control_record_id.unwrap();
    h.store
        .delete_record(doc.substream_id, control_id)
        .await
        .unwrap();

    h.write("settings", json!({"v": 2})).await;
    let pushed = h.engine().initialize("settings").await.unwrap();

    assert_eq!(pushed.lock_state, LockState::Unlocked);
    assert_eq!(pushed.values, json!({"v": 2}));
    assert_ne!(pushed.control_record_id, Some(control_id));
    assert_eq!(h.remote_fragments(pushed.substream_id), pushed.fragments);
}

#[tokio::test]
async fn test_foreign_records_are_ignored() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let doc = h.engine().initialize("settings").await.unwrap();
    h.store.insert_as(
        doc.substream_id,
        UserId(4242),
        RecordContent::text("nice settings"),
    );

    let again = h.engine().initialize("settings").await.unwrap();
    assert_eq!(again, doc);
    assert_eq!(h.store.delete_count(), 0);
}

#[tokio::test]
async fn test_own_system_notices_are_not_fragments() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();
    // an empty notice posted in the thread under the client's own id
    h.store
        .insert_as(doc.substream_id, UserId(1), RecordContent::text(""));

    let again = h.engine().initialize("settings").await.unwrap();
    assert_eq!(again, doc);
    assert_eq!(h.store.delete_count(), 0);

    engine.lock("settings").await.unwrap();
    let locked = h.engine().initialize("settings").await.unwrap();
    assert_eq!(locked.lock_state, LockState::Locked);
    assert!(h.backups().is_empty());
}

#[tokio::test]
async fn test_malformed_edit_changes_nothing() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();
    let before = h.read("settings").await;
    let creates = h.store.create_count();

    let err = engine.submit_edit("settings", "not json").await.unwrap_err();

    assert!(matches!(err, CoreError::ValidationFailure { .. }));
    assert_eq!(h.read("settings").await, before);
    assert!(h.backups().is_empty());
    assert_eq!(h.store.create_count(), creates);
    assert_eq!(engine.document("settings").unwrap(), doc);
}

#[tokio::test]
async fn test_edit_replaces_local_and_remote() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    engine.initialize("settings").await.unwrap();

    let seed = engine.begin_edit("settings").unwrap();
    assert_eq!(seed, canonical(&json!({"v": 1})));

    let doc = engine
        .submit_edit("settings", r#"{"v": 2, "added": true}"#)
        .await
        .unwrap();

    let expected = json!({"added": true, "v": 2});
    assert_eq!(doc.values, expected);
    assert_eq!(h.read("settings").await, canonical(&expected));
    assert_eq!(h.backups(), vec!["settings (1).json".to_string()]);
    assert_eq!(h.remote_fragments(doc.substream_id), doc.fragments);
}

#[tokio::test]
async fn test_edit_while_locked_is_replaced_by_remote() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let doc = engine.initialize("settings").await.unwrap();
    engine.lock("settings").await.unwrap();

    let result = engine.submit_edit("settings", r#"{"v": 2}"#).await.unwrap();

    assert_eq!(result.lock_state, LockState::Locked);
    assert_eq!(result.values, json!({"v": 1}));
    assert_eq!(h.read("settings").await, doc.canonical_form);
    assert_eq!(h.remote_fragments(doc.substream_id), doc.fragments);
    // the file before the edit, then the edit itself
    assert_eq!(
        h.backups(),
        vec!["settings (1).json".to_string(), "settings (2).json".to_string()]
    );
    let edited = tokio::fs::read_to_string(h.dir.path().join("settings (2).json"))
        .await
        .unwrap();
    assert_eq!(edited, canonical(&json!({"v": 2})));
}

#[tokio::test]
async fn test_begin_edit_size_limit() {
    let h = Harness::new();
    h.write("settings", json!({"a long key": "and a long value"}))
        .await;
    let engine = h.engine_with(h.settings().with_max_edit_len(10));
    engine.initialize("settings").await.unwrap();

    let err = engine.begin_edit("settings").unwrap_err();
    assert!(matches!(
        err,
        CoreError::SizeLimitExceeded { limit: 10, .. }
    ));
}

#[tokio::test]
async fn test_oversized_line_fails_initialize() {
    let h = Harness::new();
    h.write("settings", json!({"key": "x".repeat(64)})).await;
    let engine = h.engine_with(h.settings().with_max_fragment_len(32));

    let err = engine.initialize("settings").await.unwrap_err();
    assert!(matches!(err, CoreError::SizeLimitExceeded { .. }));
    assert!(h.store.records(CONTROL).is_empty());
}

#[tokio::test]
async fn test_concurrent_initialize_runs_once() {
    let h = Harness::with_store(
        MemoryRecordStore::default().with_latency(Duration::from_millis(5)),
    );
    h.write("settings", json!({"a": 1, "b": [1, 2, 3]})).await;
    let engine = h.engine_with(h.settings().with_max_fragment_len(12));

    let (first, second) = tokio::join!(
        engine.initialize("settings"),
        engine.initialize("settings")
    );
    let first = first.unwrap();
    assert_eq!(second.unwrap(), first);

    // one locator, the fragments and one control card
    assert_eq!(h.store.records(CONTROL).len(), 1);
    assert_eq!(h.store.create_count(), first.fragments.len() + 2);
    assert_eq!(h.remote_fragments(first.substream_id), first.fragments);
}

#[tokio::test]
async fn test_store_failure_mid_publish_is_reported() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    h.store.fail_next("attach_substream", 1);
    let engine = h.engine();

    let err = engine.initialize("settings").await.unwrap_err();
    assert!(err.is_store_error());
    assert!(!engine.is_initialized("settings"));
}

#[tokio::test]
async fn test_partial_push_heals_on_next_initialize() {
    let h = Harness::new();
    h.write("settings", json!({"a": 1})).await;
    let engine = h.engine_with(h.settings().with_max_fragment_len(12));
    let before = engine.initialize("settings").await.unwrap();

    let changed = json!({"a": 2, "b": [1, 2, 3]});
    h.write("settings", changed.clone()).await;
    // the first new fragment lands, the second does not
    h.store.fail_after("create_record", 1, 1);
    let err = engine.initialize("settings").await.unwrap_err();
    assert!(err.is_store_error());
    assert_eq!(engine.document("settings").unwrap(), before);
    assert_eq!(h.remote_fragments(before.substream_id).len(), 1);
    assert!(h.cards(before.substream_id).is_empty());

    let healed = engine.initialize("settings").await.unwrap();
    assert_eq!(healed.values, changed);
    assert!(healed.fragments.len() > 1);
    assert_eq!(h.remote_fragments(healed.substream_id), healed.fragments);
    assert_eq!(h.cards(healed.substream_id), vec![LockState::Unlocked]);
}

#[tokio::test]
async fn test_deleted_substream_is_republished() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    let engine = h.engine();
    let dispatcher = EventDispatcher::new(engine.cache().clone())
        .with_feature(Arc::new(DocumentSyncFeature::new(engine.clone())));
    let doc = engine.initialize("settings").await.unwrap();

    h.store.remove_substream(CONTROL, doc.locator_id);
    // until the deletion is dispatched the engine still targets the old thread
    let err = engine.initialize("settings").await.unwrap_err();
    assert!(err.is_store_error());

    dispatcher.substream_deleted(CONTROL, doc.locator_id).await;
    let republished = engine.initialize("settings").await.unwrap();

    assert_ne!(republished.locator_id, doc.locator_id);
    assert_ne!(republished.substream_id, doc.substream_id);
    assert_eq!(
        h.remote_fragments(republished.substream_id),
        republished.fragments
    );
    assert_eq!(h.cards(republished.substream_id), vec![LockState::Unlocked]);
    assert_eq!(h.store.records(CONTROL).len(), 2);
}

#[tokio::test]
async fn test_ready_initializes_all_and_isolates_failures() {
    let h = Harness::new();
    h.write("settings", json!({"v": 1})).await;
    h.write("facts", json!(["a", "b"])).await;
    let settings = h
        .settings()
        .with_names(["settings", "missing", "facts"]);
    let engine = h.engine_with(settings);
    let dispatcher = EventDispatcher::new(engine.cache().clone())
        .with_feature(Arc::new(DocumentSyncFeature::new(engine.clone())));

    dispatcher.ready().await;

    assert!(engine.is_initialized("settings"));
    assert!(engine.is_initialized("facts"));
    assert!(!engine.is_initialized("missing"));
    assert_eq!(h.store.records(CONTROL).len(), 2);
    let facts: Option<Vec<String>> = engine.value("facts", "").unwrap();
    assert_eq!(facts, Some(vec!["a".to_string(), "b".to_string()]));
}

#[test]
fn test_initialize_future_is_send() {
    fn assert_send<T: Send>(_: &T) {}
    let h = Harness::new();
    let engine = h.engine();
    let run = async move { engine.initialize("settings").await };
    assert_send(&run);
}
