use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use super::backup::backup_file;
use super::control::{LockState, control_card, lock_state_of};
use super::fragment::{chunk, parse_document, to_canonical, unwrap_fragment, wrap};
use super::{Document, DocumentSettings};
use crate::cache::StreamCache;
use crate::dispatch::Feature;
use crate::id::{RecordId, StreamId, UserId};
use crate::store::{Record, RecordContent, RecordStore, Substream};
use crate::{CoreError, Result};

type SharedInitialize =
    Shared<BoxFuture<'static, std::result::Result<Document, Arc<CoreError>>>>;

/// Where a document lives remotely
#[derive(Debug, Clone)]
struct Locator {
    record_id: RecordId,
    substream: Substream,
}

/// Local file, parsed and fragmented
#[derive(Debug)]
struct LocalCopy {
    values: JsonValue,
    canonical: String,
    fragments: Vec<String>,
}

/// Our records in a document's sub-stream
#[derive(Debug)]
struct RemoteCopy {
    /// Every record we authored there, newest first
    records: Vec<Record>,
    /// Unwrapped fragment texts, oldest first
    fragments: Vec<String>,
    lock_state: LockState,
    control_record_id: Option<RecordId>,
}

/// Keeps local JSON documents and their remote copies in agreement
pub struct DocumentEngine {
    store: Arc<dyn RecordStore>,
    cache: Arc<StreamCache>,
    settings: DocumentSettings,
    documents: DashMap<String, Document>,
    locators: DashMap<String, Locator>,
    inflight: Mutex<HashMap<String, SharedInitialize>>,
    /// Held by every remote mutation of a document
    gates: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl fmt::Debug for DocumentEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentEngine")
            .field("settings", &self.settings)
            .field("documents", &self.documents.len())
            .field("inflight", &self.inflight.lock().len())
            .finish_non_exhaustive()
    }
}

impl DocumentEngine {
    /// The engine reads through `cache`, which must wrap the same store.
    pub fn new(cache: Arc<StreamCache>, settings: DocumentSettings) -> Self {
        Self {
            store: Arc::clone(cache.store()),
            cache,
            settings,
            documents: DashMap::new(),
            locators: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            gates: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &DocumentSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<StreamCache> {
        &self.cache
    }

    /// Reconcile `name` with its remote copy and return the synced document.
    ///
    /// Calls for a name that is already being initialized join the running
    /// reconciliation instead of starting a second one.
    pub async fn initialize(self: &Arc<Self>, name: &str) -> Result<Document> {
        let run = {
            let mut inflight = self.inflight.lock();
            match inflight.get(name) {
                Some(run) => {
                    debug!(document = name, "joining in-flight initialize");
                    run.clone()
                }
                None => {
                    let engine = Arc::clone(self);
                    let owned = name.to_string();
                    let run = async move {
                        let result = engine.run_initialize(&owned).await;
                        engine.inflight.lock().remove(&owned);
                        if let Err(err) = &result {
                            error!(document = %owned, error = %err, "initialize failed");
                        }
                        result.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    inflight.insert(name.to_string(), run.clone());
                    run
                }
            }
        };
        run.await.map_err(|err| CoreError::from_shared(name, err))
    }

    /// Initialize every configured document. One failure does not stop the
    /// others.
    pub async fn initialize_all(self: &Arc<Self>) -> Vec<(String, Result<Document>)> {
        let runs = self.settings.names.iter().map(|name| async move {
            let result = self.initialize(name).await;
            (name.clone(), result)
        });
        futures::future::join_all(runs).await
    }

    /// The last synced state of a document
    pub fn document(&self, name: &str) -> Result<Document> {
        self.documents
            .get(name)
            .map(|doc| doc.clone())
            .ok_or_else(|| CoreError::DocumentNotFound {
                name: name.to_string(),
            })
    }

    pub fn values(&self, name: &str) -> Result<JsonValue> {
        Ok(self.document(name)?.values)
    }

    /// Typed read of one value by JSON pointer, e.g. `/channels/welcome`.
    /// `None` when nothing is at that pointer.
    pub fn value<T: DeserializeOwned>(&self, name: &str, pointer: &str) -> Result<Option<T>> {
        let doc = self.document(name)?;
        doc.values
            .pointer(pointer)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(|e| CoreError::serialization(format!("{name}{pointer}"), e))
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.documents.contains_key(name)
    }

    pub async fn lock(&self, name: &str) -> Result<Document> {
        self.set_lock_state(name, LockState::Locked).await
    }

    pub async fn unlock(&self, name: &str) -> Result<Document> {
        self.set_lock_state(name, LockState::Unlocked).await
    }

    /// Current canonical text of a document, to seed an edit surface
    pub fn begin_edit(&self, name: &str) -> Result<String> {
        let doc = self.document(name)?;
        let len = doc.canonical_form.chars().count();
        if len > self.settings.max_edit_len {
            return Err(CoreError::size_limit(
                format!("document '{name}'"),
                self.settings.max_edit_len,
                len,
            ));
        }
        Ok(doc.canonical_form)
    }

    /// Replace a document with edited text.
    ///
    /// Malformed text is rejected with nothing changed. Otherwise the current
    /// local file is backed up, the canonical form of the new text is written
    /// in its place, and the document is initialized again.
    pub async fn submit_edit(self: &Arc<Self>, name: &str, submitted: &str) -> Result<Document> {
        let doc = self.document(name)?;
        let values = match parse_document(name, submitted) {
            Ok(values) => values,
            Err(err) => {
                warn!(document = name, error = %err, "rejected malformed edit");
                return Err(err);
            }
        };
        let canonical = to_canonical(&values)?;
        if doc.lock_state.is_locked() {
            warn!(
                document = name,
                "document is locked; the remote copy will replace this edit"
            );
        }

        backup_file(&doc.local_path).await?;
        write_document(&doc.local_path, &canonical).await?;
        info!(document = name, "local document replaced by edit");

        self.initialize(name).await
    }

    /// Forget a locator whose record or sub-stream was deleted remotely. The
    /// next initialize publishes the document afresh.
    pub fn forget_locator(&self, stream_id: StreamId, record_id: RecordId) -> Option<String> {
        if stream_id != self.settings.control_stream {
            return None;
        }
        let name = self
            .locators
            .iter()
            .find(|entry| entry.value().record_id == record_id)
            .map(|entry| entry.key().clone())?;
        self.locators.remove(&name);
        info!(document = %name, "document locator deleted remotely");
        Some(name)
    }

    async fn run_initialize(&self, name: &str) -> Result<Document> {
        let gate = self.gate(name);
        let _held = gate.lock().await;

        let path = self.settings.path_for(name);
        let local = self.load_local(name, &path).await?;
        let author = self.store.current_author().await?;

        let Some(locator) = self.find_locator(name, author).await? else {
            return self.publish_new(name, path, local).await;
        };
        let remote = self.read_remote(&locator, author).await?;

        let doc = if remote.fragments == local.fragments {
            debug!(document = name, "document in sync");
            self.synced(name, path, &locator, local, remote.lock_state, remote.control_record_id)
        } else {
            match remote.lock_state {
                LockState::Locked => self.pull_remote(name, path, &locator, remote).await?,
                LockState::Unlocked => self.push_local(name, path, &locator, remote, local).await?,
            }
        };

        self.documents.insert(name.to_string(), doc.clone());
        Ok(doc)
    }

    async fn load_local(&self, name: &str, path: &Path) -> Result<LocalCopy> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::io("read document", path, e))?;
        let values = parse_document(name, &text)?;
        let canonical = to_canonical(&values)?;
        let fragments = chunk(&canonical, self.settings.max_fragment_len)?;
        Ok(LocalCopy {
            values,
            canonical,
            fragments,
        })
    }

    /// Find the locator for `name` among our records in the control stream.
    /// Every locator seen on the way is remembered.
    async fn find_locator(&self, name: &str, author: UserId) -> Result<Option<Locator>> {
        if let Some(locator) = self.locators.get(name).map(|l| l.clone()) {
            return Ok(Some(locator));
        }

        let control = self.settings.control_stream;
        let starters: Vec<Record> = self
            .cache
            .try_get_records(control)
            .await?
            .into_iter()
            .filter(|r| r.has_substream && r.author_id == author)
            .collect();

        // newest first, so a newer duplicate wins
        for starter in starters {
            let Some(substream) = self.store.fetch_substream_of(control, starter.id).await? else {
                continue;
            };
            let found = substream.name == name;
            let locator = Locator {
                record_id: starter.id,
                substream,
            };
            self.locators
                .entry(locator.substream.name.clone())
                .or_insert_with(|| locator.clone());
            if found {
                return Ok(Some(locator));
            }
        }
        Ok(None)
    }

    async fn read_remote(&self, locator: &Locator, author: UserId) -> Result<RemoteCopy> {
        // system notices can carry our author id too; only fragments and
        // control cards belong to the document
        let records: Vec<Record> = self
            .cache
            .try_get_records(locator.substream.id)
            .await?
            .into_iter()
            .filter(|r| r.author_id == author)
            .filter(|r| {
                r.text().and_then(unwrap_fragment).is_some() || lock_state_of(r).is_some()
            })
            .collect();

        let control = records
            .iter()
            .find_map(|r| lock_state_of(r).map(|state| (r.id, state)));
        let fragments = records
            .iter()
            .rev()
            .filter_map(|r| r.text())
            .filter_map(unwrap_fragment)
            .map(str::to_string)
            .collect();

        Ok(RemoteCopy {
            records,
            fragments,
            lock_state: control.map(|(_, state)| state).unwrap_or_default(),
            control_record_id: control.map(|(id, _)| id),
        })
    }

    /// First sync of a document: locator, sub-stream, fragments, control card
    async fn publish_new(&self, name: &str, path: PathBuf, local: LocalCopy) -> Result<Document> {
        let control = self.settings.control_stream;
        info!(
            document = name,
            fragments = local.fragments.len(),
            "publishing new document"
        );

        let starter = self
            .store
            .create_record(control, RecordContent::text(format!("📄 {name}")))
            .await?;
        self.cache.on_record_created(&starter).await;
        let substream = self.store.attach_substream(control, starter.id, name).await?;
        self.cache.on_substream_changed(control, starter.id).await;

        let locator = Locator {
            record_id: starter.id,
            substream,
        };
        self.locators.insert(name.to_string(), locator.clone());

        let control_record_id = self
            .send_fragments(name, &locator, &local.fragments, LockState::Unlocked)
            .await?;
        let doc = self.synced(
            name,
            path,
            &locator,
            local,
            LockState::Unlocked,
            Some(control_record_id),
        );
        self.documents.insert(name.to_string(), doc.clone());
        Ok(doc)
    }

    /// Locked: the remote copy replaces the local file
    async fn pull_remote(
        &self,
        name: &str,
        path: PathBuf,
        locator: &Locator,
        remote: RemoteCopy,
    ) -> Result<Document> {
        let text = remote.fragments.concat();
        // a corrupt remote copy must not clobber the local file
        parse_document(name, &text)?;

        info!(document = name, "remote copy is authoritative; pulling");
        backup_file(&path).await?;
        write_document(&path, &text).await?;

        let local = self.load_local(name, &path).await?;
        Ok(self.synced(
            name,
            path,
            locator,
            local,
            LockState::Locked,
            remote.control_record_id,
        ))
    }

    /// Unlocked: the local file replaces the remote copy
    async fn push_local(
        &self,
        name: &str,
        path: PathBuf,
        locator: &Locator,
        remote: RemoteCopy,
        local: LocalCopy,
    ) -> Result<Document> {
        let stream_id = locator.substream.id;
        info!(
            document = name,
            stale = remote.records.len(),
            fragments = local.fragments.len(),
            "local copy is authoritative; republishing"
        );

        for record in &remote.records {
            self.store.delete_record(stream_id, record.id).await?;
            self.cache.on_record_deleted(stream_id, record.id).await;
        }
        let control_record_id = self
            .send_fragments(name, locator, &local.fragments, LockState::Unlocked)
            .await?;

        Ok(self.synced(
            name,
            path,
            locator,
            local,
            LockState::Unlocked,
            Some(control_record_id),
        ))
    }

    /// Post fragments in order followed by a control card; returns the card's id
    async fn send_fragments(
        &self,
        name: &str,
        locator: &Locator,
        fragments: &[String],
        state: LockState,
    ) -> Result<RecordId> {
        let stream_id = locator.substream.id;
        for fragment in fragments {
            let record = self
                .store
                .create_record(stream_id, RecordContent::text(wrap(fragment)))
                .await?;
            self.cache.on_record_created(&record).await;
        }
        let card = self
            .store
            .create_record(stream_id, RecordContent::Card(control_card(name, state)))
            .await?;
        self.cache.on_record_created(&card).await;
        Ok(card.id)
    }

    async fn set_lock_state(&self, name: &str, state: LockState) -> Result<Document> {
        // a reconciliation running now would act on the old card
        let gate = self.gate(name);
        let _held = gate.lock().await;

        let mut doc = self.document(name)?;
        if doc.lock_state == state {
            debug!(document = name, state = %state, "lock state unchanged");
            return Ok(doc);
        }

        let card = RecordContent::Card(control_card(name, state));
        let record = match doc.control_record_id {
            Some(id) => {
                let record = self.store.edit_record(doc.substream_id, id, card).await?;
                self.cache.on_record_updated(&record).await;
                record
            }
            None => {
                let record = self.store.create_record(doc.substream_id, card).await?;
                self.cache.on_record_created(&record).await;
                record
            }
        };

        doc.lock_state = state;
        doc.control_record_id = Some(record.id);
        self.documents.insert(name.to_string(), doc.clone());
        info!(document = name, state = %state, "lock state changed");
        Ok(doc)
    }

    fn gate(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.gates.entry(name.to_string()).or_default())
    }

    fn synced(
        &self,
        name: &str,
        local_path: PathBuf,
        locator: &Locator,
        local: LocalCopy,
        lock_state: LockState,
        control_record_id: Option<RecordId>,
    ) -> Document {
        Document {
            name: name.to_string(),
            local_path,
            lock_state,
            canonical_form: local.canonical,
            fragments: local.fragments,
            values: local.values,
            locator_id: locator.record_id,
            substream_id: locator.substream.id,
            control_record_id,
        }
    }
}

async fn write_document(path: &Path, text: &str) -> Result<()> {
    tokio::fs::write(path, text)
        .await
        .map_err(|e| CoreError::io("write document", path, e))
}

/// Initializes every configured document once the client is ready
#[derive(Debug, Clone)]
pub struct DocumentSyncFeature {
    engine: Arc<DocumentEngine>,
}

impl DocumentSyncFeature {
    pub fn new(engine: Arc<DocumentEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }
}

#[async_trait]
impl Feature for DocumentSyncFeature {
    fn name(&self) -> &str {
        "document-sync"
    }

    async fn on_ready(&self) -> Result<()> {
        let results = self.engine.initialize_all().await;
        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, result)| result.is_err())
            .map(|(name, _)| name.as_str())
            .collect();
        if failed.is_empty() {
            info!(documents = results.len(), "documents synced");
        } else {
            warn!(
                documents = results.len(),
                failed = ?failed,
                "some documents failed to sync"
            );
        }
        Ok(())
    }

    async fn on_record_deleted(&self, stream_id: StreamId, record_id: RecordId) -> Result<()> {
        self.engine.forget_locator(stream_id, record_id);
        Ok(())
    }

    async fn on_substream_deleted(&self, stream_id: StreamId, starter_id: RecordId) -> Result<()> {
        self.engine.forget_locator(stream_id, starter_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    const CONTROL: StreamId = StreamId(500);

    struct Fixture {
        _dir: TempDir,
        store: Arc<MemoryRecordStore>,
        engine: Arc<DocumentEngine>,
    }

    async fn fixture(name: &str, value: JsonValue) -> Fixture {
        let dir = TempDir::new().unwrap();
        let text = serde_json::to_string(&value).unwrap();
        tokio::fs::write(dir.path().join(format!("{name}.json")), text)
            .await
            .unwrap();
        let store = Arc::new(MemoryRecordStore::default());
        let cache = Arc::new(StreamCache::new(store.clone()));
        let settings = DocumentSettings::new(dir.path(), CONTROL).with_names([name]);
        let engine = Arc::new(DocumentEngine::new(cache, settings));
        Fixture {
            _dir: dir,
            store,
            engine,
        }
    }

    #[tokio::test]
    async fn test_unknown_document() {
        let f = fixture("settings", json!({})).await;
        assert!(matches!(
            f.engine.document("other"),
            Err(CoreError::DocumentNotFound { .. })
        ));
        assert!(matches!(
            f.engine.lock("other").await,
            Err(CoreError::DocumentNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_value_lookup() {
        let f = fixture("settings", json!({"limits": {"daily": 5}, "name": "bot"})).await;
        f.engine.initialize("settings").await.unwrap();

        let daily: Option<u32> = f.engine.value("settings", "/limits/daily").unwrap();
        assert_eq!(daily, Some(5));
        let missing: Option<u32> = f.engine.value("settings", "/limits/weekly").unwrap();
        assert_eq!(missing, None);
        let wrong_type = f.engine.value::<u32>("settings", "/name");
        assert!(matches!(
            wrong_type,
            Err(CoreError::SerializationError { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_initialize_is_a_no_op() {
        let f = fixture("settings", json!({"a": 1})).await;
        let first = f.engine.initialize("settings").await.unwrap();
        let creates = f.store.create_count();

        let second = f.engine.initialize("settings").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.create_count(), creates);
        assert_eq!(f.store.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_local_file_is_io_error() {
        let f = fixture("settings", json!({})).await;
        let err = f.engine.initialize("absent").await.unwrap_err();
        assert!(matches!(err, CoreError::IoError { .. }));
        assert!(!f.engine.is_initialized("absent"));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_and_leaves_no_state() {
        let f = fixture("settings", json!({})).await;
        f.store.fail_next("fetch_page", 1);
        let err = f.engine.initialize("settings").await.unwrap_err();
        assert!(err.is_store_error());
        assert!(!f.engine.is_initialized("settings"));

        // the failure was not cached, so a retry succeeds
        f.engine.initialize("settings").await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_locator_is_forgotten() {
        let f = fixture("settings", json!({})).await;
        let doc = f.engine.initialize("settings").await.unwrap();

        let feature = DocumentSyncFeature::new(f.engine.clone());
        feature
            .on_record_deleted(StreamId(1), doc.locator_id)
            .await
            .unwrap();
        assert!(f.engine.locators.contains_key("settings"));

        feature
            .on_record_deleted(CONTROL, doc.locator_id)
            .await
            .unwrap();
        assert!(!f.engine.locators.contains_key("settings"));
    }
}
