//! In-memory mirror of stream history
//!
//! Each stream is paginated from the store at most once while it stays
//! cached; after that, lifecycle notifications keep the mirror current.
//! Streams are evicted least-recently-used once the policy's stream count or
//! total record budget is exceeded.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::Result;
use crate::id::{RecordId, StreamId};
use crate::store::{PageRequest, Record, RecordStore};

/// Bounds and page sizes for a [`StreamCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum number of streams held at once
    pub max_streams: NonZeroUsize,
    /// Total records across all streams before older streams are evicted
    pub max_records: usize,
    /// Page size for backfilling older records
    pub page_size: u8,
    /// Page size of the first request, which detects an empty stream
    pub first_page_size: u8,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_streams: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            max_records: 100_000,
            page_size: 100,
            first_page_size: 1,
        }
    }
}

#[derive(Debug, Default)]
struct StreamEntry {
    /// `None` until hydrated. Newest first.
    records: tokio::sync::Mutex<Option<Vec<Record>>>,
    len: AtomicUsize,
}

/// Outcome of paginating a stream
struct Hydration {
    records: Vec<Record>,
    failure: Option<crate::CoreError>,
}

#[derive(Debug)]
pub struct StreamCache {
    store: Arc<dyn RecordStore>,
    policy: CachePolicy,
    streams: Mutex<LruCache<StreamId, Arc<StreamEntry>>>,
}

impl StreamCache {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_policy(store, CachePolicy::default())
    }

    pub fn with_policy(store: Arc<dyn RecordStore>, policy: CachePolicy) -> Self {
        Self {
            store,
            policy,
            streams: Mutex::new(LruCache::new(policy.max_streams)),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Records of a stream, newest first.
    ///
    /// Never fails: if the store errors while hydrating, the error is logged
    /// and whatever was gathered is returned. An empty result (the first page
    /// failed) is cached; a truncated history is not, so the next read pages
    /// again.
    pub async fn get_records(&self, stream_id: StreamId) -> Vec<Record> {
        let entry = self.entry(stream_id);
        let records = {
            let mut slot = entry.records.lock().await;
            if slot.is_none() {
                let hydration = self.hydrate(stream_id).await;
                if let Some(err) = &hydration.failure {
                    error!(
                        stream_id = %stream_id,
                        error = %err,
                        gathered = hydration.records.len(),
                        "stream hydration failed; serving partial history"
                    );
                    if !hydration.records.is_empty() {
                        return hydration.records;
                    }
                }
                entry.len.store(hydration.records.len(), Ordering::Relaxed);
                *slot = Some(hydration.records);
            }
            slot.as_ref().cloned().unwrap_or_default()
        };
        self.enforce_budget(stream_id);
        records
    }

    /// Records of a stream, newest first, surfacing store failures.
    ///
    /// A failed hydration caches nothing, so the next call starts over.
    pub async fn try_get_records(&self, stream_id: StreamId) -> Result<Vec<Record>> {
        let entry = self.entry(stream_id);
        let records = {
            let mut slot = entry.records.lock().await;
            if slot.is_none() {
                let hydration = self.hydrate(stream_id).await;
                if let Some(err) = hydration.failure {
                    warn!(stream_id = %stream_id, error = %err, "stream hydration failed");
                    return Err(err);
                }
                entry.len.store(hydration.records.len(), Ordering::Relaxed);
                *slot = Some(hydration.records);
            }
            slot.as_ref().cloned().unwrap_or_default()
        };
        self.enforce_budget(stream_id);
        Ok(records)
    }

    pub async fn filter_records<F>(&self, stream_id: StreamId, predicate: F) -> Vec<Record>
    where
        F: Fn(&Record) -> bool,
    {
        self.get_records(stream_id)
            .await
            .into_iter()
            .filter(|r| predicate(r))
            .collect()
    }

    pub async fn find_record<F>(&self, stream_id: StreamId, predicate: F) -> Option<Record>
    where
        F: Fn(&Record) -> bool,
    {
        self.get_records(stream_id)
            .await
            .into_iter()
            .find(|r| predicate(r))
    }

    pub fn is_cached(&self, stream_id: StreamId) -> bool {
        self.streams.lock().contains(&stream_id)
    }

    /// Drop a stream's mirror; the next read paginates again
    pub fn invalidate(&self, stream_id: StreamId) {
        self.streams.lock().pop(&stream_id);
    }

    /// A new record was posted. Prepends it if the stream is cached.
    pub async fn on_record_created(&self, record: &Record) {
        self.apply(record.stream_id, |records| {
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => records.insert(0, record.clone()),
            }
        })
        .await;
    }

    pub async fn on_record_updated(&self, record: &Record) {
        self.apply(record.stream_id, |records| {
            if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
                *existing = record.clone();
            }
        })
        .await;
    }

    pub async fn on_record_deleted(&self, stream_id: StreamId, record_id: RecordId) {
        self.apply(stream_id, |records| records.retain(|r| r.id != record_id))
            .await;
    }

    /// A sub-stream was attached to or detached from `starter_id`.
    ///
    /// The cached starter's `has_substream` is stale either way, so it is
    /// fetched again and replaced in place.
    pub async fn on_substream_changed(&self, stream_id: StreamId, starter_id: RecordId) {
        if !self.is_cached(stream_id) {
            return;
        }
        match self.store.fetch_record(stream_id, starter_id).await {
            Ok(record) => self.on_record_updated(&record).await,
            Err(err) => {
                warn!(
                    stream_id = %stream_id,
                    record_id = %starter_id,
                    error = %err,
                    "could not refresh sub-stream starter"
                );
            }
        }
    }

    fn entry(&self, stream_id: StreamId) -> Arc<StreamEntry> {
        let mut streams = self.streams.lock();
        streams
            .get_or_insert(stream_id, || Arc::new(StreamEntry::default()))
            .clone()
    }

    /// Mutate a hydrated stream in place; no-op for streams not mirrored
    async fn apply<F>(&self, stream_id: StreamId, mutate: F)
    where
        F: FnOnce(&mut Vec<Record>),
    {
        let entry = self.streams.lock().peek(&stream_id).cloned();
        let Some(entry) = entry else {
            return;
        };
        let mut slot = entry.records.lock().await;
        if let Some(records) = slot.as_mut() {
            mutate(records);
            entry.len.store(records.len(), Ordering::Relaxed);
        }
    }

    async fn hydrate(&self, stream_id: StreamId) -> Hydration {
        let mut records = Vec::new();

        let first = PageRequest::newest(self.policy.first_page_size);
        match self.store.fetch_page(stream_id, first).await {
            Ok(page) => {
                let exhausted = page.len() < first.limit as usize;
                records.extend(page);
                if exhausted {
                    return Hydration {
                        records,
                        failure: None,
                    };
                }
            }
            Err(err) => {
                return Hydration {
                    records,
                    failure: Some(err),
                };
            }
        }

        while let Some(oldest) = records.last().map(|r| r.id) {
            let page = PageRequest::before(self.policy.page_size, oldest);
            match self.store.fetch_page(stream_id, page).await {
                Ok(batch) => {
                    let exhausted = batch.len() < page.limit as usize;
                    records.extend(batch);
                    if exhausted {
                        break;
                    }
                }
                Err(err) => {
                    return Hydration {
                        records,
                        failure: Some(err),
                    };
                }
            }
        }

        debug!(stream_id = %stream_id, records = records.len(), "stream hydrated");
        Hydration {
            records,
            failure: None,
        }
    }

    /// Evict least-recently-used streams until the record budget holds.
    /// `keep` is the stream just read and is never evicted.
    fn enforce_budget(&self, keep: StreamId) {
        let mut streams = self.streams.lock();
        let mut total: usize = streams
            .iter()
            .map(|(_, e)| e.len.load(Ordering::Relaxed))
            .sum();
        while total > self.policy.max_records {
            let Some((&victim, _)) = streams.peek_lru() else {
                break;
            };
            if victim == keep {
                // promote the kept stream and try the next-oldest
                streams.promote(&keep);
                if streams.len() <= 1 {
                    break;
                }
                continue;
            }
            if let Some((_, evicted)) = streams.pop_lru() {
                let freed = evicted.len.load(Ordering::Relaxed);
                debug!(stream_id = %victim, freed, "evicted stream from cache");
                total = total.saturating_sub(freed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::UserId;
    use crate::store::{MemoryRecordStore, RecordContent};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    async fn seeded(count: usize) -> (Arc<MemoryRecordStore>, StreamId) {
        let store = Arc::new(MemoryRecordStore::default());
        let stream = StreamId(77);
        for i in 0..count {
            store
                .create_record(stream, RecordContent::text(format!("r{i}")))
                .await
                .unwrap();
        }
        (store, stream)
    }

    fn ids(records: &[Record]) -> Vec<RecordId> {
        records.iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn test_hydrates_once_across_pages() {
        let (store, stream) = seeded(250).await;
        let cache = StreamCache::new(store.clone());

        let records = cache.get_records(stream).await;
        assert_eq!(records.len(), 250);
        assert!(records.windows(2).all(|w| w[0].id > w[1].id));
        // first + 100 + 100 + 49
        assert_eq!(store.fetch_count(), 4);

        let again = cache.get_records(stream).await;
        assert_eq!(ids(&again), ids(&records));
        assert_eq!(store.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_stream_needs_only_the_first_page() {
        let store = Arc::new(MemoryRecordStore::default());
        let cache = StreamCache::new(store.clone());
        assert!(cache.get_records(StreamId(1)).await.is_empty());
        assert_eq!(store.fetch_count(), 1);
        assert!(cache.is_cached(StreamId(1)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_first_page_failure_degrades_to_empty() {
        let (store, stream) = seeded(3).await;
        store.fail_next("fetch_page", 1);
        let cache = StreamCache::new(store.clone());

        assert!(cache.get_records(stream).await.is_empty());
        assert!(logs_contain("stream hydration failed"));
        // the empty result is what stays cached
        assert!(cache.get_records(stream).await.is_empty());
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_later_page_failure_is_not_cached() {
        let (store, stream) = seeded(250).await;
        store.fail_after("fetch_page", 1, 1);
        let cache = StreamCache::new(store.clone());

        // only the first page made it
        let partial = cache.get_records(stream).await;
        assert_eq!(partial.len(), 1);
        assert!(logs_contain("stream hydration failed"));

        let full = cache.get_records(stream).await;
        assert_eq!(full.len(), 250);
        assert_eq!(full[0].id, partial[0].id);
        assert_eq!(cache.get_records(stream).await, full);
    }

    #[tokio::test]
    async fn test_try_get_records_does_not_cache_failures() {
        let (store, stream) = seeded(3).await;
        store.fail_next("fetch_page", 1);
        let cache = StreamCache::new(store.clone());

        let err = cache.try_get_records(stream).await.unwrap_err();
        assert!(err.is_store_error());
        assert_eq!(cache.try_get_records(stream).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_notifications_keep_mirror_current() {
        let (store, stream) = seeded(5).await;
        let cache = StreamCache::new(store.clone());
        let before = cache.get_records(stream).await;

        let created = store
            .create_record(stream, RecordContent::text("new"))
            .await
            .unwrap();
        cache.on_record_created(&created).await;
        // duplicate delivery is harmless
        cache.on_record_created(&created).await;

        let edited = store
            .edit_record(stream, before[2].id, RecordContent::text("edited"))
            .await
            .unwrap();
        cache.on_record_updated(&edited).await;

        store.delete_record(stream, before[4].id).await.unwrap();
        cache.on_record_deleted(stream, before[4].id).await;

        let mirrored = cache.get_records(stream).await;
        let fresh = StreamCache::new(store.clone()).get_records(stream).await;
        assert_eq!(mirrored, fresh);
        assert_eq!(mirrored[0].text(), Some("new"));
    }

    #[tokio::test]
    async fn test_notifications_ignore_uncached_streams() {
        let (store, stream) = seeded(1).await;
        let cache = StreamCache::new(store.clone());
        let created = store
            .create_record(stream, RecordContent::text("x"))
            .await
            .unwrap();
        cache.on_record_created(&created).await;
        assert!(!cache.is_cached(stream));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_substream_change_refreshes_starter() {
        let (store, stream) = seeded(2).await;
        let cache = StreamCache::new(store.clone());
        let records = cache.get_records(stream).await;
        assert!(!records[0].has_substream);

        store
            .attach_substream(stream, records[0].id, "thread")
            .await
            .unwrap();
        cache.on_substream_changed(stream, records[0].id).await;

        let records = cache.get_records(stream).await;
        assert!(records[0].has_substream);
    }

    #[tokio::test]
    async fn test_filter_and_find() {
        let (store, stream) = seeded(4).await;
        store.insert_as(stream, UserId(2), RecordContent::text("foreign"));
        let cache = StreamCache::new(store);

        let ours = cache
            .filter_records(stream, |r| r.author_id == UserId(1))
            .await;
        assert_eq!(ours.len(), 4);
        let found = cache
            .find_record(stream, |r| r.text() == Some("foreign"))
            .await;
        assert_eq!(found.map(|r| r.author_id), Some(UserId(2)));
    }

    #[tokio::test]
    async fn test_record_budget_evicts_least_recent_stream() {
        let store = Arc::new(MemoryRecordStore::default());
        for stream in [StreamId(1), StreamId(2), StreamId(3)] {
            for _ in 0..4 {
                store
                    .create_record(stream, RecordContent::text("x"))
                    .await
                    .unwrap();
            }
        }
        let policy = CachePolicy {
            max_records: 8,
            ..Default::default()
        };
        let cache = StreamCache::with_policy(store, policy);

        cache.get_records(StreamId(1)).await;
        cache.get_records(StreamId(2)).await;
        cache.get_records(StreamId(3)).await;

        assert!(!cache.is_cached(StreamId(1)));
        assert!(cache.is_cached(StreamId(2)));
        assert!(cache.is_cached(StreamId(3)));
    }

    #[tokio::test]
    async fn test_stream_count_bound() {
        let store = Arc::new(MemoryRecordStore::default());
        let policy = CachePolicy {
            max_streams: NonZeroUsize::new(2).unwrap(),
            ..Default::default()
        };
        let cache = StreamCache::with_policy(store, policy);
        for id in 1..=3 {
            cache.get_records(StreamId(id)).await;
        }
        assert!(!cache.is_cached(StreamId(1)));
        assert!(cache.is_cached(StreamId(3)));
    }
}
