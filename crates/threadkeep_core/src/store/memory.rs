//! In-process record store
//!
//! Behaves like the remote service closely enough to drive the cache and the
//! document engine without a network: snowflake-ordered ids, newest-first
//! pages, sub-streams whose id equals the starter record's id.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{PageRequest, Record, RecordContent, RecordStore, Substream};
use crate::id::{RecordId, StreamId, UserId};
use crate::{CoreError, Result};

#[derive(Debug, Default)]
struct MemoryState {
    /// Oldest first
    streams: HashMap<StreamId, Vec<Record>>,
    substreams: HashMap<RecordId, Substream>,
    /// Deleted sub-streams; any access to them fails
    removed: HashSet<StreamId>,
    next_id: u64,
    failures: HashMap<&'static str, FailurePlan>,
    fetches: usize,
    creates: usize,
    deletes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct FailurePlan {
    /// Calls to let through before failing
    skip: usize,
    times: usize,
}

#[derive(Debug)]
pub struct MemoryRecordStore {
    author: UserId,
    latency: Option<Duration>,
    state: Mutex<MemoryState>,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(UserId(1))
    }
}

impl MemoryRecordStore {
    pub fn new(author: UserId) -> Self {
        Self {
            author,
            latency: None,
            state: Mutex::new(MemoryState {
                next_id: 1_000,
                ..Default::default()
            }),
        }
    }

    /// Sleep before every operation, so concurrent callers interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `times` calls of `operation` fail with `StoreUnavailable`.
    ///
    /// `operation` is the trait method name, e.g. `"fetch_page"`.
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        self.fail_after(operation, 0, times);
    }

    /// Let `skip` calls of `operation` succeed, then fail the next `times`
    pub fn fail_after(&self, operation: &'static str, skip: usize, times: usize) {
        self.state
            .lock()
            .failures
            .insert(operation, FailurePlan { skip, times });
    }

    /// Delete the sub-stream of `record_id` and everything in it, as when a
    /// thread is deleted remotely
    pub fn remove_substream(&self, stream_id: StreamId, record_id: RecordId) {
        let mut state = self.state.lock();
        let Some(substream) = state.substreams.remove(&record_id) else {
            return;
        };
        state.streams.remove(&substream.id);
        state.removed.insert(substream.id);
        if let Some(starter) = state
            .streams
            .get_mut(&stream_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == record_id))
        {
            starter.has_substream = false;
        }
    }

    /// Append a record written by someone else
    pub fn insert_as(&self, stream_id: StreamId, author: UserId, content: RecordContent) -> Record {
        let mut state = self.state.lock();
        Self::push(&mut state, stream_id, author, content)
    }

    /// Snapshot of a stream, oldest first
    pub fn records(&self, stream_id: StreamId) -> Vec<Record> {
        self.state
            .lock()
            .streams
            .get(&stream_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `fetch_page` calls served so far
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().creates
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().deletes
    }

    async fn enter(&self, operation: &'static str, stream_id: StreamId) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        if let Some(plan) = state.failures.get_mut(operation) {
            if plan.skip > 0 {
                plan.skip -= 1;
            } else if plan.times > 0 {
                plan.times -= 1;
                return Err(CoreError::store_unavailable(
                    operation,
                    Some(stream_id),
                    "injected failure",
                ));
            }
        }
        if state.removed.contains(&stream_id) {
            return Err(CoreError::store_unavailable(
                operation,
                Some(stream_id),
                format!("unknown stream {stream_id}"),
            ));
        }
        Ok(())
    }

    fn push(
        state: &mut MemoryState,
        stream_id: StreamId,
        author: UserId,
        content: RecordContent,
    ) -> Record {
        state.next_id += 1;
        let record = Record {
            id: RecordId(state.next_id),
            stream_id,
            author_id: author,
            created_at: Utc::now(),
            content,
            has_substream: false,
        };
        state
            .streams
            .entry(stream_id)
            .or_default()
            .push(record.clone());
        record
    }

    fn not_found(operation: &str, stream_id: StreamId, record_id: RecordId) -> CoreError {
        CoreError::store_unavailable(
            operation,
            Some(stream_id),
            format!("unknown record {record_id}"),
        )
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn fetch_page(&self, stream_id: StreamId, page: PageRequest) -> Result<Vec<Record>> {
        self.enter("fetch_page", stream_id).await?;
        let mut state = self.state.lock();
        state.fetches += 1;
        let Some(records) = state.streams.get(&stream_id) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .rev()
            .filter(|r| page.before.map_or(true, |before| r.id < before))
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<Record> {
        self.enter("fetch_record", stream_id).await?;
        let state = self.state.lock();
        state
            .streams
            .get(&stream_id)
            .and_then(|records| records.iter().find(|r| r.id == record_id))
            .cloned()
            .ok_or_else(|| Self::not_found("fetch_record", stream_id, record_id))
    }

    async fn create_record(&self, stream_id: StreamId, content: RecordContent) -> Result<Record> {
        self.enter("create_record", stream_id).await?;
        let mut state = self.state.lock();
        state.creates += 1;
        Ok(Self::push(&mut state, stream_id, self.author, content))
    }

    async fn edit_record(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        content: RecordContent,
    ) -> Result<Record> {
        self.enter("edit_record", stream_id).await?;
        let mut state = self.state.lock();
        let record = state
            .streams
            .get_mut(&stream_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == record_id))
            .ok_or_else(|| Self::not_found("edit_record", stream_id, record_id))?;
        record.content = content;
        Ok(record.clone())
    }

    async fn delete_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<()> {
        self.enter("delete_record", stream_id).await?;
        let mut state = self.state.lock();
        let records = state
            .streams
            .get_mut(&stream_id)
            .ok_or_else(|| Self::not_found("delete_record", stream_id, record_id))?;
        let before = records.len();
        records.retain(|r| r.id != record_id);
        if records.len() == before {
            return Err(Self::not_found("delete_record", stream_id, record_id));
        }
        state.deletes += 1;
        Ok(())
    }

    async fn attach_substream(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        name: &str,
    ) -> Result<Substream> {
        self.enter("attach_substream", stream_id).await?;
        let mut state = self.state.lock();
        if state.substreams.contains_key(&record_id) {
            return Err(CoreError::store_unavailable(
                "attach_substream",
                Some(stream_id),
                format!("record {record_id} already has a sub-stream"),
            ));
        }
        let record = state
            .streams
            .get_mut(&stream_id)
            .and_then(|records| records.iter_mut().find(|r| r.id == record_id))
            .ok_or_else(|| Self::not_found("attach_substream", stream_id, record_id))?;
        record.has_substream = true;
        let substream = Substream {
            id: record_id.as_substream(),
            name: name.to_string(),
        };
        state.substreams.insert(record_id, substream.clone());
        Ok(substream)
    }

    async fn fetch_substream_of(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
    ) -> Result<Option<Substream>> {
        self.enter("fetch_substream_of", stream_id).await?;
        Ok(self.state.lock().substreams.get(&record_id).cloned())
    }

    async fn current_author(&self) -> Result<UserId> {
        Ok(self.author)
    }
}
