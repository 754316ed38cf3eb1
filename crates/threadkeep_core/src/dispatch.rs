//! Lifecycle event fan-out
//!
//! The client adapter turns gateway events into calls on an
//! [`EventDispatcher`]. The dispatcher keeps the [`StreamCache`] current first,
//! then hands the event to every registered [`Feature`] concurrently. A
//! failing feature is logged and does not affect the others.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::Result;
use crate::cache::StreamCache;
use crate::id::{RecordId, StreamId};
use crate::store::Record;

/// A unit of bot behavior reacting to lifecycle events.
///
/// Every hook defaults to doing nothing.
#[async_trait]
pub trait Feature: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// The client connected and the cache is usable
    async fn on_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn on_record_created(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    async fn on_record_updated(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    async fn on_record_deleted(&self, _stream_id: StreamId, _record_id: RecordId) -> Result<()> {
        Ok(())
    }

    /// The sub-stream started from `starter_id` in `stream_id` is gone
    async fn on_substream_deleted(
        &self,
        _stream_id: StreamId,
        _starter_id: RecordId,
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct EventDispatcher {
    cache: Arc<StreamCache>,
    features: Vec<Arc<dyn Feature>>,
}

impl EventDispatcher {
    pub fn new(cache: Arc<StreamCache>) -> Self {
        Self {
            cache,
            features: Vec::new(),
        }
    }

    pub fn register(&mut self, feature: Arc<dyn Feature>) {
        debug!(feature = feature.name(), "registered feature");
        self.features.push(feature);
    }

    pub fn with_feature(mut self, feature: Arc<dyn Feature>) -> Self {
        self.register(feature);
        self
    }

    pub fn cache(&self) -> &Arc<StreamCache> {
        &self.cache
    }

    pub fn features(&self) -> &[Arc<dyn Feature>] {
        &self.features
    }

    pub async fn ready(&self) {
        let runs = self.features.iter().map(|f| async move { (f, f.on_ready().await) });
        report("ready", join_all(runs).await);
    }

    pub async fn record_created(&self, record: &Record) {
        self.cache.on_record_created(record).await;
        let runs = self
            .features
            .iter()
            .map(|f| async move { (f, f.on_record_created(record).await) });
        report("record_created", join_all(runs).await);
    }

    pub async fn record_updated(&self, record: &Record) {
        self.cache.on_record_updated(record).await;
        let runs = self
            .features
            .iter()
            .map(|f| async move { (f, f.on_record_updated(record).await) });
        report("record_updated", join_all(runs).await);
    }

    pub async fn record_deleted(&self, stream_id: StreamId, record_id: RecordId) {
        self.cache.on_record_deleted(stream_id, record_id).await;
        let runs = self
            .features
            .iter()
            .map(|f| async move { (f, f.on_record_deleted(stream_id, record_id).await) });
        report("record_deleted", join_all(runs).await);
    }

    /// A sub-stream was attached to `starter_id`
    pub async fn substream_changed(&self, stream_id: StreamId, starter_id: RecordId) {
        self.cache.on_substream_changed(stream_id, starter_id).await;
    }

    /// The sub-stream of `starter_id` was deleted along with its records
    pub async fn substream_deleted(&self, stream_id: StreamId, starter_id: RecordId) {
        self.cache.invalidate(starter_id.as_substream());
        self.cache.on_substream_changed(stream_id, starter_id).await;
        let runs = self
            .features
            .iter()
            .map(|f| async move { (f, f.on_substream_deleted(stream_id, starter_id).await) });
        report("substream_deleted", join_all(runs).await);
    }
}

fn report(event: &str, results: Vec<(&Arc<dyn Feature>, Result<()>)>) {
    for (feature, result) in results {
        if let Err(err) = result {
            warn!(
                feature = feature.name(),
                event,
                error = %err,
                "feature failed to handle event"
            );
        }
    }
}
