//! Threadkeep Core - stream caching and document sync
//!
//! This crate provides the client-agnostic half of threadkeep: an in-memory
//! mirror of stream history over a pluggable [`RecordStore`], least-frequent
//! selection over that history, and a sync engine that keeps local JSON
//! documents mirrored into sub-streams of a control stream.

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod guard;
pub mod id;
pub mod selection;
pub mod store;

pub use cache::{CachePolicy, StreamCache};
pub use config::ThreadkeepConfig;
pub use dispatch::{EventDispatcher, Feature};
pub use document::{Document, DocumentEngine, DocumentSettings, DocumentSyncFeature, LockState};
pub use error::{CoreError, Result};
pub use guard::{ActionGuard, ActionKey, ActionPermit};
pub use id::{RecordId, StreamId, UserId};
pub use store::{Card, CardAction, MemoryRecordStore, Record, RecordContent, RecordStore, Substream};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        CachePolicy, CoreError, Document, DocumentEngine, EventDispatcher, Feature, LockState,
        Record, RecordContent, RecordId, RecordStore, Result, StreamCache, StreamId, UserId,
    };
}
