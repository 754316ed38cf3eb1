//! RecordStore trait - abstraction over the remote record service
//!
//! The cache and the document engine talk to the remote stream only through
//! this trait. `MemoryRecordStore` backs tests and offline runs; the Discord
//! crate provides the real implementation.

mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::id::{RecordId, StreamId, UserId};

pub use memory::MemoryRecordStore;

/// One atomic entry in a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub stream_id: StreamId,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub content: RecordContent,
    /// Set once a sub-stream has been attached to this record
    pub has_substream: bool,
}

impl Record {
    /// Text body, if this is a plain text record
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            RecordContent::Text(text) => Some(text),
            RecordContent::Card(_) => None,
        }
    }

    pub fn card(&self) -> Option<&Card> {
        match &self.content {
            RecordContent::Card(card) => Some(card),
            RecordContent::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RecordContent {
    Text(String),
    Card(Card),
}

impl RecordContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Structured record content: a titled card with named fields and actions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub title: String,
    pub description: String,
    /// Machine-readable fields, rendered in key order
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub actions: Vec<CardAction>,
}

impl Card {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn action(mut self, action: CardAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// A button-like affordance attached to a card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAction {
    pub id: String,
    pub label: String,
    pub disabled: bool,
}

/// A sub-stream attached to a starter record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substream {
    pub id: StreamId,
    pub name: String,
}

/// One page request: at most `limit` records, all strictly older than `before`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u8,
    pub before: Option<RecordId>,
}

impl PageRequest {
    pub fn newest(limit: u8) -> Self {
        Self {
            limit,
            before: None,
        }
    }

    pub fn before(limit: u8, before: RecordId) -> Self {
        Self {
            limit,
            before: Some(before),
        }
    }
}

/// Remote record service
///
/// Every method maps its transport failures to `CoreError::StoreUnavailable`.
/// Timeouts and retries belong to the implementation.
#[async_trait]
pub trait RecordStore: Send + Sync + fmt::Debug {
    /// Fetch one page of records, newest first
    async fn fetch_page(&self, stream_id: StreamId, page: PageRequest) -> Result<Vec<Record>>;

    /// Fetch a single record by id
    async fn fetch_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<Record>;

    async fn create_record(&self, stream_id: StreamId, content: RecordContent) -> Result<Record>;

    async fn edit_record(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        content: RecordContent,
    ) -> Result<Record>;

    async fn delete_record(&self, stream_id: StreamId, record_id: RecordId) -> Result<()>;

    /// Attach a named sub-stream to a record
    async fn attach_substream(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
        name: &str,
    ) -> Result<Substream>;

    /// The sub-stream attached to a record, if any
    async fn fetch_substream_of(
        &self,
        stream_id: StreamId,
        record_id: RecordId,
    ) -> Result<Option<Substream>>;

    /// Identity this client writes records as
    async fn current_author(&self) -> Result<UserId>;
}
