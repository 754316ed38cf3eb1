//! Document synchronization
//!
//! A document is a local JSON file mirrored into a sub-stream of the control
//! stream: one locator record in the control stream, a sub-stream named after
//! the document holding its fragments in order, and a control card carrying
//! the lock state. `DocumentEngine::initialize` reconciles the two sides.

mod backup;
mod control;
mod engine;
pub mod fragment;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::{RecordId, StreamId};

pub use backup::{backup_file, next_backup_path};
pub use control::{
    ACTION_PREFIX, ActionKind, DocumentAction, LOCK_STATE_FIELD, LockState, control_card,
    lock_state_of,
};
pub use engine::{DocumentEngine, DocumentSyncFeature};

/// Largest fragment, leaving room for the decoration in a 2000 character
/// record
pub const DEFAULT_MAX_FRAGMENT_LEN: usize = 1900;

/// Largest document that can be edited in one inline edit surface
pub const DEFAULT_MAX_EDIT_LEN: usize = 4000;

/// Upper bound for a configured edit limit; inline edit inputs hold no more
pub const MAX_EDIT_LEN: usize = 4000;

/// A synced document as of its last successful `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub local_path: PathBuf,
    pub lock_state: LockState,
    pub canonical_form: String,
    pub fragments: Vec<String>,
    /// Parsed document content
    pub values: JsonValue,
    /// Record in the control stream the sub-stream hangs off
    pub locator_id: RecordId,
    pub substream_id: StreamId,
    pub control_record_id: Option<RecordId>,
}

/// Where documents live, locally and remotely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSettings {
    /// Directory holding `<name>.json` files and their backups
    pub directory: PathBuf,
    /// Stream holding one locator record per document
    pub control_stream: StreamId,
    pub max_fragment_len: usize,
    pub max_edit_len: usize,
    /// Documents initialized on startup
    pub names: Vec<String>,
}

impl DocumentSettings {
    pub fn new(directory: impl Into<PathBuf>, control_stream: StreamId) -> Self {
        Self {
            directory: directory.into(),
            control_stream,
            max_fragment_len: DEFAULT_MAX_FRAGMENT_LEN,
            max_edit_len: DEFAULT_MAX_EDIT_LEN,
            names: Vec::new(),
        }
    }

    pub fn with_names(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_fragment_len(mut self, max: usize) -> Self {
        self.max_fragment_len = max;
        self
    }

    pub fn with_max_edit_len(mut self, max: usize) -> Self {
        self.max_edit_len = max;
        self
    }

    /// Local file for a document name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.json"))
    }
}
