//! The control record of a synced document
//!
//! One card per document sub-stream carries the lock state as an explicit
//! field plus the edit/lock/unlock actions. The title glyph is only a display
//! projection of that field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::{Card, CardAction, Record};

/// Card field holding the lock state
pub const LOCK_STATE_FIELD: &str = "lock_state";

/// Prefix of every action id this crate emits
pub const ACTION_PREFIX: &str = "threadkeep";

/// Which side wins when local and remote disagree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// The remote fragments are authoritative
    Locked,
    /// The local file is authoritative
    #[default]
    Unlocked,
}

impl LockState {
    pub fn glyph(self) -> &'static str {
        match self {
            LockState::Locked => "🔒",
            LockState::Unlocked => "🔓",
        }
    }

    pub fn is_locked(self) -> bool {
        self == LockState::Locked
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => write!(f, "locked"),
            LockState::Unlocked => write!(f, "unlocked"),
        }
    }
}

impl FromStr for LockState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "locked" => Ok(Self::Locked),
            "unlocked" => Ok(Self::Unlocked),
            _ => Err(format!(
                "unknown lock state '{}', expected: locked, unlocked",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Edit,
    Lock,
    Unlock,
}

impl ActionKind {
    fn as_str(self) -> &'static str {
        match self {
            ActionKind::Edit => "edit",
            ActionKind::Lock => "lock",
            ActionKind::Unlock => "unlock",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action on a named document, encoded as `threadkeep:<kind>:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentAction {
    pub kind: ActionKind,
    pub document: String,
}

impl DocumentAction {
    pub fn new(kind: ActionKind, document: impl Into<String>) -> Self {
        Self {
            kind,
            document: document.into(),
        }
    }

    pub fn custom_id(&self) -> String {
        format!("{ACTION_PREFIX}:{}:{}", self.kind, self.document)
    }

    /// Parse an action id; `None` for ids that are not ours
    pub fn parse(custom_id: &str) -> Option<Self> {
        let rest = custom_id.strip_prefix(ACTION_PREFIX)?.strip_prefix(':')?;
        let (kind, document) = rest.split_once(':')?;
        let kind = match kind {
            "edit" => ActionKind::Edit,
            "lock" => ActionKind::Lock,
            "unlock" => ActionKind::Unlock,
            _ => return None,
        };
        if document.is_empty() {
            return None;
        }
        Some(Self::new(kind, document))
    }
}

/// Build the control card for `document` in `state`
pub fn control_card(document: &str, state: LockState) -> Card {
    let locked = state.is_locked();
    let description = if locked {
        "Locked: the copy in this thread is authoritative and overwrites the local file."
    } else {
        "Unlocked: the local file is authoritative and is republished here on change."
    };
    Card::new(format!("{} {}", state.glyph(), document))
        .description(description)
        .field(LOCK_STATE_FIELD, state.to_string())
        .action(CardAction {
            id: DocumentAction::new(ActionKind::Edit, document).custom_id(),
            label: "Edit".to_string(),
            disabled: locked,
        })
        .action(CardAction {
            id: DocumentAction::new(ActionKind::Lock, document).custom_id(),
            label: "Lock".to_string(),
            disabled: locked,
        })
        .action(CardAction {
            id: DocumentAction::new(ActionKind::Unlock, document).custom_id(),
            label: "Unlock".to_string(),
            disabled: !locked,
        })
}

/// Lock state carried by a record, if it is a control card
pub fn lock_state_of(record: &Record) -> Option<LockState> {
    record
        .card()?
        .fields
        .get(LOCK_STATE_FIELD)
        .and_then(|value| value.parse().ok())
}
