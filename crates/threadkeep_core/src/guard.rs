//! Per-actor busy guard for user-triggered actions
//!
//! A button press that starts slow work holds a permit for
//! (action, target, actor); a second press by the same actor on the same
//! target is turned away until the first finishes. The permit releases on
//! drop, so an early return or error can never leave the key held.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::id::{RecordId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub action: String,
    pub target: RecordId,
    pub actor: UserId,
}

impl ActionKey {
    pub fn new(action: impl Into<String>, target: RecordId, actor: UserId) -> Self {
        Self {
            action: action.into(),
            target,
            actor,
        }
    }
}

#[derive(Debug, Default)]
pub struct ActionGuard {
    busy: Mutex<HashSet<ActionKey>>,
}

impl ActionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. `None` if the same actor already holds it.
    pub fn try_acquire(self: &Arc<Self>, key: ActionKey) -> Option<ActionPermit> {
        if !self.busy.lock().insert(key.clone()) {
            return None;
        }
        Some(ActionPermit {
            guard: Arc::clone(self),
            key,
        })
    }

    pub fn is_busy(&self, key: &ActionKey) -> bool {
        self.busy.lock().contains(key)
    }
}

/// Held while an action runs
#[derive(Debug)]
pub struct ActionPermit {
    guard: Arc<ActionGuard>,
    key: ActionKey,
}

impl ActionPermit {
    pub fn key(&self) -> &ActionKey {
        &self.key
    }
}

impl Drop for ActionPermit {
    fn drop(&mut self) {
        self.guard.busy.lock().remove(&self.key);
    }
}
