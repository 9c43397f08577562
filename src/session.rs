//! Dialog session registry: which flow each user is in and what they have
//! answered so far.
//!
//! Sessions live in memory only. Every user has one slot guarded by its own
//! async mutex; holding the slot guard serializes all work for that user
//! while other users proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::flows::{Answers, FlowKind, FlowState, definition};

/// One user's in-progress dialog.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    /// Flow kind and the step awaiting an answer.
    pub state: FlowState,
    pub answers: Answers,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// A fresh session at the flow's initial step.
    pub fn new(user_id: &str, kind: FlowKind) -> Self {
        Self {
            user_id: user_id.to_string(),
            state: definition(kind).initial().state,
            answers: Answers::new(),
            started_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> FlowKind {
        self.state.kind()
    }
}

type Slot = Arc<Mutex<Option<Session>>>;

/// Exclusive access to one user's session slot.
pub type SessionGuard = OwnedMutexGuard<Option<Session>>;

/// Per-user session store.
#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(user_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }

    /// Take the user's slot for the duration of one operation.
    ///
    /// Waiters are served in FIFO order. Do not call the other methods for
    /// the same user while holding the guard.
    pub async fn lock(&self, user_id: &str) -> SessionGuard {
        self.slot(user_id).await.lock_owned().await
    }

    /// Snapshot of the user's session, if any.
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.lock(user_id).await.clone()
    }

    pub async fn set(&self, user_id: &str, session: Session) {
        *self.lock(user_id).await = Some(session);
    }

    /// Remove the user's session, returning it.
    pub async fn clear(&self, user_id: &str) -> Option<Session> {
        self.lock(user_id).await.take()
    }

    /// Drop slots that hold no session and are not in use.
    pub async fn prune_idle(&self) -> usize {
        let mut slots = self.slots.write().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => true,
        });
        let pruned = before - slots.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned idle session slots");
        }
        pruned
    }

    /// Number of users with an active flow. Slots in use count as active.
    pub async fn active_count(&self) -> usize {
        let slots = self.slots.read().await;
        slots
            .values()
            .filter(|slot| slot.try_lock().map_or(true, |guard| guard.is_some()))
            .count()
    }
}
