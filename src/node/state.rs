//! Application node state
//!
//! The replicated bag of collections plus the local client-session counter.

use crate::replication::Snapshot;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

pub struct NodeState {
    replicated: RwLock<Snapshot>,
    load: AtomicU32,
}

impl NodeState {
    pub fn new() -> Self {
        Self {
            replicated: RwLock::new(Snapshot::empty_collections()),
            load: AtomicU32::new(0),
        }
    }

    /// Copy of the current replicated state
    pub fn snapshot(&self) -> Snapshot {
        match self.replicated.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the whole replicated state with `incoming`.
    ///
    /// Not a merge: every standard collection is reset to empty first, so a
    /// collection absent from `incoming` ends up empty.
    pub fn apply(&self, incoming: Snapshot) {
        let mut guard = match self.replicated.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = Snapshot::empty_collections();
        for (name, value) in incoming.collections {
            next.set(name, value);
        }
        *guard = next;
    }

    /// Local mutation; returns the state to replicate afterwards
    pub fn set_collection(&self, name: &str, value: serde_json::Value) -> Snapshot {
        let mut guard = match self.replicated.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.set(name, value);
        guard.clone()
    }

    pub fn load(&self) -> u32 {
        self.load.load(Ordering::SeqCst)
    }

    pub fn increment_load(&self) -> u32 {
        self.load.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Saturates at zero
    pub fn decrement_load(&self) -> u32 {
        let prev = self
            .load
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| {
                Some(l.saturating_sub(1))
            })
            .unwrap_or(0);
        prev.saturating_sub(1)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
