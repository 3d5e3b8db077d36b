//! Membership store
//!
//! Registered nodes with their load and idle timer. Ordered by `NodeId` so
//! iteration and least-loaded tie-breaks are deterministic.

use crate::common::{Error, NodeId, Result};
use std::collections::BTreeMap;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub load: u32,
    /// Set while the node carries no client and is not the only member
    pub idle_since: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct MembershipStore {
    nodes: BTreeMap<NodeId, NodeEntry>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node`, overwriting the load of an existing entry
    pub fn register(&mut self, node: NodeId, load: u32) {
        let idle_since = self.nodes.get(&node).and_then(|e| e.idle_since);
        self.nodes.insert(node, NodeEntry { load, idle_since });
        self.refresh_idle();
    }

    pub fn update_load(&mut self, node: &NodeId, load: u32) -> Result<()> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::NotRegistered(node.to_string()))?;
        entry.load = load;
        self.refresh_idle();
        Ok(())
    }

    pub fn increment(&mut self, node: &NodeId) -> Result<u32> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::NotRegistered(node.to_string()))?;
        entry.load = entry.load.saturating_add(1);
        let load = entry.load;
        self.refresh_idle();
        Ok(load)
    }

    /// Saturates at zero
    pub fn decrement(&mut self, node: &NodeId) -> Result<u32> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::NotRegistered(node.to_string()))?;
        entry.load = entry.load.saturating_sub(1);
        let load = entry.load;
        self.refresh_idle();
        Ok(load)
    }

    pub fn get_load(&self, node: &NodeId) -> Option<u32> {
        self.nodes.get(node).map(|e| e.load)
    }

    pub fn get(&self, node: &NodeId) -> Option<&NodeEntry> {
        self.nodes.get(node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    /// Minimum load, lowest `NodeId` on ties; `None` on an empty store
    pub fn least_loaded(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .min_by_key(|(_, e)| e.load)
            .map(|(id, _)| id.clone())
    }

    /// Like [`least_loaded`](Self::least_loaded), ignoring `excluded`
    pub fn least_loaded_except(&self, excluded: &NodeId) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|(id, _)| *id != excluded)
            .min_by_key(|(_, e)| e.load)
            .map(|(id, _)| id.clone())
    }

    /// Copy of every node's load
    pub fn snapshot(&self) -> BTreeMap<NodeId, u32> {
        self.nodes
            .iter()
            .map(|(id, e)| (id.clone(), e.load))
            .collect()
    }

    pub fn remove(&mut self, node: &NodeId) -> Option<u32> {
        let removed = self.nodes.remove(node).map(|e| e.load);
        if removed.is_some() {
            self.refresh_idle();
        }
        removed
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn total_load(&self) -> u64 {
        self.nodes.values().map(|e| e.load as u64).sum()
    }

    /// Nodes idle for at least `delay`, in `NodeId` order
    pub fn idle_longer_than(&self, delay: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        self.nodes
            .iter()
            .filter(|(_, e)| {
                e.idle_since
                    .map(|since| now.saturating_duration_since(since) >= delay)
                    .unwrap_or(false)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Start idle timers on unloaded nodes and clear them on loaded ones.
    /// A lone node is never idle.
    fn refresh_idle(&mut self) {
        let now = Instant::now();
        let shared = self.nodes.len() > 1;
        for entry in self.nodes.values_mut() {
            if entry.load == 0 && shared {
                entry.idle_since.get_or_insert(now);
            } else {
                entry.idle_since = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::from(s)
    }

    #[test]
    fn test_least_loaded_empty() {
        assert_eq!(MembershipStore::new().least_loaded(), None);
    }

    #[test]
    fn test_least_loaded_ties_break_on_lowest_id() {
        let mut store = MembershipStore::new();
        store.register(id("127.0.0.1:7002"), 1);
        store.register(id("127.0.0.1:7003"), 1);
        store.register(id("127.0.0.1:7001"), 4);
        assert_eq!(store.least_loaded(), Some(id("127.0.0.1:7002")));

        store.update_load(&id("127.0.0.1:7001"), 1).unwrap();
        assert_eq!(store.least_loaded(), Some(id("127.0.0.1:7001")));
    }

    #[test]
    fn test_least_loaded_is_minimal_over_any_sequence() {
        let mut store = MembershipStore::new();
        let ops: [(&str, u32); 8] = [
            ("a:1", 5),
            ("b:1", 3),
            ("c:1", 9),
            ("b:1", 7),
            ("d:1", 4),
            ("a:1", 2),
            ("c:1", 0),
            ("c:1", 6),
        ];
        for (node, load) in ops {
            if store.contains(&id(node)) {
                store.update_load(&id(node), load).unwrap();
            } else {
                store.register(id(node), load);
            }
            let best = store.least_loaded().unwrap();
            let best_load = store.get_load(&best).unwrap();
            assert!(store.snapshot().values().all(|l| best_load <= *l));
        }
    }

    #[test]
    fn test_register_overwrites_load() {
        let mut store = MembershipStore::new();
        store.register(id("a:1"), 3);
        store.register(id("a:1"), 1);
        assert_eq!(store.get_load(&id("a:1")), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_unknown_node() {
        let mut store = MembershipStore::new();
        assert!(matches!(
            store.update_load(&id("a:1"), 1),
            Err(Error::NotRegistered(_))
        ));
        assert!(store.increment(&id("a:1")).is_err());
    }

    #[test]
    fn test_decrement_saturates() {
        let mut store = MembershipStore::new();
        store.register(id("a:1"), 0);
        assert_eq!(store.decrement(&id("a:1")).unwrap(), 0);
        assert_eq!(store.increment(&id("a:1")).unwrap(), 1);
    }

    #[test]
    fn test_idle_timer_tracks_load_and_fleet_size() {
        let mut store = MembershipStore::new();
        store.register(id("a:1"), 0);
        // Lone node
        assert_eq!(store.get(&id("a:1")).unwrap().idle_since, None);

        store.register(id("b:1"), 2);
        assert!(store.get(&id("a:1")).unwrap().idle_since.is_some());
        assert_eq!(store.get(&id("b:1")).unwrap().idle_since, None);

        store.increment(&id("a:1")).unwrap();
        assert_eq!(store.get(&id("a:1")).unwrap().idle_since, None);

        store.update_load(&id("a:1"), 0).unwrap();
        assert!(store.get(&id("a:1")).unwrap().idle_since.is_some());

        store.remove(&id("b:1"));
        assert_eq!(store.get(&id("a:1")).unwrap().idle_since, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_longer_than() {
        let mut store = MembershipStore::new();
        store.register(id("a:1"), 1);
        store.register(id("b:1"), 0);

        assert!(store.idle_longer_than(Duration::from_secs(10)).is_empty());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.idle_longer_than(Duration::from_secs(10)), vec![id("b:1")]);

        // Reloading restarts the timer
        store.increment(&id("b:1")).unwrap();
        store.decrement(&id("b:1")).unwrap();
        assert!(store.idle_longer_than(Duration::from_secs(10)).is_empty());
    }
}
