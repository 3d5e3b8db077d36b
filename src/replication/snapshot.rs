//! Replicated state snapshot
//!
//! A node's mutable state is a bag of named collections. The coordinator and
//! the fan-out never look inside the values; they are carried verbatim.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Collections every application node keeps
pub const CLIENTS: &str = "clients";
pub const POSTS: &str = "posts";
pub const CHATROOMS: &str = "chatrooms";
pub const FOLLOWERS: &str = "followers";
pub const ONLINE_USERS: &str = "online_users";

pub const COLLECTIONS: [&str; 5] = [CLIENTS, POSTS, CHATROOMS, FOLLOWERS, ONLINE_USERS];

/// Full copy of a node's replicated state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub collections: BTreeMap<String, serde_json::Value>,
}

impl Snapshot {
    /// Snapshot with every standard collection present and empty
    pub fn empty_collections() -> Self {
        let collections = COLLECTIONS
            .iter()
            .map(|name| {
                let empty = match *name {
                    CLIENTS | POSTS => serde_json::Value::Array(Vec::new()),
                    _ => serde_json::Value::Object(serde_json::Map::new()),
                };
                (name.to_string(), empty)
            })
            .collect();
        Self { collections }
    }

    pub fn with_collection(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.collections.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.collections.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.collections.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_collections() {
        let snapshot = Snapshot::empty_collections();
        assert_eq!(snapshot.len(), COLLECTIONS.len());
        assert_eq!(snapshot.get(POSTS), Some(&json!([])));
        assert_eq!(snapshot.get(FOLLOWERS), Some(&json!({})));
    }

    #[test]
    fn test_values_are_carried_verbatim() {
        let snapshot = Snapshot::default()
            .with_collection(POSTS, json!([{"id": 1, "likes": 3, "comments": ["a: hi"]}]))
            .with_collection("custom", json!("opaque"));

        let wire = serde_json::to_string(&snapshot).unwrap();
        let back: Snapshot = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.get("custom"), Some(&json!("opaque")));
    }
}
