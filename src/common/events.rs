//! Fleet event log
//!
//! Structured record of membership and autoscaling events, and the sink for
//! log lines nodes forward through the coordinator's `Log` call. Keeps the
//! most recent entries in memory and optionally appends JSON lines to a file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Default number of events kept in memory
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetEventKind {
    NodeRegistered,
    NodeEvicted,
    ClientReassigned,
    ClientOrphaned,
    ScaleUp,
    ScaleDown,
    SpawnFailed,
    StopFailed,
    /// A line forwarded by a node
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEvent {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub kind: FleetEventKind,
    /// Node the event is about, or the origin of a remote line
    pub node: Option<String>,
    pub message: String,
}

pub struct EventLog {
    file: Option<Mutex<File>>,
    recent: Mutex<VecDeque<FleetEvent>>,
    capacity: usize,
}

impl EventLog {
    /// In-memory only
    pub fn new(capacity: usize) -> Self {
        Self {
            file: None,
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_EVENT_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    /// In-memory plus an append-only JSON-lines file
    pub fn with_file(path: impl AsRef<Path>, capacity: usize) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let mut log = Self::new(capacity);
        log.file = Some(Mutex::new(file));
        Ok(log)
    }

    pub fn log(&self, event: FleetEvent) {
        match event.kind {
            FleetEventKind::Remote => tracing::info!(
                target: "fleetlb::remote",
                origin = event.node.as_deref().unwrap_or("-"),
                "{}",
                event.message
            ),
            kind => tracing::debug!(
                target: "fleetlb::events",
                ?kind,
                node = event.node.as_deref().unwrap_or("-"),
                "{}",
                event.message
            ),
        }

        if let Some(file) = &self.file {
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            if let Ok(mut f) = file.lock() {
                let _ = writeln!(f, "{}", line);
            }
        }

        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.capacity {
                recent.pop_front();
            }
            recent.push_back(event);
        }
    }

    pub fn record(
        &self,
        kind: FleetEventKind,
        node: Option<&crate::common::NodeId>,
        message: impl Into<String>,
    ) {
        self.log(FleetEvent {
            timestamp: Utc::now(),
            kind,
            node: node.map(|n| n.to_string()),
            message: message.into(),
        });
    }

    /// Up to `limit` most recent events, oldest first
    pub fn recent(&self, limit: usize) -> Vec<FleetEvent> {
        match self.recent.lock() {
            Ok(recent) => {
                let skip = recent.len().saturating_sub(limit);
                recent.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeId;
    use tempfile::tempdir;

    #[test]
    fn test_ring_keeps_latest() {
        let log = EventLog::new(2);
        let node = NodeId::from("127.0.0.1:7001");
        log.record(FleetEventKind::NodeRegistered, Some(&node), "one");
        log.record(FleetEventKind::ScaleUp, Some(&node), "two");
        log.record(FleetEventKind::ScaleDown, Some(&node), "three");

        let events = log.recent(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "two");
        assert_eq!(events[1].kind, FleetEventKind::ScaleDown);

        assert_eq!(log.recent(1)[0].message, "three");
    }

    #[test]
    fn test_appends_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleet-events.log");
        let log = EventLog::with_file(&path, 8).unwrap();
        log.record(FleetEventKind::Remote, None, "hello from a node");
        log.record(FleetEventKind::NodeEvicted, Some(&NodeId::from("h:1")), "probe failed");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: FleetEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.kind, FleetEventKind::NodeEvicted);
        assert_eq!(parsed.node.as_deref(), Some("h:1"));
    }
}
