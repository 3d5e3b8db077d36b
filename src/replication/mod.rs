//! State replication between application nodes
//!
//! After every local write a node pushes its full state to all peers
//! (sequentially, or concurrently with a per-peer timeout). Receivers replace
//! their collections wholesale: last snapshot applied wins.

pub mod fanout;
pub mod snapshot;

pub use fanout::{PeerFailure, ReplicationReport, Replicator};
pub use snapshot::Snapshot;
