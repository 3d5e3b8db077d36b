//! Client routing table
//!
//! Which node currently serves each client session. Loads live in the
//! membership store; keeping the two consistent is the fleet's job.

use crate::common::{ClientId, NodeId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: BTreeMap<ClientId, NodeId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the node the client was previously assigned to
    pub fn assign(&mut self, client: ClientId, node: NodeId) -> Option<NodeId> {
        self.routes.insert(client, node)
    }

    pub fn unassign(&mut self, client: &ClientId) -> Option<NodeId> {
        self.routes.remove(client)
    }

    pub fn node_of(&self, client: &ClientId) -> Option<&NodeId> {
        self.routes.get(client)
    }

    /// Clients assigned to `node`, lowest first
    pub fn clients_of(&self, node: &NodeId) -> BTreeSet<ClientId> {
        self.routes
            .iter()
            .filter(|(_, n)| *n == node)
            .map(|(c, _)| c.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientId, &NodeId)> {
        self.routes.iter()
    }
}
