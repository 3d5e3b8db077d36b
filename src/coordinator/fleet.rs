//! Fleet: membership and routing behind one lock discipline
//!
//! Every operation that touches both stores takes the membership lock first
//! and the routing lock second. Each acquisition is bounded; giving up
//! surfaces as [`Error::LockTimeout`]. Nothing here performs I/O, so no lock
//! is ever held across a network call or a worker start.

use crate::common::{ClientId, Error, FleetMetrics, NodeId, Result};
use crate::coordinator::membership::MembershipStore;
use crate::coordinator::routing::RoutingTable;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Where the clients of a removed node went
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reassignment {
    pub moved: Vec<(ClientId, NodeId)>,
    pub orphaned: Vec<ClientId>,
}

/// Result of [`Fleet::add_client`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub node: NodeId,
    /// Node the client was routed to before, possibly `node` itself
    pub previous: Option<NodeId>,
}

pub struct Fleet {
    membership: Mutex<MembershipStore>,
    routing: Mutex<RoutingTable>,
    lock_timeout: Duration,
    metrics: Arc<FleetMetrics>,
}

type Guards<'a> = (
    MutexGuard<'a, MembershipStore>,
    MutexGuard<'a, RoutingTable>,
);

impl Fleet {
    pub fn new(lock_timeout: Duration, metrics: Arc<FleetMetrics>) -> Self {
        Self {
            membership: Mutex::new(MembershipStore::new()),
            routing: Mutex::new(RoutingTable::new()),
            lock_timeout,
            metrics,
        }
    }

    async fn membership(&self) -> Result<MutexGuard<'_, MembershipStore>> {
        match tokio::time::timeout(self.lock_timeout, self.membership.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.metrics.lock_timeouts.inc();
                Err(Error::LockTimeout("membership"))
            }
        }
    }

    async fn routing(&self) -> Result<MutexGuard<'_, RoutingTable>> {
        match tokio::time::timeout(self.lock_timeout, self.routing.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                self.metrics.lock_timeouts.inc();
                Err(Error::LockTimeout("routing"))
            }
        }
    }

    /// Membership, then routing
    async fn both(&self) -> Result<Guards<'_>> {
        let membership = self.membership().await?;
        let routing = self.routing().await?;
        Ok((membership, routing))
    }

    pub async fn register(&self, node: NodeId, load: u32) -> Result<()> {
        let mut membership = self.membership().await?;
        membership.register(node, load);
        self.metrics.fleet_size.set(membership.len() as u64);
        Ok(())
    }

    pub async fn update_load(&self, node: &NodeId, load: u32) -> Result<()> {
        self.membership().await?.update_load(node, load)
    }

    pub async fn get_load(&self, node: &NodeId) -> Result<Option<u32>> {
        Ok(self.membership().await?.get_load(node))
    }

    pub async fn contains(&self, node: &NodeId) -> Result<bool> {
        Ok(self.membership().await?.contains(node))
    }

    pub async fn least_loaded(&self) -> Result<Option<NodeId>> {
        Ok(self.membership().await?.least_loaded())
    }

    pub async fn loads(&self) -> Result<BTreeMap<NodeId, u32>> {
        Ok(self.membership().await?.snapshot())
    }

    pub async fn members(&self) -> Result<Vec<NodeId>> {
        Ok(self.membership().await?.nodes())
    }

    pub async fn client_of(&self, client: &ClientId) -> Result<Option<NodeId>> {
        Ok(self.routing().await?.node_of(client).cloned())
    }

    pub async fn client_count(&self) -> Result<usize> {
        Ok(self.routing().await?.len())
    }

    /// Route `client` to `node`, moving it if it was served elsewhere
    pub async fn add_client(&self, client: ClientId, node: NodeId) -> Result<Admission> {
        let (mut membership, mut routing) = self.both().await?;
        if !membership.contains(&node) {
            return Err(Error::NotRegistered(node.to_string()));
        }

        let previous = routing.assign(client, node.clone());
        if let Some(prev) = &previous {
            // A stale route to an evicted node has no load left to give back
            if membership.contains(prev) {
                membership.decrement(prev)?;
            }
        }
        membership.increment(&node)?;
        self.metrics.client_sessions.set(routing.len() as u64);

        Ok(Admission { node, previous })
    }

    /// Unassign `client` and give its load back, in one critical section
    pub async fn remove_client(&self, client: &ClientId) -> Result<NodeId> {
        let (mut membership, mut routing) = self.both().await?;
        let node = routing
            .unassign(client)
            .ok_or_else(|| Error::NotFound(client.to_string()))?;
        if membership.contains(&node) {
            membership.decrement(&node)?;
        }
        self.metrics.client_sessions.set(routing.len() as u64);
        Ok(node)
    }

    /// Remove `node` and hand each of its clients to the least-loaded
    /// survivor. Clients are left unassigned when nobody survives.
    ///
    /// Returns `None` if the node was already gone.
    pub async fn evict(&self, node: &NodeId) -> Result<Option<Reassignment>> {
        let (mut membership, mut routing) = self.both().await?;
        if membership.remove(node).is_none() {
            return Ok(None);
        }
        let reassignment = reassign_clients(&mut membership, &mut routing, node);
        self.metrics.fleet_size.set(membership.len() as u64);
        self.metrics.client_sessions.set(routing.len() as u64);
        Ok(Some(reassignment))
    }

    /// Node with the highest load above `threshold`, lowest `NodeId` on ties
    pub async fn most_overloaded(&self, threshold: u32) -> Result<Option<(NodeId, u32)>> {
        let membership = self.membership().await?;
        let mut worst: Option<(NodeId, u32)> = None;
        for (node, load) in membership.snapshot() {
            if load > threshold && worst.as_ref().map_or(true, |(_, w)| load > *w) {
                worst = Some((node, load));
            }
        }
        Ok(worst)
    }

    /// Register the freshly started `new` node with load 0 and move up to
    /// `count` of `from`'s clients onto it, lowest `ClientId` first.
    pub async fn admit_and_rebalance(
        &self,
        new: NodeId,
        from: &NodeId,
        count: usize,
    ) -> Result<Vec<ClientId>> {
        let (mut membership, mut routing) = self.both().await?;
        membership.register(new.clone(), 0);
        self.metrics.fleet_size.set(membership.len() as u64);

        if !membership.contains(from) {
            return Ok(Vec::new());
        }

        let moving: Vec<ClientId> = routing.clients_of(from).into_iter().take(count).collect();
        for client in &moving {
            routing.assign(client.clone(), new.clone());
            membership.decrement(from)?;
            membership.increment(&new)?;
        }
        Ok(moving)
    }

    /// Nodes idle for at least `delay`
    pub async fn idle_candidates(&self, delay: Duration) -> Result<Vec<NodeId>> {
        Ok(self.membership().await?.idle_longer_than(delay))
    }

    /// Remove `node` if it is still idle for `delay` and is not the last
    /// member. Any route still pointing at it is reassigned.
    pub async fn retire_if_idle(
        &self,
        node: &NodeId,
        delay: Duration,
    ) -> Result<Option<Reassignment>> {
        let (mut membership, mut routing) = self.both().await?;
        if membership.len() <= 1 || !membership.idle_longer_than(delay).contains(node) {
            return Ok(None);
        }
        membership.remove(node);
        let reassignment = reassign_clients(&mut membership, &mut routing, node);
        self.metrics.fleet_size.set(membership.len() as u64);
        self.metrics.client_sessions.set(routing.len() as u64);
        Ok(Some(reassignment))
    }
}

/// Move every client of the already removed `from` node
fn reassign_clients(
    membership: &mut MembershipStore,
    routing: &mut RoutingTable,
    from: &NodeId,
) -> Reassignment {
    let mut result = Reassignment::default();
    for client in routing.clients_of(from) {
        match membership.least_loaded() {
            Some(target) => {
                routing.assign(client.clone(), target.clone());
                // Target comes from the store, so it is present
                let _ = membership.increment(&target);
                result.moved.push((client, target));
            }
            None => {
                routing.unassign(&client);
                result.orphaned.push(client);
            }
        }
    }
    result
}
