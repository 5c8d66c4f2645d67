use std::collections::HashMap;
use std::fmt;

use rand::seq::IteratorRandom;
use tokio::sync::RwLock;
use tracing::warn;

use crate::connection::{ConnectionId, PeerConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Freshly accepted, role not yet announced.
    Client,
    Leader,
    Node,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Leader => f.write_str("leader"),
            Role::Node => f.write_str("node"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Only(Role),
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleCounts {
    pub clients: usize,
    pub leaders: usize,
    pub nodes: usize,
}

#[derive(Default)]
struct Members {
    clients: HashMap<ConnectionId, PeerConnection>,
    leaders: HashMap<ConnectionId, PeerConnection>,
    nodes: HashMap<ConnectionId, PeerConnection>,
}

impl Members {
    fn set(&self, role: Role) -> &HashMap<ConnectionId, PeerConnection> {
        match role {
            Role::Client => &self.clients,
            Role::Leader => &self.leaders,
            Role::Node => &self.nodes,
        }
    }

    fn set_mut(&mut self, role: Role) -> &mut HashMap<ConnectionId, PeerConnection> {
        match role {
            Role::Client => &mut self.clients,
            Role::Leader => &mut self.leaders,
            Role::Node => &mut self.nodes,
        }
    }

    fn take(&mut self, id: ConnectionId) -> Option<(Role, PeerConnection)> {
        [Role::Client, Role::Leader, Role::Node]
            .into_iter()
            .find_map(|role| self.set_mut(role).remove(&id).map(|conn| (role, conn)))
    }
}

/// Tracks every live connection under exactly one role.
///
/// All three sets sit behind a single lock, so moving a connection between
/// roles is atomic.
#[derive(Default)]
pub struct MembershipRegistry {
    inner: RwLock<Members>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn` under `role`, dropping any previous role it had.
    pub async fn add(&self, role: Role, conn: PeerConnection) {
        let mut members = self.inner.write().await;
        members.take(conn.id());
        members.set_mut(role).insert(conn.id(), conn);
    }

    pub async fn remove(&self, id: ConnectionId) -> Option<(Role, PeerConnection)> {
        self.inner.write().await.take(id)
    }

    pub async fn role_of(&self, id: ConnectionId) -> Option<Role> {
        let members = self.inner.read().await;
        [Role::Client, Role::Leader, Role::Node]
            .into_iter()
            .find(|role| members.set(*role).contains_key(&id))
    }

    /// Moves a connection from `from` to `to`. Returns false when it was not in `from`.
    pub async fn promote(&self, id: ConnectionId, from: Role, to: Role) -> bool {
        let mut members = self.inner.write().await;
        match members.set_mut(from).remove(&id) {
            Some(conn) => {
                members.set_mut(to).insert(id, conn);
                true
            }
            None => false,
        }
    }

    /// Any one connection of `role`, chosen at random.
    pub async fn pick_any(&self, role: Role) -> Option<PeerConnection> {
        let members = self.inner.read().await;
        members.set(role).values().choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn snapshot(&self, role: Role) -> Vec<PeerConnection> {
        self.inner.read().await.set(role).values().cloned().collect()
    }

    pub async fn snapshot_all(&self) -> Vec<(Role, PeerConnection)> {
        let members = self.inner.read().await;
        [Role::Client, Role::Leader, Role::Node]
            .into_iter()
            .flat_map(|role| members.set(role).values().map(move |c| (role, c.clone())))
            .collect()
    }

    pub async fn counts(&self) -> RoleCounts {
        let members = self.inner.read().await;
        RoleCounts {
            clients: members.clients.len(),
            leaders: members.leaders.len(),
            nodes: members.nodes.len(),
        }
    }

    /// Sends `message` to every connection in `scope`. Failures are logged and
    /// skipped; returns the number of successful deliveries.
    pub async fn broadcast(&self, scope: Scope, message: &str) -> usize {
        let targets: Vec<PeerConnection> = match scope {
            Scope::Only(role) => self.snapshot(role).await,
            Scope::All => self.snapshot_all().await.into_iter().map(|(_, c)| c).collect(),
        };

        let mut delivered = 0;
        for conn in targets {
            match conn.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(conn = conn.id(), peer = %conn.remote_addr(), "broadcast send failed: {}", e),
            }
        }
        delivered
    }

    /// Removes and closes every connection of `role`.
    pub async fn disconnect_role(&self, role: Role) -> usize {
        let removed: Vec<PeerConnection> = {
            let mut members = self.inner.write().await;
            members.set_mut(role).drain().map(|(_, c)| c).collect()
        };
        for conn in &removed {
            conn.close().await;
        }
        removed.len()
    }
}
