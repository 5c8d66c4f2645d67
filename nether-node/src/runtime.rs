use std::net::SocketAddr;
use std::sync::Arc;

use nether_common::auth::KeyProvider;
use nether_common::utils::random::random_bytes;
use nether_common::PUBLIC_KEY_SIZE;
use nether_consensus::{
    ConnectionSummary, ElectionCoordinator, ElectionError, ElectionOptions, ElectionStatus, ProofOfWorkEngine,
    SharedLedger,
};
use nether_ledger::{Block, DataSet, LedgerError, StorageLocation};
use nether_p2p::{PeerNetwork, Transport};
use rand::Rng;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::NodeConfig;

/// A running node: listener, election coordinator and ledger behind one facade.
pub struct NodeRuntime {
    config: NodeConfig,
    keys: Arc<dyn KeyProvider>,
    coordinator: Arc<ElectionCoordinator>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl NodeRuntime {
    /// Binds the listen socket and starts accepting peers.
    pub async fn start(config: NodeConfig, keys: Arc<dyn KeyProvider>) -> Result<Self, Box<dyn std::error::Error>> {
        let transport_config = config.transport_config()?;
        let listener = TcpListener::bind(transport_config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let identity = keys.current_keypair().public_key();
        let transport = Transport::new(identity, local_addr.port(), transport_config.connect_timeout);
        let network = PeerNetwork::new(transport, shutdown.clone());

        let ledger = Arc::new(SharedLedger::open(config.ledger_path())?);
        if !ledger.is_loaded().await {
            info!("⚠️ No ledger at {}. Use `append` after creating one or `download` from a leader.", config.ledger_path().display());
        }

        let options = ElectionOptions { round_timeout: config.round_timeout() };
        let coordinator = ElectionCoordinator::new(network.clone(), ProofOfWorkEngine::new(config.pow_workers), ledger, options);
        network.spawn_listener(listener, coordinator.clone());
        info!("🚀 Node listening on {} as {}", local_addr, identity);

        Ok(Self { config, keys, coordinator, local_addr, shutdown })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn coordinator(&self) -> &Arc<ElectionCoordinator> {
        &self.coordinator
    }

    pub async fn start_as_leader(&self) {
        self.coordinator.start_as_leader().await;
    }

    pub async fn join_network(&self, address: &str) -> Result<(), ElectionError> {
        self.coordinator.join_network(address).await
    }

    pub async fn start_election(&self, leader_count: usize, difficulty: u32) -> Result<(), ElectionError> {
        self.coordinator.start_election(leader_count, difficulty).await
    }

    /// Election with the counts from the config.
    pub async fn start_default_election(&self) -> Result<(), ElectionError> {
        let election = &self.config.election;
        self.start_election(election.default_leader_count, election.default_difficulty).await
    }

    pub async fn ping_all(&self) -> usize {
        self.coordinator.ping_all().await
    }

    pub async fn request_blockchain(&self) -> Result<bool, ElectionError> {
        self.coordinator.request_blockchain().await
    }

    /// Signs and appends `data` with the current identity.
    ///
    /// A signing failure means the identity is unusable; the process aborts.
    pub async fn append_block(&self, data: DataSet) -> Result<Block, LedgerError> {
        let keypair = self.keys.current_keypair();
        match self.coordinator.ledger().append(data, &keypair).await {
            Err(LedgerError::Crypto(e)) => {
                error!("❌ Could not sign block, aborting: {}", e);
                std::process::abort();
            }
            result => result,
        }
    }

    pub async fn blocks(&self) -> Result<Vec<Block>, LedgerError> {
        self.coordinator.ledger().blocks().await
    }

    pub async fn status(&self) -> ElectionStatus {
        self.coordinator.status().await
    }

    pub async fn show_connections(&self) -> ConnectionSummary {
        self.coordinator.show_connections().await
    }

    /// Stops the listener, every chat loop and any mining in progress.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for NodeRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// `count` records with random owners and pointers, for exercising the ledger.
pub fn random_dataset(count: usize) -> DataSet {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| StorageLocation::new(random_bytes::<PUBLIC_KEY_SIZE>(), rng.gen()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_dataset() {
        let data = random_dataset(4);
        assert_eq!(data.len(), 4);
        assert!(random_dataset(0).is_empty());
    }
}
